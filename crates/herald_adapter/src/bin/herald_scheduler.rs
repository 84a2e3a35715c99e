#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use herald_adapter::{health_bind_from_env, SchedulerHealthResponse, SchedulerRuntime};
use herald_engines::telegram::TelegramChannel;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Runtime = Arc<SchedulerRuntime<TelegramChannel>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime: Runtime = Arc::new(SchedulerRuntime::default_from_env()?);
    let shutdown = runtime.shutdown_signal();
    let (stop_tx, stop_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_stop_signal().await;
        warn!("stop signal received; finishing current recipient");
        shutdown.request();
        let _ = stop_tx.send(true);
    });

    if let Some(bind) = health_bind_from_env() {
        let addr: SocketAddr = bind.parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let app = Router::new()
            .route("/healthz", get(healthz))
            .with_state(runtime.clone());
        let mut server_stop = stop_rx.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_stop.changed().await;
                })
                .await;
            if let Err(err) = served {
                error!(error = %err, "health endpoint stopped");
            }
        });
        info!(%addr, "health endpoint listening");
    }

    let mut stop = stop_rx;
    loop {
        let delay = runtime.until_next_tick(Utc::now());
        info!(wait_secs = delay.as_secs(), "waiting for next tick");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => break,
        }

        let worker = runtime.clone();
        match tokio::task::spawn_blocking(move || worker.run_tick(Utc::now())).await {
            // Outcome is recorded and logged by the runtime.
            Ok(_) => {}
            Err(err) => error!(error = %err, "tick worker did not complete"),
        }
        if runtime.shutdown_signal().is_requested() {
            break;
        }
    }

    info!("herald_scheduler stopped");
    Ok(())
}

async fn healthz(State(runtime): State<Runtime>) -> (StatusCode, Json<SchedulerHealthResponse>) {
    let report = runtime.health_report();
    let status = if report.outcome == "HEALTHY" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable; listening for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
