#![forbid(unsafe_code)]

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use herald_engines::cipher_config::CipherConfig;
use herald_engines::envelope::EnvelopeCipher;
use herald_engines::telegram::{TelegramChannel, TelegramConfig};
use herald_kernel_contracts::directory::DeliveryHour;
use herald_os::config::DispatchConfig;
use herald_os::delivery::{ChannelDelivery, StaticContentBuilder};
use herald_os::dispatch::ShutdownSignal;
use herald_os::tick::TickRunner;
use herald_tools::commands::{
    encrypt_channel_id, keygen, pseudonym_for, render_lifecycle_summary, render_run_summary,
    ToolError,
};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "herald")]
#[command(about = "Herald notification dispatcher operator tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one dispatch pass now
    Dispatch {
        /// Local hour to dispatch for (defaults to the current hour)
        #[arg(long)]
        hour: Option<u8>,

        /// Directory snapshot path (overrides HERALD_DIRECTORY_PATH)
        #[arg(short, long)]
        directory: Option<PathBuf>,
    },

    /// Run the subscription lifecycle sweep now
    Lifecycle {
        /// Directory snapshot path (overrides HERALD_DIRECTORY_PATH)
        #[arg(short, long)]
        directory: Option<PathBuf>,
    },

    /// Encrypt a channel id read from the terminal or stdin
    Encrypt,

    /// Print the pseudonym of an external id read from the terminal or stdin
    Pseudonym,

    /// Generate a fresh base64 encryption key
    Keygen,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli.command) {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(command: Commands) -> Result<(), ToolError> {
    match command {
        Commands::Dispatch { hour, directory } => {
            let runner = tick_runner(directory)?;
            let telegram = TelegramChannel::new(&TelegramConfig::from_env()?)?;
            let delivery = ChannelDelivery::new(StaticContentBuilder::from_env(), telegram);
            let clock = runner.config().clock();
            let now = clock.now_utc();
            let hour = match hour {
                Some(raw) => DeliveryHour::new(raw)?,
                None => clock.local_hour(now),
            };
            let summary = runner.dispatch(&delivery, hour, now, ShutdownSignal::new())?;
            println!("{}", render_run_summary(&summary)?);
        }
        Commands::Lifecycle { directory } => {
            let runner = tick_runner(directory)?;
            let telegram = TelegramChannel::new(&TelegramConfig::from_env()?)?;
            let now = runner.config().clock().now_utc();
            let summary = runner.lifecycle(&telegram, now, ShutdownSignal::new())?;
            println!("{}", render_lifecycle_summary(&summary)?);
        }
        Commands::Encrypt => {
            let cipher = EnvelopeCipher::new(&CipherConfig::from_env()?);
            let raw = read_sensitive_input("Channel id:")?;
            println!("{}", encrypt_channel_id(&cipher, &raw)?);
        }
        Commands::Pseudonym => {
            let raw = read_sensitive_input("External id:")?;
            println!("{}", pseudonym_for(&raw)?);
        }
        Commands::Keygen => println!("{}", keygen()),
    }
    Ok(())
}

fn tick_runner(directory: Option<PathBuf>) -> Result<TickRunner, ToolError> {
    let mut config = DispatchConfig::from_env()?;
    if directory.is_some() {
        config.directory_path = directory;
    }
    let cipher = EnvelopeCipher::new(&CipherConfig::from_env()?);
    Ok(TickRunner::new(cipher, config)?)
}

// Prompts without echo on a terminal so ids stay out of scrollback.
fn read_sensitive_input(prompt: &str) -> Result<Zeroizing<String>, ToolError> {
    let value = if io::stdin().is_terminal() {
        Zeroizing::new(rpassword::prompt_password(prompt)?)
    } else {
        let mut input = Zeroizing::new(String::new());
        io::stdin().read_to_string(&mut input)?;
        input
    };
    if value.trim().is_empty() {
        return Err(ToolError::Usage("input must not be empty".to_string()));
    }
    Ok(value)
}
