#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use herald_engines::envelope::EnvelopeCipher;
use herald_kernel_contracts::directory::{SubscriptionState, UserRecord};
use herald_kernel_contracts::lifecycle::{LifecycleNotice, LifecyclePassSummary, LifecycleSummary};
use herald_storage::repo::{StorageError, SubscriptionLedgerRepo};
use tracing::{debug, error, info, warn};

use crate::delivery::DeliveryChannel;
use crate::dispatch::{isolate, DispatchError, ShutdownSignal};
use crate::resolver::RecipientResolver;

/// Daily subscription maintenance: expiry notices with a state transition,
/// plus advance warnings inside the configured window. Warnings are not
/// deduplicated, so this should run once per day.
pub struct LifecycleSweep<'a, C>
where
    C: DeliveryChannel + ?Sized,
{
    resolver: RecipientResolver<'a>,
    channel: &'a C,
    warning_window: Duration,
    shutdown: ShutdownSignal,
}

impl<'a, C> LifecycleSweep<'a, C>
where
    C: DeliveryChannel + ?Sized,
{
    pub fn new(
        cipher: &'a EnvelopeCipher,
        channel: &'a C,
        warning_window: Duration,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            resolver: RecipientResolver::new(cipher),
            channel,
            warning_window,
            shutdown,
        }
    }

    pub fn run<D>(&self, directory: &mut D, now: DateTime<Utc>) -> Result<LifecycleSummary, DispatchError>
    where
        D: SubscriptionLedgerRepo + ?Sized,
    {
        let mut summary = LifecycleSummary::default();

        let users = selected(directory.select_subscriptions_ended(now))?;
        summary.subscriptions_expired = self.run_pass(
            directory,
            users,
            |_| LifecycleNotice::SubscriptionExpired,
            Some(SubscriptionState::Expired),
        );

        let users = selected(directory.select_subscriptions_ending(now, self.warning_window))?;
        summary.subscriptions_ending = self.run_pass(
            directory,
            users,
            |user| LifecycleNotice::SubscriptionEndingSoon {
                ends_at: user.subscription_ends_at.unwrap_or(now),
            },
            None,
        );

        let users = selected(directory.select_trials_ended(now))?;
        summary.trials_expired = self.run_pass(
            directory,
            users,
            |_| LifecycleNotice::TrialExpired,
            Some(SubscriptionState::Expired),
        );

        let users = selected(directory.select_trials_ending(now, self.warning_window))?;
        summary.trials_ending = self.run_pass(
            directory,
            users,
            |user| LifecycleNotice::TrialEndingSoon {
                ends_at: user.trial_expires_at.unwrap_or(now),
            },
            None,
        );

        info!(
            notified = summary.total_notified(),
            subscriptions_expired = summary.subscriptions_expired.matched,
            subscriptions_ending = summary.subscriptions_ending.matched,
            trials_expired = summary.trials_expired.matched,
            trials_ending = summary.trials_ending.matched,
            "lifecycle sweep finished"
        );
        Ok(summary)
    }

    fn run_pass<D, F>(
        &self,
        directory: &mut D,
        users: Vec<UserRecord>,
        notice_for: F,
        transition: Option<SubscriptionState>,
    ) -> LifecyclePassSummary
    where
        D: SubscriptionLedgerRepo + ?Sized,
        F: Fn(&UserRecord) -> LifecycleNotice,
    {
        let mut pass = LifecyclePassSummary::default();
        for user in users {
            if self.shutdown.is_requested() {
                warn!("shutdown requested; lifecycle pass cut short");
                break;
            }
            pass.matched += 1;
            let notice = notice_for(&user);

            match self.resolver.resolve_primary(&user) {
                Ok(address) => {
                    let text = notice.default_text();
                    match isolate(|| self.channel.send_text(&address, &text)) {
                        Ok(()) => {
                            debug!(user_id = %user.id, notice = notice.kind().as_str(), "lifecycle notice sent");
                            pass.notified += 1;
                        }
                        Err(err) => {
                            warn!(
                                user_id = %user.id,
                                notice = notice.kind().as_str(),
                                kind = err.kind(),
                                "lifecycle notice failed"
                            );
                            pass.failed += 1;
                        }
                    }
                }
                Err(err) => {
                    debug!(user_id = %user.id, reason = err.reason.as_str(), "lifecycle notice skipped");
                    pass.unaddressable += 1;
                }
            }

            if let Some(state) = transition {
                match directory.set_subscription_state(user.id, state) {
                    Ok(()) => pass.transitioned += 1,
                    Err(err) => warn!(
                        user_id = %user.id,
                        state = state.as_str(),
                        error = %err,
                        "subscription state transition failed"
                    ),
                }
            }
        }
        pass
    }
}

fn selected(result: Result<Vec<UserRecord>, StorageError>) -> Result<Vec<UserRecord>, DispatchError> {
    result.map_err(|err| {
        error!(error = %err, "lifecycle selection failed");
        DispatchError::DirectoryUnavailable(err)
    })
}
