#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleNoticeKind {
    SubscriptionExpired,
    SubscriptionEndingSoon,
    TrialExpired,
    TrialEndingSoon,
}

impl LifecycleNoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleNoticeKind::SubscriptionExpired => "subscription_expired",
            LifecycleNoticeKind::SubscriptionEndingSoon => "subscription_ending_soon",
            LifecycleNoticeKind::TrialExpired => "trial_expired",
            LifecycleNoticeKind::TrialEndingSoon => "trial_ending_soon",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleNotice {
    SubscriptionExpired,
    SubscriptionEndingSoon { ends_at: DateTime<Utc> },
    TrialExpired,
    TrialEndingSoon { ends_at: DateTime<Utc> },
}

impl LifecycleNotice {
    pub fn kind(&self) -> LifecycleNoticeKind {
        match self {
            LifecycleNotice::SubscriptionExpired => LifecycleNoticeKind::SubscriptionExpired,
            LifecycleNotice::SubscriptionEndingSoon { .. } => {
                LifecycleNoticeKind::SubscriptionEndingSoon
            }
            LifecycleNotice::TrialExpired => LifecycleNoticeKind::TrialExpired,
            LifecycleNotice::TrialEndingSoon { .. } => LifecycleNoticeKind::TrialEndingSoon,
        }
    }

    pub fn default_text(&self) -> String {
        match self {
            LifecycleNotice::SubscriptionExpired => {
                "Your subscription has expired. Renew it to keep receiving daily notifications."
                    .to_string()
            }
            LifecycleNotice::SubscriptionEndingSoon { ends_at } => format!(
                "Your subscription ends on {}. Renew before then to avoid interruption.",
                ends_at.format("%Y-%m-%d")
            ),
            LifecycleNotice::TrialExpired => {
                "Your free trial has ended. Subscribe to keep receiving daily notifications."
                    .to_string()
            }
            LifecycleNotice::TrialEndingSoon { ends_at } => format!(
                "Your free trial ends on {}. Subscribe to continue afterwards.",
                ends_at.format("%Y-%m-%d")
            ),
        }
    }
}

/// Per-pass counters. `unaddressable` users still get their state transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecyclePassSummary {
    pub matched: usize,
    pub notified: usize,
    pub unaddressable: usize,
    pub failed: usize,
    pub transitioned: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleSummary {
    pub subscriptions_expired: LifecyclePassSummary,
    pub subscriptions_ending: LifecyclePassSummary,
    pub trials_expired: LifecyclePassSummary,
    pub trials_ending: LifecyclePassSummary,
}

impl LifecycleSummary {
    pub fn total_notified(&self) -> usize {
        self.subscriptions_expired.notified
            + self.subscriptions_ending.notified
            + self.trials_expired.notified
            + self.trials_ending.notified
    }
}
