#![forbid(unsafe_code)]

pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod eligibility;
pub mod lifecycle;
pub mod resolver;
pub mod tick;
