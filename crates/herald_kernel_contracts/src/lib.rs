#![forbid(unsafe_code)]

pub mod common;
pub mod directory;
pub mod dispatch;
pub mod lifecycle;

pub use common::{ContractViolation, Validate};
