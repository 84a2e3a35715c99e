#![forbid(unsafe_code)]

pub mod cipher_config;
pub mod envelope;
pub mod pseudonym;
pub mod telegram;
