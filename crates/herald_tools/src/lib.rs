#![forbid(unsafe_code)]

pub mod commands;
