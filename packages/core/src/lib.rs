// Library root. The binary in `src/main.rs` is a thin wrapper around
// `commands::run`; integration tests in `tests/` use the modules directly.

pub mod cli;
pub mod commands;
pub mod config;
pub mod credential;
pub mod error;
pub mod host;
pub mod ledger;
pub mod logging;
pub mod output;
pub mod profile;
pub mod request;
pub mod services;
