//! Command handlers behind the `api`, `auth` and `healthcheck` subcommands.

pub mod api;
pub mod auth;
pub mod healthcheck;

use std::time::Duration;

use crate::cli::{Cli, Command, ConnectionArgs};
use crate::config::Config;
use crate::error::AppError;
use crate::host::HostChoice;
use crate::services::koios::{ClientOptions, DEFAULT_ORIGIN};

/// Dispatch the parsed command line.
pub async fn run(cli: Cli, config: Config) -> Result<(), AppError> {
    match cli.command {
        Command::Api(args) => api::run(args, &config).await,
        Command::Auth(command) => auth::run(command, &config),
        Command::Healthcheck(args) => healthcheck::run(args).await,
    }
}

fn client_options(
    connection: &ConnectionArgs,
    host: &HostChoice,
    timeout: Duration,
    auth_token: Option<String>,
) -> ClientOptions {
    ClientOptions {
        scheme: connection.scheme.clone(),
        host: host.hostname().to_string(),
        port: connection.port,
        api_version: connection.api_version.clone(),
        origin: connection
            .origin
            .clone()
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
        timeout,
        auth_token,
    }
}
