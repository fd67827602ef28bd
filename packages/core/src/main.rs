use clap::Parser;
use dotenvy::dotenv;

use koios_cli::cli::Cli;
use koios_cli::config::Config;
use koios_cli::error::AppError;
use koios_cli::logging::init_logging;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::from_env()
        .map_err(AppError::Config)
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });
    tracing::debug!("Loaded config: {:?}", config);

    if let Err(err) = koios_cli::commands::run(cli, config).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}
