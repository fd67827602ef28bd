use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging on stderr.
///
/// `RUST_LOG` wins when set. Otherwise only warnings are shown, or
/// everything from this crate at debug level with `--verbose`.
/// Stdout is reserved for command output.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    tracing::debug!("Logging initialized");
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "warn,koios_cli=debug"
    } else {
        "warn"
    }
}
