use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects `debug` over `info`
/// for this crate. `sqlx` statement logging stays at `warn` unless asked for.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,ledgerline={}", default_level)));

    let layer = fmt::layer()
        .with_target(verbose)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed (e.g. by an embedding binary).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}
