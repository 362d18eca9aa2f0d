//! Tracing initialisation for the `prebuild` binary.
//!
//! Log lines go to stderr so they interleave with the build driver's own
//! output rather than with the report printed on stdout.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the subscriber for one `prebuild` invocation.
///
/// The build driver inherits the terminal, so its compiler output and our
/// log lines share it. Logs are written to stderr to keep stdout for the
/// final outcome (`Installed in ...` or the `--report-json` document), which
/// callers may capture or pipe.
///
/// `json` switches to newline-delimited JSON; `level` applies unless
/// `RUST_LOG` says otherwise. Later calls are no-ops.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
