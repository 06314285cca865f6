//! Tracing subscriber setup for the `ctx` binary.
//!
//! Logs go to stderr so stdout stays machine-readable (`--json`).
//! `RUST_LOG` overrides the level chosen from `--verbose`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter directive for a verbosity flag.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "kontext=info,kontext_core=info,warn"
    } else {
        "warn"
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directive(verbose)).is_ok());
        }
    }
}
