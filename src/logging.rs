//! Log output.
//!
//! Logs go to stderr through `tracing-subscriber`, leaving stdout to
//! command output. `RUST_LOG` takes precedence; otherwise the level is
//! `info`, or `debug` with `--verbose`.

use tracing_subscriber::EnvFilter;

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug,sqlx=warn,hyper=info"
    } else {
        "info,sqlx=warn"
    }
}

/// Install the global subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for verbose in [false, true] {
            assert!(default_directive(verbose).parse::<EnvFilter>().is_ok());
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
