//! Logging setup
//!
//! The library only emits `tracing` events; installing a subscriber is the
//! binary's (or a test's) job. Event levels used across the crate:
//!
//! | Level | Events |
//! |-------|--------|
//! | `debug` | fiber spawn / completion / interruption, scheduler moving to a timer, protocol violations |
//! | `trace` | drain cycles, fiber yields, async-input handoffs and state changes |

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Filter directive for a `-v` count: 0 warn, 1 info, 2 debug, 3+ trace
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install a `fmt` subscriber on stderr.
///
/// `RUST_LOG`, when set, takes precedence over `verbosity`. Only the first
/// call has any effect.
pub fn init_tracing(verbosity: u8) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(9), "trace");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(1);
        init_tracing(3);
        tracing::info!("subscriber installed once");
    }
}
