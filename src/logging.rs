//! Tracing initialization for the daemon.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

pub const LOG_ENV: &str = "TERMLEDGER_LOG";
const DEFAULT_FILTER: &str = "termledger=info,termledgerd=info";

/// Installs the global subscriber. Reads `TERMLEDGER_LOG`
/// (e.g. `TERMLEDGER_LOG=termledger=debug`) and falls back to info-level
/// logging for the engine and daemon. Output goes to stderr; stdout carries
/// IPC replies.
///
/// Idempotent.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(true),
            )
            .with(filter)
            .init();
    });
}
