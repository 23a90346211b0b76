//! # Telemetry Module
//!
//! Setup del logging strutturato tramite `tracing_subscriber`.
//!
//! ## Livelli:
//! - `RUST_LOG` impostata: viene usata così com'è
//! - altrimenti `info`, oppure `debug` se `verbose`

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber.
///
/// Returns `false` when a global subscriber was already installed, which is
/// the normal case when the host application configures tracing itself.
pub fn init_tracing(verbose: bool) -> bool {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
