//! Process-wide logging setup.

/// Initialize process-wide logging with the defaults: JSON lines, `info` unless
/// `RUST_LOG` says otherwise.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    logging::init(&logging::LogConfig::default());
}

/// Subscriber configuration and installation.
pub mod logging;
