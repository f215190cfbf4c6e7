//! Tracing setup
//!
//! The subscriber is installed before the config file is read so that
//! config loading can log. The filter starts at `info` and is swapped for
//! the configured `logging.level` once the config is known, unless
//! `RUST_LOG` was set, in which case it always wins.

use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter used before the config file has been read
pub const STARTUP_LEVEL: &str = "info";

/// Per-crate filter for `level`
pub fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("fpid_worker={0},fpid_common={0}", level))
}

pub struct Logging {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl Logging {
    /// Install the global subscriber
    pub fn init() -> Self {
        let (filter, from_env) = match EnvFilter::try_from_default_env() {
            Ok(filter) => (filter, true),
            Err(_) => (level_filter(STARTUP_LEVEL), false),
        };
        let (filter, handle) = reload::Layer::new(filter);

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();

        Self { handle, from_env }
    }

    /// Switch to the configured level. No-op when `RUST_LOG` is set.
    pub fn apply_level(&self, level: &str) {
        if self.from_env {
            return;
        }
        if let Err(e) = self.handle.reload(level_filter(level)) {
            tracing::warn!("Failed to apply log level {:?}: {}", level, e);
        }
    }
}
