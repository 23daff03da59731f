//! Runtime Configuration
//!
//! A [`RuntimeConfig`] decides two policies that the graph itself cannot
//! infer: who drives the deferred effect flush, and what happens when an
//! effect panics in the middle of a flush.
//!
//! The config is plain data and deserializes with every field optional, so
//! an embedding application can keep it next to its own settings:
//!
//! ```rust,ignore
//! let config: RuntimeConfig = serde_json::from_str(r#"{ "flush_mode": "local" }"#)?;
//! let rt = Runtime::with_config(config);
//! ```

use serde::{Deserialize, Serialize};

/// How the deferred effect flush gets executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// The owner calls [`Runtime::flush`](crate::Runtime::flush) when it is
    /// ready to run queued effects.
    #[default]
    Manual,

    /// A flush task is spawned on the current `tokio::task::LocalSet` the
    /// first time the queue becomes non-empty.
    ///
    /// Writes made before that task gets polled are coalesced into the same
    /// flush. Requires the runtime to be used from inside a `LocalSet`.
    Local,
}

/// What a flush does when an effect body panics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Log the panic, count it in the flush report and keep running the
    /// rest of the batch.
    #[default]
    Isolate,

    /// Stop the flush and resume the panic. Effects still in the queue are
    /// left for the next flush.
    Abort,
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Who drives the deferred flush.
    pub flush_mode: FlushMode,

    /// Failure policy for effects during a flush.
    pub effect_panics: PanicPolicy,
}

impl RuntimeConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flush mode.
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Set the effect panic policy.
    pub fn effect_panics(mut self, policy: PanicPolicy) -> Self {
        self.effect_panics = policy;
        self
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_manual_and_isolating() {
        let config = RuntimeConfig::default();
        assert_eq!(config.flush_mode, FlushMode::Manual);
        assert_eq!(config.effect_panics, PanicPolicy::Isolate);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{ "flush_mode": "local" }"#).unwrap();
        assert_eq!(config.flush_mode, FlushMode::Local);
        assert_eq!(config.effect_panics, PanicPolicy::Isolate);

        let empty: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RuntimeConfig::default());
    }

    #[test]
    fn builder_sets_fields() {
        let config = RuntimeConfig::new()
            .flush_mode(FlushMode::Local)
            .effect_panics(PanicPolicy::Abort);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"local\""));
        assert!(json.contains("\"abort\""));
    }
}
