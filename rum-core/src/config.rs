//! Configuration for the RUM core
//!
//! All durations are serialized as integer milliseconds (`*_ms`) and exposed
//! as [`chrono::Duration`] through accessor methods, since command timestamps
//! are `chrono` values.
//!
//! ```rust
//! use rum_core::config::{RumConfig, SessionConfig, OrphanPolicy};
//!
//! let config = RumConfig::new("my-app")
//!     .with_session(SessionConfig::new().inactivity_timeout_ms(60_000))
//!     .with_orphan_policy(OrphanPolicy::Drop);
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RumError};
use crate::identifier::HighWordMode;

/// Upper bound for any configured duration (30 days)
const MAX_DURATION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

fn default_inactivity_timeout_ms() -> u64 { 15 * 60 * 1000 }
fn default_max_duration_ms() -> u64 { 4 * 60 * 60 * 1000 }
fn default_sample_rate() -> f64 { 100.0 }
fn default_low_min() -> u64 { 1 }
fn default_low_max() -> u64 { i64::MAX as u64 }
fn default_queue_capacity() -> Option<usize> { Some(1024) }
fn default_max_pending_spans() -> usize { 1024 }

/// Session lifecycle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Time since the last processed command after which the session expires
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    /// Time since session start after which the session expires
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Percentage of sessions whose events are emitted (0.0 - 100.0)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Let actions, resources, errors and long tasks start a session, not only views
    #[serde(default)]
    pub start_on_any_activity: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            max_duration_ms: default_max_duration_ms(),
            sample_rate: default_sample_rate(),
            start_on_any_activity: false,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inactivity_timeout_ms(mut self, ms: u64) -> Self {
        self.inactivity_timeout_ms = ms;
        self
    }

    pub fn max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration_ms = ms;
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn start_on_any_activity(mut self, enabled: bool) -> Self {
        self.start_on_any_activity = enabled;
        self
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::milliseconds(self.inactivity_timeout_ms.min(MAX_DURATION_MS) as i64)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::milliseconds(self.max_duration_ms.min(MAX_DURATION_MS) as i64)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("inactivity_timeout_ms", self.inactivity_timeout_ms),
            ("max_duration_ms", self.max_duration_ms),
        ] {
            if value == 0 || value > MAX_DURATION_MS {
                return Err(RumError::InvalidConfig {
                    reason: format!("{} must be in 1..={}, got {}", name, MAX_DURATION_MS, value),
                });
            }
        }
        if !(0.0..=100.0).contains(&self.sample_rate) {
            return Err(RumError::InvalidConfig {
                reason: format!("sample_rate must be within 0..=100, got {}", self.sample_rate),
            });
        }
        Ok(())
    }
}

/// Identifier generation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierConfig {
    /// Inclusive lower bound of the low word
    #[serde(default = "default_low_min")]
    pub low_min: u64,

    /// Inclusive upper bound of the low word
    #[serde(default = "default_low_max")]
    pub low_max: u64,

    /// How the high word is filled
    #[serde(default)]
    pub high_word: HighWordMode,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            low_min: default_low_min(),
            low_max: default_low_max(),
            high_word: HighWordMode::Zero,
        }
    }
}

impl IdentifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn low_range(mut self, min: u64, max: u64) -> Self {
        self.low_min = min;
        self.low_max = max;
        self
    }

    pub fn high_word(mut self, mode: HighWordMode) -> Self {
        self.high_word = mode;
        self
    }

    /// The range must be non-empty and contain at least one non-zero value
    pub fn validate(&self) -> Result<()> {
        if self.low_min > self.low_max {
            return Err(RumError::InvalidConfig {
                reason: format!("identifier range is empty: {} > {}", self.low_min, self.low_max),
            });
        }
        if self.low_max == 0 {
            return Err(RumError::InvalidConfig {
                reason: "identifier range contains only the zero sentinel".to_string(),
            });
        }
        Ok(())
    }
}

/// What to do with an action, resource, error or long task that names no
/// live view (or arrives while no view is active)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Drop the command
    Drop,
    /// Route to the active view; with none active, attribute to the most
    /// recently stopped view of the session without touching counters
    #[default]
    AttachToLastView,
    /// Open a synthetic background view and route to it
    BackgroundView,
}

/// Top-level RUM configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RumConfig {
    /// RUM application identifier carried by every context snapshot
    pub application_id: String,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionConfig,

    /// Identifier generation
    #[serde(default)]
    pub identifiers: IdentifierConfig,

    /// Routing policy for commands with no matching view
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,

    /// Bounded queue capacity; `None` for an unbounded queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: Option<usize>,

    /// Started, not yet stopped spans kept at once; the oldest is dropped beyond this
    #[serde(default = "default_max_pending_spans")]
    pub max_pending_spans: usize,
}

impl RumConfig {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            session: SessionConfig::default(),
            identifiers: IdentifierConfig::default(),
            orphan_policy: OrphanPolicy::default(),
            queue_capacity: default_queue_capacity(),
            max_pending_spans: default_max_pending_spans(),
        }
    }

    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn with_identifiers(mut self, identifiers: IdentifierConfig) -> Self {
        self.identifiers = identifiers;
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_pending_spans(mut self, max: usize) -> Self {
        self.max_pending_spans = max;
        self
    }

    /// Load from a JSON document; missing sections take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RumConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.application_id.trim().is_empty() {
            return Err(RumError::InvalidConfig {
                reason: "application_id must not be empty".to_string(),
            });
        }
        if self.queue_capacity == Some(0) {
            return Err(RumError::InvalidConfig {
                reason: "queue_capacity must be positive (use null for unbounded)".to_string(),
            });
        }
        if self.max_pending_spans == 0 {
            return Err(RumError::InvalidConfig {
                reason: "max_pending_spans must be positive".to_string(),
            });
        }
        self.session.validate()?;
        self.identifiers.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RumConfig::new("app");
        assert_eq!(config.session.inactivity_timeout(), Duration::minutes(15));
        assert_eq!(config.session.max_duration(), Duration::hours(4));
        assert_eq!(config.identifiers.low_min, 1);
        assert_eq!(config.identifiers.low_max, (1u64 << 63) - 1);
        assert_eq!(config.orphan_policy, OrphanPolicy::AttachToLastView);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_builder() {
        let session = SessionConfig::new()
            .inactivity_timeout_ms(1_000)
            .max_duration_ms(10_000)
            .sample_rate(50.0)
            .start_on_any_activity(true);

        assert_eq!(session.inactivity_timeout(), Duration::seconds(1));
        assert_eq!(session.max_duration(), Duration::seconds(10));
        assert!(session.start_on_any_activity);
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(RumConfig::new("  ").validate().is_err());
        assert!(RumConfig::new("app")
            .with_queue_capacity(Some(0))
            .validate()
            .is_err());
        assert!(RumConfig::new("app")
            .with_max_pending_spans(0)
            .validate()
            .is_err());
        assert!(RumConfig::new("app")
            .with_session(SessionConfig::new().sample_rate(101.0))
            .validate()
            .is_err());
        assert!(RumConfig::new("app")
            .with_session(SessionConfig::new().inactivity_timeout_ms(0))
            .validate()
            .is_err());
        assert!(RumConfig::new("app")
            .with_identifiers(IdentifierConfig::new().low_range(0, 0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_json_with_partial_sections() {
        let config = RumConfig::from_json_str(
            r#"{
                "application_id": "shop",
                "session": { "inactivity_timeout_ms": 5000 },
                "orphan_policy": "background_view",
                "queue_capacity": null
            }"#,
        )
        .unwrap();

        assert_eq!(config.application_id, "shop");
        assert_eq!(config.session.inactivity_timeout_ms, 5000);
        assert_eq!(config.session.max_duration_ms, default_max_duration_ms());
        assert_eq!(config.orphan_policy, OrphanPolicy::BackgroundView);
        assert_eq!(config.queue_capacity, None);
        assert_eq!(config.max_pending_spans, 1024);
        assert_eq!(config.identifiers.high_word, HighWordMode::Zero);
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        let err = RumConfig::from_json_str(r#"{ "application_id": "" }"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");

        let err = RumConfig::from_json_str("not json").unwrap_err();
        assert_eq!(err.error_code(), "JSON_ERROR");
    }
}
