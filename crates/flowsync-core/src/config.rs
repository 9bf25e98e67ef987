//! Configuration for the flow cache
//!
//! Defaults can be overridden from `FLOWSYNC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::CoreError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCacheConfig {
    /// Quiet period after the last edit before an edit session flushes
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,

    /// How long committed ledger entries stay visible to conflict checks
    #[serde(default = "default_ledger_retention_ms")]
    pub ledger_retention_ms: u64,

    /// Idle time after which an unobserved document's views are evicted
    #[serde(default = "default_document_retention_ms")]
    pub document_retention_ms: u64,

    /// Maximum number of documents with materialized views
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    /// Refetch touched views in the background after a commit
    #[serde(default = "default_background_refetch")]
    pub background_refetch: bool,
}

fn default_quiet_period_ms() -> u64 {
    500
}

fn default_ledger_retention_ms() -> u64 {
    1000
}

fn default_document_retention_ms() -> u64 {
    5 * 60 * 1000 // 5 minutes
}

fn default_max_documents() -> usize {
    64
}

fn default_background_refetch() -> bool {
    true
}

impl Default for FlowCacheConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: default_quiet_period_ms(),
            ledger_retention_ms: default_ledger_retention_ms(),
            document_retention_ms: default_document_retention_ms(),
            max_documents: default_max_documents(),
            background_refetch: default_background_refetch(),
        }
    }
}

impl FlowCacheConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn load() -> Result<Self, CoreError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u64>("FLOWSYNC_QUIET_PERIOD_MS") {
            config.quiet_period_ms = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWSYNC_LEDGER_RETENTION_MS") {
            config.ledger_retention_ms = v;
        }
        if let Some(v) = env_parse::<u64>("FLOWSYNC_DOCUMENT_RETENTION_MS") {
            config.document_retention_ms = v;
        }
        if let Some(v) = env_parse::<usize>("FLOWSYNC_MAX_DOCUMENTS") {
            config.max_documents = v;
        }
        if let Some(v) = env_parse::<bool>("FLOWSYNC_BACKGROUND_REFETCH") {
            config.background_refetch = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.quiet_period_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "quiet_period_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_documents == 0 {
            return Err(CoreError::ConfigurationError(
                "max_documents must be greater than zero".to_string(),
            ));
        }
        if self.document_retention_ms == 0 {
            return Err(CoreError::ConfigurationError(
                "document_retention_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Quiet period as a duration
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Ledger retention as a duration
    pub fn ledger_retention(&self) -> Duration {
        Duration::from_millis(self.ledger_retention_ms)
    }

    /// Document retention as a duration
    pub fn document_retention(&self) -> Duration {
        Duration::from_millis(self.document_retention_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Invalid {} value: {}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = FlowCacheConfig::default();
        assert_eq!(config.quiet_period(), Duration::from_millis(500));
        assert_eq!(config.max_documents, 64);
        assert!(config.background_refetch);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: FlowCacheConfig =
            serde_json::from_str(r#"{"quiet_period_ms": 250}"#).unwrap();
        assert_eq!(config.quiet_period_ms, 250);
        assert_eq!(config.ledger_retention_ms, 1000);
    }

    #[test]
    fn test_validate_rejects_zero_quiet_period() {
        let config = FlowCacheConfig {
            quiet_period_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::ConfigurationError(_))
        ));
    }
}
