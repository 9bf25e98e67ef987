//! Monitoring for the flowsync engine: structured logging setup and
//! engine metrics.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

pub mod logging;
pub mod metrics;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log level filter used when `RUST_LOG` is unset (e.g. "info,flowsync_core=debug")
    pub log_filter: String,
    /// Emit JSON instead of pretty logs
    pub enable_json_logging: bool,
    /// Record engine metrics
    pub enable_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "flowsync".to_string(),
            log_filter: "info".to_string(),
            enable_json_logging: false,
            enable_metrics: true,
        }
    }
}

impl MonitoringConfig {
    /// Defaults overridden by `FLOWSYNC_SERVICE_NAME`, `FLOWSYNC_LOG_FILTER`,
    /// `FLOWSYNC_LOG_JSON` and `FLOWSYNC_METRICS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = env::var("FLOWSYNC_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(filter) = env::var("FLOWSYNC_LOG_FILTER") {
            config.log_filter = filter;
        }
        if let Ok(json) = env::var("FLOWSYNC_LOG_JSON") {
            match json.parse() {
                Ok(v) => config.enable_json_logging = v,
                Err(_) => warn!("Invalid FLOWSYNC_LOG_JSON value: {}", json),
            }
        }
        if let Ok(enabled) = env::var("FLOWSYNC_METRICS") {
            match enabled.parse() {
                Ok(v) => config.enable_metrics = v,
                Err(_) => warn!("Invalid FLOWSYNC_METRICS value: {}", enabled),
            }
        }

        config
    }
}

/// Initialize monitoring system
pub fn init(config: &MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(config)?;
    info!(
        service_name = %config.service_name,
        metrics = config.enable_metrics,
        "Monitoring initialized"
    );
    Ok(())
}

/// Engine metrics listener when metrics are enabled
///
/// Pass the result to `FlowCacheBuilder::listener`.
pub fn engine_metrics(config: &MonitoringConfig) -> Option<std::sync::Arc<EngineMetrics>> {
    config.enable_metrics.then(EngineMetrics::new)
}


// Exported types
pub use crate::metrics::*;
