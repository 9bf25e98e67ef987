//! Record of every write call received

use chrono::{DateTime, Utc};
use flowsync_core::FlowId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One write call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCall {
    /// Operation name, e.g. `update_name`
    pub operation: String,
    /// Target document
    pub flow_id: FlowId,
    /// Arguments as received
    pub payload: Value,
    /// Whether the call succeeded
    pub succeeded: bool,
    /// When the call completed
    pub at: DateTime<Utc>,
}

/// Append-only, shareable list of write calls
#[derive(Debug, Clone, Default)]
pub struct WriteJournal {
    calls: Arc<RwLock<Vec<WriteCall>>>,
}

impl WriteJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call
    pub async fn record(&self, operation: &str, flow_id: &FlowId, payload: Value, succeeded: bool) {
        self.calls.write().await.push(WriteCall {
            operation: operation.to_string(),
            flow_id: flow_id.clone(),
            payload,
            succeeded,
            at: Utc::now(),
        });
    }

    /// Every call so far, oldest first
    pub async fn calls(&self) -> Vec<WriteCall> {
        self.calls.read().await.clone()
    }

    /// Calls of one operation, oldest first
    pub async fn calls_to(&self, operation: &str) -> Vec<WriteCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Forget every call
    pub async fn clear(&self) {
        self.calls.write().await.clear();
    }
}
