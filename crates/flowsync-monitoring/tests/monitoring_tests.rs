use flowsync_core::{
    CoreError, DataStoreField, DataStoreSchema, FieldType, Flow, FlowCache, FlowCacheConfig, FlowId,
};
use flowsync_monitoring::{EngineMetrics, MetricsConflictSink, MonitoringConfig, MutationTally};
use flowsync_state_inmemory::InMemoryPersistenceService;
use serde_json::json;
use std::sync::Arc;

fn config() -> FlowCacheConfig {
    FlowCacheConfig {
        background_refetch: false,
        ..FlowCacheConfig::default()
    }
}

fn schema(default: &str) -> DataStoreSchema {
    DataStoreSchema {
        fields: vec![DataStoreField {
            name: "tier".to_string(),
            field_type: FieldType::String,
            default_value: json!(default),
        }],
    }
}

#[test]
fn test_from_env_ignores_invalid_values() {
    std::env::set_var("FLOWSYNC_LOG_JSON", "sometimes");
    std::env::set_var("FLOWSYNC_SERVICE_NAME", "flow-editor");
    let config = MonitoringConfig::from_env();
    std::env::remove_var("FLOWSYNC_LOG_JSON");
    std::env::remove_var("FLOWSYNC_SERVICE_NAME");

    assert_eq!(config.service_name, "flow-editor");
    assert!(!config.enable_json_logging);
}

#[tokio::test]
async fn test_engine_metrics_observe_pipeline() -> Result<(), CoreError> {
    let service = Arc::new(
        InMemoryPersistenceService::with_documents(vec![Flow::new(FlowId::new("flow-1"), "Intake")])
            .await,
    );
    let metrics = EngineMetrics::new();
    let cache = FlowCache::builder(service.clone())
        .config(config())
        .listener(metrics.clone())
        .conflict_sink(MetricsConflictSink::new())
        .build()?;
    let id = FlowId::new("flow-1");
    cache.load(&id).await?;

    cache.set_data_store_schema(&id, schema("free")).await?;
    service
        .fail_next(CoreError::TransportError("offline".to_string()))
        .await;
    assert!(cache.set_data_store_schema(&id, schema("pro")).await.is_err());

    assert_eq!(
        metrics.tally(),
        MutationTally {
            committed: 1,
            rolled_back: 1
        }
    );
    Ok(())
}
