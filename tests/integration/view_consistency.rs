use flowsync_core::domain::flow::data_keys;
use flowsync_core::{
    CoreError, DataStoreSchema, FieldType, FlowId, NodeData, NodeId, NodeType, ViewKey, ViewValue,
};
use flowsync_tests::Harness;
use flowsync_test_utils::FlowBuilder;
use serde_json::json;

fn title(title: &str) -> NodeData {
    let mut patch = NodeData::new();
    patch.insert(data_keys::TITLE.to_string(), json!(title));
    patch
}

fn node_title(value: Option<ViewValue>, node: &NodeId) -> Option<String> {
    match value? {
        ViewValue::Detail(flow) => flow.node(node)?.title().map(str::to_string),
        ViewValue::Nodes(nodes) => nodes
            .iter()
            .find(|n| &n.id == node)?
            .title()
            .map(str::to_string),
        ViewValue::Node(n) => n.title().map(str::to_string),
        _ => None,
    }
}

async fn harness() -> Result<(Harness, FlowId, NodeId), CoreError> {
    let flow = FlowBuilder::new("flow-1")
        .titled_node("a", NodeType::Agent, Some("Greeter"))
        .node("b", NodeType::Agent)
        .store_field("tier", FieldType::String, json!("free"))
        .build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-1");
    let node = NodeId::new("a");

    harness.cache.load(&id).await?;
    harness.cache.read_view(&ViewKey::nodes(&id)).await?;
    harness.cache.read_view(&ViewKey::node(&id, &node)).await?;
    Ok((harness, id, node))
}

#[tokio::test]
async fn committed_write_reaches_every_materialized_view() -> Result<(), CoreError> {
    let (harness, id, node) = harness().await?;

    harness
        .cache
        .update_node_data(&id, &node, title("Welcomer"))
        .await?;

    for key in [ViewKey::detail(&id), ViewKey::nodes(&id), ViewKey::node(&id, &node)] {
        assert_eq!(
            node_title(harness.cache.peek_view(&key), &node).as_deref(),
            Some("Welcomer"),
            "view {} disagrees",
            key
        );
        // Kept as stale-while-revalidate
        assert!(harness.cache.views().state(&key).map(|v| v.stale).unwrap_or(false));
    }
    assert_eq!(
        harness.stored(&id).await.and_then(|f| f.node(&node).and_then(|n| n.title().map(str::to_string))),
        Some("Welcomer".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn failed_write_restores_every_touched_view_exactly() -> Result<(), CoreError> {
    let (harness, id, _) = harness().await?;
    harness.cache.read_view(&ViewKey::schema(&id)).await?;
    let keys = [ViewKey::detail(&id), ViewKey::schema(&id)];
    let before: Vec<_> = keys.iter().map(|k| harness.cache.views().state(k)).collect();

    harness
        .store
        .fail_next_on("update_data_store_schema", CoreError::TransportError("reset".to_string()))
        .await;
    let err = harness
        .cache
        .set_data_store_schema(&id, DataStoreSchema::default())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::TransportError(_)));
    let after: Vec<_> = keys.iter().map(|k| harness.cache.views().state(k)).collect();
    assert_eq!(before, after);
    assert_eq!(harness.outcomes.rolled_back_operations(), vec!["update_data_store_schema"]);
    Ok(())
}

#[tokio::test]
async fn rollback_of_earlier_write_keeps_later_write_to_same_field() -> Result<(), CoreError> {
    let (harness, id, node) = harness().await?;
    harness.gate.close();

    let first = {
        let cache = harness.cache.clone();
        let (id, node) = (id.clone(), node.clone());
        tokio::spawn(async move { cache.update_node_data(&id, &node, title("One")).await })
    };
    harness.gate.wait_for_waiting(1).await;
    let second = {
        let cache = harness.cache.clone();
        let (id, node) = (id.clone(), node.clone());
        tokio::spawn(async move { cache.update_node_data(&id, &node, title("Two")).await })
    };
    harness.gate.wait_for_waiting(2).await;

    // Last write wins in the cache, and the overlap is reported
    assert_eq!(
        node_title(harness.cache.peek_view(&ViewKey::node(&id, &node)), &node).as_deref(),
        Some("Two")
    );
    assert_eq!(harness.conflicts.count(), 1);
    assert!(!harness.conflicts.reports()[0].racing_committed);

    harness
        .store
        .fail_next_on("update_node_data", CoreError::ValidationError("rejected".to_string()))
        .await;
    harness.gate.release(1);
    assert!(first.await.unwrap().is_err());

    for key in [ViewKey::detail(&id), ViewKey::nodes(&id), ViewKey::node(&id, &node)] {
        assert_eq!(node_title(harness.cache.peek_view(&key), &node).as_deref(), Some("Two"));
    }

    harness.gate.open();
    second.await.unwrap()?;
    assert_eq!(
        node_title(harness.cache.peek_view(&ViewKey::detail(&id)), &node).as_deref(),
        Some("Two")
    );
    Ok(())
}

#[tokio::test]
async fn writes_to_unread_views_do_not_materialize_them() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("flow-2").node("a", NodeType::Agent).build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-2");
    harness.cache.load(&id).await?;

    harness
        .cache
        .update_node_data(&id, &NodeId::new("a"), title("Only detail"))
        .await?;

    assert!(harness.cache.peek_view(&ViewKey::nodes(&id)).is_none());
    assert!(harness.cache.peek_view(&ViewKey::node(&id, &NodeId::new("a"))).is_none());
    Ok(())
}
