use flowsync_core::domain::structural;
use flowsync_core::{
    CoreError, DataStoreSchema, EdgeSpec, FlowId, NodeId, NodeSpec, NodeType, Position,
    ReadinessState, ViewKey, ViewValue,
};
use flowsync_tests::Harness;
use flowsync_test_utils::FlowBuilder;

fn readiness(harness: &Harness, id: &FlowId) -> Option<ReadinessState> {
    harness
        .cache
        .peek_view(&ViewKey::detail(id))
        .and_then(|v| v.readiness())
}

fn edges(harness: &Harness, id: &FlowId) -> Vec<flowsync_core::Edge> {
    match harness.cache.peek_view(&ViewKey::detail(id)) {
        Some(ViewValue::Detail(flow)) => flow.edges,
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn add_edge_duplicate_then_cascade_remove() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("flow-1")
        .node("A", NodeType::Agent)
        .node("B", NodeType::Agent)
        .build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-1");
    let (a, b) = (NodeId::new("A"), NodeId::new("B"));
    harness.cache.load(&id).await?;
    harness.cache.read_view(&ViewKey::edges(&id)).await?;

    let edge = harness
        .cache
        .add_edge(&id, EdgeSpec::new(a.clone(), b.clone()))
        .await?;
    assert_eq!((edge.source.clone(), edge.target.clone()), (a.clone(), b.clone()));

    let err = harness
        .cache
        .add_edge(&id, EdgeSpec::new(a.clone(), b.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Duplicate(_)));
    assert_eq!(edges(&harness, &id), vec![edge.clone()]);
    // Rejected before any write was issued
    assert_eq!(harness.store.journal().calls().await.len(), 1);

    harness.cache.remove_node(&id, &a).await?;
    assert!(edges(&harness, &id).is_empty());
    assert_eq!(
        harness.cache.peek_view(&ViewKey::edges(&id)),
        Some(ViewValue::Edges(Vec::new()))
    );

    let stored = harness.stored(&id).await.unwrap();
    assert!(stored.edges.is_empty());
    assert_eq!(stored.nodes.len(), 1);
    Ok(())
}

#[test]
fn remove_node_leaves_no_edge_touching_it() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("dense")
        .node("hub", NodeType::Plain)
        .node("x", NodeType::Agent)
        .node("y", NodeType::Agent)
        .node("z", NodeType::Agent)
        .edge("hub", "x")
        .edge("y", "hub")
        .edge("hub", "z")
        .edge("x", "y")
        .edge("hub", "hub")
        .build();
    let hub = NodeId::new("hub");

    let (graph, _) = structural::remove_node(&flow.graph(), &hub)?;

    assert!(graph.edges.iter().all(|e| e.source != hub && e.target != hub));
    assert_eq!(graph.edges.len(), 1);
    assert!(!graph.contains_node(&hub));
    Ok(())
}

#[test]
fn duplicate_edge_leaves_graph_unchanged() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("g")
        .node("a", NodeType::If)
        .node("b", NodeType::Agent)
        .build();
    let spec = || EdgeSpec::new(NodeId::new("a"), NodeId::new("b")).with_handles(Some("true"), None);

    let (graph, _) = structural::add_edge(&flow.graph(), spec())?;
    let err = structural::add_edge(&graph, spec()).unwrap_err();
    assert!(matches!(err, CoreError::Duplicate(_)));
    assert_eq!(graph.edges.len(), 1);

    // A different handle is a different connection
    let other = EdgeSpec::new(NodeId::new("a"), NodeId::new("b")).with_handles(Some("false"), None);
    assert!(structural::add_edge(&graph, other).is_ok());
    Ok(())
}

#[tokio::test]
async fn structural_edit_drops_ready_to_draft_before_persistence() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("flow-1")
        .node("A", NodeType::Agent)
        .readiness(ReadinessState::Ready)
        .build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-1");
    harness.cache.load(&id).await?;
    assert_eq!(readiness(&harness, &id), Some(ReadinessState::Ready));

    harness.gate.close();
    let pending = {
        let cache = harness.cache.clone();
        let id = id.clone();
        tokio::spawn(async move {
            cache
                .add_node(&id, NodeSpec::new(NodeType::Agent, Position::new(0.0, 200.0)))
                .await
        })
    };
    harness.gate.wait_for_waiting(1).await;

    assert_eq!(readiness(&harness, &id), Some(ReadinessState::Draft));
    assert!(harness.stored(&id).await.unwrap().readiness == ReadinessState::Ready);

    harness.gate.open();
    let node = pending.await.unwrap()?;
    let stored = harness.stored(&id).await.unwrap();
    assert_eq!(stored.readiness, ReadinessState::Draft);
    assert!(stored.node(&node.id).is_some());
    Ok(())
}

#[tokio::test]
async fn rollback_under_pending_structural_edit_keeps_draft() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("flow-1")
        .node("A", NodeType::Agent)
        .node("B", NodeType::Agent)
        .readiness(ReadinessState::Ready)
        .build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-1");
    harness.cache.load(&id).await?;
    harness.cache.read_view(&ViewKey::validation(&id)).await?;

    harness.gate.close();
    let schema_write = {
        let cache = harness.cache.clone();
        let id = id.clone();
        tokio::spawn(async move { cache.set_data_store_schema(&id, DataStoreSchema::default()).await })
    };
    harness.gate.wait_for_waiting(1).await;
    let edge_write = {
        let cache = harness.cache.clone();
        let id = id.clone();
        tokio::spawn(async move {
            cache
                .add_edge(&id, EdgeSpec::new(NodeId::new("A"), NodeId::new("B")))
                .await
        })
    };
    harness.gate.wait_for_waiting(2).await;

    harness
        .store
        .fail_next_on("update_data_store_schema", CoreError::TransportError("reset".to_string()))
        .await;
    harness.gate.release(1);
    assert!(schema_write.await.unwrap().is_err());

    // The edge is still pending, so the document cannot be Ready again
    assert_eq!(edges(&harness, &id).len(), 1);
    assert_eq!(readiness(&harness, &id), Some(ReadinessState::Draft));
    assert_eq!(
        harness
            .cache
            .peek_view(&ViewKey::validation(&id))
            .and_then(|v| v.readiness()),
        Some(ReadinessState::Draft)
    );

    harness.gate.open();
    edge_write.await.unwrap()?;
    assert_eq!(readiness(&harness, &id), Some(ReadinessState::Draft));
    Ok(())
}

#[tokio::test]
async fn failed_structural_write_restores_readiness_and_graph() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("flow-1")
        .node("A", NodeType::Agent)
        .node("B", NodeType::Agent)
        .edge("A", "B")
        .readiness(ReadinessState::Ready)
        .build();
    let harness = Harness::new(vec![flow.clone()]).await?;
    let id = FlowId::new("flow-1");
    harness.cache.load(&id).await?;

    harness
        .store
        .fail_next(CoreError::ConflictError("graph diverged".to_string()))
        .await;
    let err = harness.cache.remove_node(&id, &NodeId::new("A")).await.unwrap_err();

    assert!(matches!(err, CoreError::ConflictError(_)));
    assert_eq!(harness.cache.peek_view(&ViewKey::detail(&id)), Some(ViewValue::Detail(flow)));
    Ok(())
}

#[tokio::test]
async fn missing_endpoint_fails_without_touching_views() -> Result<(), CoreError> {
    let flow = FlowBuilder::new("flow-1").node("A", NodeType::Agent).build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-1");
    let loaded = harness.cache.load(&id).await?;

    let err = harness
        .cache
        .add_edge(&id, EdgeSpec::new(NodeId::new("A"), NodeId::new("ghost")))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound(_)));
    assert_eq!(harness.cache.peek_view(&ViewKey::detail(&id)), Some(ViewValue::Detail(loaded)));
    assert!(harness.outcomes.outcomes().is_empty());
    Ok(())
}
