use flowsync_core::{CoreError, EditField, FlowId, NodeId, NodeType, ViewKey, ViewValue};
use flowsync_tests::Harness;
use flowsync_test_utils::{settle, FlowBuilder};
use serde_json::json;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(500);

async fn harness() -> Result<(Harness, FlowId), CoreError> {
    let flow = FlowBuilder::new("flow-1")
        .name("Lead intake")
        .titled_node("A", NodeType::Agent, Some("Start"))
        .node("B", NodeType::Agent)
        .build();
    let harness = Harness::new(vec![flow]).await?;
    let id = FlowId::new("flow-1");
    harness.cache.load(&id).await?;
    Ok((harness, id))
}

fn detail_name(harness: &Harness, id: &FlowId) -> Option<String> {
    harness
        .cache
        .peek_view(&ViewKey::detail(id))
        .and_then(|v| v.as_flow().map(|f| f.name.clone()))
}

#[tokio::test]
async fn rapid_title_edits_persist_only_the_last_value() -> Result<(), CoreError> {
    let (harness, id) = harness().await?;
    let node = NodeId::new("A");
    let field = EditField::NodeTitle(node.clone());

    let first = harness.cache.edit_node_title(&id, &node, "X");
    assert!(first.is_editing);
    harness.clock.advance(Duration::from_millis(150)).await;
    let second = harness.cache.edit_node_title(&id, &node, "Y");
    assert!(second.is_editing);
    assert_eq!(first.mutation_id, second.mutation_id);

    let title = |h: &Harness| {
        h.cache
            .peek_view(&ViewKey::detail(&id))
            .and_then(|v| v.as_flow().and_then(|f| f.node(&node)).and_then(|n| n.title().map(str::to_string)))
    };
    assert_eq!(title(&harness).as_deref(), Some("Y"));

    harness.clock.advance(QUIET - Duration::from_millis(1)).await;
    assert!(harness.cache.is_editing(&id, field.clone()));
    assert!(harness.store.journal().calls().await.is_empty());

    harness.clock.advance(Duration::from_millis(1)).await;
    let committed = second.committed().await?;
    assert_eq!(committed.as_node().and_then(|n| n.title()), Some("Y"));
    // Both keystrokes are covered by the same flush
    assert!(first.committed().await.is_ok());

    let calls = harness.store.journal().calls_to("update_node_data").await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload, json!({ "title": "Y" }));
    assert!(!harness.cache.is_editing(&id, field));
    assert_eq!(harness.outcomes.committed_operations(), vec!["update_node_title"]);
    Ok(())
}

#[tokio::test]
async fn each_edit_restarts_the_quiet_period() -> Result<(), CoreError> {
    let (harness, id) = harness().await?;

    let mut last = None;
    for (i, name) in ["L", "Le", "Lea", "Lead", "Leads"].iter().enumerate() {
        let receipt = harness.cache.edit_name(&id, name);
        assert!(receipt.is_editing, "edit {} should report editing", i);
        last = Some(receipt);
        harness.clock.advance(Duration::from_millis(400)).await;
        assert!(harness.cache.is_editing(&id, EditField::FlowName));
    }
    assert!(harness.store.journal().calls().await.is_empty());
    assert_eq!(detail_name(&harness, &id).as_deref(), Some("Leads"));

    harness.clock.advance(Duration::from_millis(100)).await;
    last.unwrap().committed().await?;

    let calls = harness.store.journal().calls_to("update_name").await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].payload, json!("Leads"));
    assert!(!harness.cache.is_editing(&id, EditField::FlowName));
    Ok(())
}

#[tokio::test]
async fn rejected_flush_restores_value_from_before_the_session() -> Result<(), CoreError> {
    let (harness, id) = harness().await?;
    let before = harness.cache.views().state(&ViewKey::detail(&id));

    harness.cache.edit_name(&id, "Lead");
    let receipt = harness.cache.edit_name(&id, "   ");
    harness.clock.advance(QUIET).await;

    let err = receipt.committed().await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(harness.cache.views().state(&ViewKey::detail(&id)), before);
    assert_eq!(detail_name(&harness, &id).as_deref(), Some("Lead intake"));
    assert!(!harness.cache.is_editing(&id, EditField::FlowName));
    Ok(())
}

#[tokio::test]
async fn stale_views_are_not_refetched_while_editing() -> Result<(), CoreError> {
    let (harness, id) = harness().await?;
    let receipt = harness.cache.edit_description(&id, Some("Routes leads"));

    // Someone else wrote the stored copy; our view goes stale
    let mut elsewhere = harness.stored(&id).await.unwrap();
    elsewhere.name = "Renamed elsewhere".to_string();
    harness.store.insert(elsewhere).await;
    harness.cache.views().invalidate(&ViewKey::detail(&id));

    let value = harness.cache.read_view(&ViewKey::detail(&id)).await?;
    settle().await;
    assert_eq!(value.as_flow().map(|f| f.name.as_str()), Some("Lead intake"));
    assert_eq!(detail_name(&harness, &id).as_deref(), Some("Lead intake"));
    assert_eq!(
        harness.cache.refresh(&id).await?,
        0,
        "refresh must skip views under an active edit session"
    );

    harness.clock.advance(QUIET).await;
    receipt.committed().await?;
    assert_eq!(harness.cache.refresh(&id).await?, 1);
    match harness.cache.peek_view(&ViewKey::detail(&id)) {
        Some(ViewValue::Detail(flow)) => {
            assert_eq!(flow.name, "Renamed elsewhere");
            assert_eq!(flow.description.as_deref(), Some("Routes leads"));
        }
        other => panic!("unexpected view {:?}", other),
    }
    Ok(())
}
