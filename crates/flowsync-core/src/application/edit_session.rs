//! Per-field edit sessions with trailing-edge flush
//!
//! A session moves `Idle -> Editing` on the first edit of a field, stays in
//! `Editing` while edits keep arriving, moves to `Finalizing` once the quiet
//! period elapses without an edit and runs the last flush it was given, and
//! returns to `Idle` when the mutation pipeline settles that flush.
//!
//! Each editing round owns one [`MutationId`]. Every keystroke of the round
//! is written under that id, so the round rolls back as a unit.

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use super::view_store::ViewSnapshot;
use crate::domain::scheduler::{CancelToken, Scheduler};
use crate::domain::view_key::{ViewKey, ViewPath};
use crate::domain::view_update::ViewValue;
use crate::types::{FlowId, MutationId, NodeId};
use crate::CoreError;

/// Debounced text field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditField {
    /// Flow name
    FlowName,
    /// Flow description
    FlowDescription,
    /// Response template
    ResponseTemplate,
    /// A node's title
    NodeTitle(NodeId),
    /// An if-node's branch name
    IfNodeName(NodeId),
}

impl EditField {
    /// Views that display this field
    pub fn view_paths(&self) -> Vec<ViewPath> {
        match self {
            EditField::FlowName | EditField::FlowDescription | EditField::ResponseTemplate => {
                vec![ViewPath::Detail]
            }
            EditField::NodeTitle(node_id) | EditField::IfNodeName(node_id) => vec![
                ViewPath::Detail,
                ViewPath::Nodes,
                ViewPath::Node(node_id.clone()),
            ],
        }
    }
}

impl fmt::Display for EditField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditField::FlowName => write!(f, "name"),
            EditField::FlowDescription => write!(f, "description"),
            EditField::ResponseTemplate => write!(f, "responseTemplate"),
            EditField::NodeTitle(id) => write!(f, "nodes/{}/title", id),
            EditField::IfNodeName(id) => write!(f, "nodes/{}/name", id),
        }
    }
}

/// Session identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EditSessionKey {
    /// Document
    pub flow_id: FlowId,
    /// Field being edited
    pub field: EditField,
}

impl EditSessionKey {
    /// Create a key
    pub fn new(flow_id: FlowId, field: EditField) -> Self {
        Self { flow_id, field }
    }
}

impl fmt::Display for EditSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_id, self.field)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditState {
    /// No edit in progress
    Idle,
    /// Edits arriving; quiet-period timer armed
    Editing,
    /// Last value handed to the pipeline, not yet settled
    Finalizing,
}

/// Editing round an edit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditRound {
    /// Mutation id shared by every edit of the round
    pub mutation_id: MutationId,
    /// This edit opened the round
    pub fresh: bool,
}

/// What a flush closure receives when the quiet period elapses
#[derive(Debug, Clone)]
pub struct EditFlush {
    /// Session being flushed
    pub key: EditSessionKey,
    /// Round mutation id
    pub mutation_id: MutationId,
    /// Snapshot taken when the round opened
    pub snapshot: Option<ViewSnapshot>,
}

/// Result of a flush
pub type FlushResult = Result<ViewValue, CoreError>;

/// Deferred persistence call for the last edited value
pub type FlushFn = Box<dyn FnOnce(EditFlush) -> BoxFuture<'static, FlushResult> + Send>;

/// Returned by every debounced edit
#[derive(Debug)]
pub struct EditReceipt {
    /// Whether the field is being edited; true right after an edit
    pub is_editing: bool,
    /// Round this edit belongs to
    pub mutation_id: MutationId,
    result: oneshot::Receiver<FlushResult>,
}

impl EditReceipt {
    /// Wait for the flush covering this edit
    pub async fn committed(self) -> FlushResult {
        self.result
            .await
            .unwrap_or_else(|_| Err(CoreError::Other("Edit session dropped before flushing".to_string())))
    }
}

struct Session {
    state: EditState,
    epoch: u64,
    round: Option<MutationId>,
    snapshot: Option<ViewSnapshot>,
    finalizing: Option<MutationId>,
    cancel: CancelToken,
    // FlushFn is Send but not Sync
    flush: Mutex<Option<FlushFn>>,
    waiters: Vec<oneshot::Sender<FlushResult>>,
}

impl Session {
    fn idle() -> Self {
        Self {
            state: EditState::Idle,
            epoch: 0,
            round: None,
            snapshot: None,
            finalizing: None,
            cancel: CancelToken::new(),
            flush: Mutex::new(None),
            waiters: Vec::new(),
        }
    }
}

/// Registry of edit sessions
pub struct EditSessions {
    sessions: DashMap<EditSessionKey, Session>,
    scheduler: Arc<dyn Scheduler>,
    quiet_period: Duration,
}

impl EditSessions {
    /// Create a registry flushing after `quiet_period` without edits
    pub fn new(quiet_period: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            sessions: DashMap::new(),
            scheduler,
            quiet_period,
        }
    }

    /// Current state of a session
    pub fn state(&self, key: &EditSessionKey) -> EditState {
        self.sessions
            .get(key)
            .map(|s| s.state)
            .unwrap_or(EditState::Idle)
    }

    /// Whether the field is in `Editing` or `Finalizing`
    pub fn is_editing(&self, key: &EditSessionKey) -> bool {
        self.state(key) != EditState::Idle
    }

    /// Whether any active session displays its field in `view`
    pub fn is_editing_view(&self, view: &ViewKey) -> bool {
        self.sessions.iter().any(|entry| {
            entry.key().flow_id == view.flow_id
                && entry.state != EditState::Idle
                && entry.key().field.view_paths().contains(&view.path)
        })
    }

    /// Record an edit and cancel the pending quiet-period timer
    ///
    /// Opens a new round when the session is `Idle` or `Finalizing`.
    pub fn open(&self, key: &EditSessionKey) -> EditRound {
        let mut session = self.sessions.entry(key.clone()).or_insert_with(Session::idle);
        session.cancel.cancel();
        session.epoch += 1;

        match (session.state, session.round) {
            (EditState::Editing, Some(mutation_id)) => EditRound {
                mutation_id,
                fresh: false,
            },
            _ => {
                let mutation_id = MutationId::generate();
                session.state = EditState::Editing;
                session.round = Some(mutation_id);
                session.snapshot = None;
                debug!(session = %key, mutation_id = %mutation_id, "Edit session opened");
                EditRound {
                    mutation_id,
                    fresh: true,
                }
            }
        }
    }

    /// Attach the snapshot taken for a freshly opened round
    pub fn attach_snapshot(&self, key: &EditSessionKey, snapshot: ViewSnapshot) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            if session.round == Some(snapshot.mutation_id) {
                session.snapshot = Some(snapshot);
            }
        }
    }

    /// Replace the pending flush with `flush` and arm the quiet-period timer
    pub fn schedule(self: &Arc<Self>, key: &EditSessionKey, flush: FlushFn) -> EditReceipt {
        let (tx, rx) = oneshot::channel();

        let armed = match self.sessions.get_mut(key) {
            Some(mut session) => match session.round {
                Some(mutation_id) if session.state == EditState::Editing => {
                    *session.flush.get_mut() = Some(flush);
                    session.waiters.push(tx);
                    session.cancel = CancelToken::new();
                    Some((session.epoch, session.cancel.clone(), mutation_id))
                }
                _ => None,
            },
            None => None,
        };

        let Some((epoch, cancel, mutation_id)) = armed else {
            // Sender already dropped: the receipt resolves with an error
            return EditReceipt {
                is_editing: self.is_editing(key),
                mutation_id: MutationId::generate(),
                result: rx,
            };
        };

        let sessions = Arc::clone(self);
        let scheduler = Arc::clone(&self.scheduler);
        let quiet_period = self.quiet_period;
        let timer_key = key.clone();
        tokio::spawn(async move {
            if !scheduler.schedule(quiet_period, cancel).await {
                return;
            }
            let Some((flush, request, waiters)) = sessions.begin_finalize(&timer_key, epoch) else {
                return;
            };
            let result = flush(request).await;
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        });

        EditReceipt {
            is_editing: true,
            mutation_id,
            result: rx,
        }
    }

    /// Return a finalizing session to `Idle` once its flush has settled
    ///
    /// A session that received a new edit while finalizing stays `Editing`.
    pub fn settle(&self, key: &EditSessionKey, mutation_id: MutationId) {
        let idle = {
            let Some(mut session) = self.sessions.get_mut(key) else {
                return;
            };
            if session.finalizing != Some(mutation_id) {
                return;
            }
            session.finalizing = None;
            if session.state == EditState::Finalizing {
                session.state = EditState::Idle;
                true
            } else {
                false
            }
        };

        if idle {
            self.sessions
                .remove_if(key, |_, s| s.state == EditState::Idle && s.waiters.is_empty());
            debug!(session = %key, mutation_id = %mutation_id, "Edit session settled");
        }
    }

    fn begin_finalize(
        &self,
        key: &EditSessionKey,
        epoch: u64,
    ) -> Option<(FlushFn, EditFlush, Vec<oneshot::Sender<FlushResult>>)> {
        let mut session = self.sessions.get_mut(key)?;
        if session.epoch != epoch || session.state != EditState::Editing {
            return None;
        }
        let flush = session.flush.get_mut().take()?;
        let mutation_id = session.round.take()?;

        session.state = EditState::Finalizing;
        session.finalizing = Some(mutation_id);
        let snapshot = session.snapshot.take();
        let waiters = std::mem::take(&mut session.waiters);
        debug!(session = %key, mutation_id = %mutation_id, "Edit session finalizing");

        Some((
            flush,
            EditFlush {
                key: key.clone(),
                mutation_id,
                snapshot,
            },
            waiters,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::flow::Flow;
    use crate::domain::scheduler::TokioScheduler;
    use futures::FutureExt;

    fn sessions() -> Arc<EditSessions> {
        Arc::new(EditSessions::new(
            Duration::from_millis(500),
            Arc::new(TokioScheduler),
        ))
    }

    fn key() -> EditSessionKey {
        EditSessionKey::new(FlowId::new("f1"), EditField::FlowName)
    }

    fn recording_flush(
        sessions: &Arc<EditSessions>,
        calls: &Arc<Mutex<Vec<String>>>,
        value: &str,
    ) -> FlushFn {
        let sessions = Arc::clone(sessions);
        let calls = Arc::clone(calls);
        let value = value.to_string();
        Box::new(move |request: EditFlush| {
            async move {
                calls.lock().push(value.clone());
                sessions.settle(&request.key, request.mutation_id);
                Ok(ViewValue::Detail(Flow::new(FlowId::new("f1"), value)))
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_within_quiet_period_collapse_to_one_flush() {
        let sessions = sessions();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let key = key();

        let mut receipts = Vec::new();
        let mut round = None;
        for value in ["H", "He", "Hey"] {
            let opened = sessions.open(&key);
            round.get_or_insert(opened.mutation_id);
            assert_eq!(round, Some(opened.mutation_id));
            receipts.push(sessions.schedule(&key, recording_flush(&sessions, &calls, value)));
            assert!(sessions.is_editing(&key));
            tokio::time::advance(Duration::from_millis(200)).await;
        }
        assert!(calls.lock().is_empty());

        for receipt in receipts {
            assert!(receipt.is_editing);
            let value = receipt.committed().await.unwrap();
            assert_eq!(value.as_flow().unwrap().name, "Hey");
        }
        assert_eq!(*calls.lock(), vec!["Hey".to_string()]);
        assert_eq!(sessions.state(&key), EditState::Idle);
        assert!(!sessions.is_editing(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_editing_until_quiet_period_elapses() {
        let sessions = sessions();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let key = key();

        sessions.open(&key);
        let _receipt = sessions.schedule(&key, recording_flush(&sessions, &calls, "A"));
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(sessions.is_editing(&key));
        assert!(sessions.is_editing_view(&ViewKey::detail(&key.flow_id)));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!sessions.is_editing(&key));
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_finalizing_opens_new_round() {
        let sessions = sessions();
        let key = key();
        let gate = Arc::new(tokio::sync::Notify::new());

        let first = sessions.open(&key);
        let flush: FlushFn = {
            let sessions = Arc::clone(&sessions);
            let gate = Arc::clone(&gate);
            Box::new(move |request: EditFlush| {
                async move {
                    gate.notified().await;
                    sessions.settle(&request.key, request.mutation_id);
                    Ok(ViewValue::Detail(Flow::new(FlowId::new("f1"), "A")))
                }
                .boxed()
            })
        };
        let receipt = sessions.schedule(&key, flush);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(sessions.state(&key), EditState::Finalizing);

        let second = sessions.open(&key);
        assert!(second.fresh);
        assert_ne!(first.mutation_id, second.mutation_id);

        gate.notify_one();
        receipt.committed().await.unwrap();
        assert_eq!(sessions.state(&key), EditState::Editing);
    }

    #[test]
    fn test_node_fields_cover_node_views() {
        let node = NodeId::new("n1");
        let paths = EditField::NodeTitle(node.clone()).view_paths();
        assert!(paths.contains(&ViewPath::Node(node)));
        assert!(paths.contains(&ViewPath::Nodes));
        assert_eq!(EditField::FlowName.view_paths(), vec![ViewPath::Detail]);
    }
}
