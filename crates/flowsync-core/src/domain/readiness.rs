//! Readiness transitions owned by the engine
//!
//! The engine only owns the edit-driven `Ready -> Draft` edge. `Error` and
//! `Ready` are set by the external validation collaborator.

use super::flow::ReadinessState;

/// What kind of edit is being applied to a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditImpact {
    /// Add/remove of a node or edge
    Structural,
    /// Content change that can invalidate a prior validation pass
    /// (branch conditions, logic operator, data store wiring)
    Invalidating,
}

/// Target state of an edit observing `current`, or `None` if unchanged
pub fn on_edit(current: ReadinessState, impact: EditImpact) -> Option<ReadinessState> {
    match (current, impact) {
        (ReadinessState::Ready, EditImpact::Structural | EditImpact::Invalidating) => {
            Some(ReadinessState::Draft)
        }
        _ => None,
    }
}

/// Readiness an edit records in its speculative writes
///
/// A `Draft` document still records `Draft`, so rolling back the earlier
/// edit that left it in `Draft` cannot resurface `Ready` under this one.
pub fn pinned_by_edit(current: ReadinessState, impact: EditImpact) -> Option<ReadinessState> {
    match current {
        ReadinessState::Draft => Some(ReadinessState::Draft),
        _ => on_edit(current, impact),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_becomes_draft_on_structural_edit() {
        assert_eq!(
            on_edit(ReadinessState::Ready, EditImpact::Structural),
            Some(ReadinessState::Draft)
        );
        assert_eq!(
            on_edit(ReadinessState::Ready, EditImpact::Invalidating),
            Some(ReadinessState::Draft)
        );
    }

    #[test]
    fn test_other_states_untouched() {
        assert_eq!(on_edit(ReadinessState::Draft, EditImpact::Structural), None);
        assert_eq!(on_edit(ReadinessState::Error, EditImpact::Structural), None);
        assert_eq!(on_edit(ReadinessState::Error, EditImpact::Invalidating), None);
    }

    #[test]
    fn test_edits_only_ever_produce_draft() {
        for current in [ReadinessState::Draft, ReadinessState::Ready, ReadinessState::Error] {
            for impact in [EditImpact::Structural, EditImpact::Invalidating] {
                if let Some(next) = on_edit(current, impact) {
                    assert_eq!(next, ReadinessState::Draft);
                }
            }
        }
    }

    #[test]
    fn test_pinned_by_edit_keeps_draft_and_leaves_error() {
        assert_eq!(
            pinned_by_edit(ReadinessState::Draft, EditImpact::Structural),
            Some(ReadinessState::Draft)
        );
        assert_eq!(
            pinned_by_edit(ReadinessState::Ready, EditImpact::Invalidating),
            Some(ReadinessState::Draft)
        );
        assert_eq!(pinned_by_edit(ReadinessState::Error, EditImpact::Structural), None);
    }
}
