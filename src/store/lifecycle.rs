use crate::common::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a named entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Active,
    Deleted,
    /// Terminal. A purged record is removed from its store.
    Purged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    SoftDelete,
    Recover,
    Purge,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Active => f.write_str("Active"),
            LifecycleState::Deleted => f.write_str("Deleted"),
            LifecycleState::Purged => f.write_str("Purged"),
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::SoftDelete => f.write_str("delete"),
            LifecycleEvent::Recover => f.write_str("recover"),
            LifecycleEvent::Purge => f.write_str("purge"),
        }
    }
}

impl LifecycleState {
    /// Applies `event`, or reports a `Conflict` on `target` carrying the current state.
    ///
    /// Deleting an already deleted record is a no-op.
    pub fn transition(self, event: LifecycleEvent, target: impl fmt::Display) -> Result<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        match (self, event) {
            (Active, SoftDelete) | (Deleted, SoftDelete) => Ok(Deleted),
            (Deleted, Recover) => Ok(Active),
            (Deleted, Purge) => Ok(Purged),
            (state, event) => Err(Error::conflict(
                target,
                state,
                format!("cannot {} an entity in state {}", event, state),
            )),
        }
    }

    pub fn is_active(&self) -> bool {
        *self == LifecycleState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleEvent::*;
    use LifecycleState::*;

    #[test]
    fn test_legal_transitions() {
        assert_eq!(Active.transition(SoftDelete, "key 'a'").unwrap(), Deleted);
        assert_eq!(Deleted.transition(SoftDelete, "key 'a'").unwrap(), Deleted);
        assert_eq!(Deleted.transition(Recover, "key 'a'").unwrap(), Active);
        assert_eq!(Deleted.transition(Purge, "key 'a'").unwrap(), Purged);
    }

    #[test]
    fn test_illegal_transitions_are_conflicts() {
        for (state, event) in [(Active, Recover), (Active, Purge), (Purged, Recover), (Purged, SoftDelete)] {
            match state.transition(event, "secret 's'") {
                Err(Error::Conflict { state: reported, target, .. }) => {
                    assert_eq!(reported, state.to_string());
                    assert_eq!(target, "secret 's'");
                }
                other => panic!("{state} + {event}: unexpected {other:?}"),
            }
        }
    }
}
