use std::collections::BTreeSet;

use crate::signaling::{Participant, Presence, RosterSnapshot};

/// Difference between the locally tracked peer set and a roster snapshot.
///
/// Pure set reconciliation: applying the same snapshot twice yields an empty
/// diff the second time, which is what makes at-least-once roster delivery
/// safe.
#[derive(Debug, Default)]
pub struct RosterChanges {
    /// Remote participants to open links toward
    pub added: Vec<Participant>,
    /// Remote ids whose links must be torn down
    pub removed: Vec<String>,
}

impl RosterChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reconcile `known` (the remote ids we currently hold links for) against a
/// snapshot. Self is never part of the diff; a participant marked
/// [`Presence::Left`] counts as removed even while its document lingers.
pub fn reconcile(
    known: &BTreeSet<String>,
    snapshot: &RosterSnapshot,
    self_id: &str,
) -> RosterChanges {
    let mut changes = RosterChanges::default();

    let active: BTreeSet<&str> = snapshot
        .participants
        .iter()
        .filter(|p| p.presence == Presence::Active && p.id != self_id)
        .map(|p| p.id.as_str())
        .collect();

    for participant in &snapshot.participants {
        if participant.id == self_id || participant.presence != Presence::Active {
            continue;
        }
        if !known.contains(&participant.id) {
            changes.added.push(participant.clone());
        }
    }

    for id in known {
        if !active.contains(id.as_str()) {
            changes.removed.push(id.clone());
        }
    }

    changes
}
