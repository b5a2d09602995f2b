//! Derives and edge-detects a single "is the system quiescent?" bit. One
//! instance tracks `isProcessingLambdaChanges`; a symmetric instance tracks
//! the infra state machine's `Idle` vs non-`Idle`.
//!
//! Shaped after `actions/progress.rs`'s edge-triggered begin/end progress
//! pair and the `quiescent: Arc<AtomicBool>` bit on `InitActionContext`.

use log::info;

/// Emitted only on a NOT-BUSY→BUSY or BUSY→NOT-BUSY edge; the user-facing
/// busy edge-message stream strictly alternates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyEdge {
    BecameBusy,
    BecameIdle { failed: bool },
}

pub struct BusyReporter {
    label: &'static str,
    was_busy: bool,
}

impl BusyReporter {
    pub fn new(label: &'static str) -> Self {
        BusyReporter { label, was_busy: false }
    }

    pub fn is_busy(&self) -> bool {
        self.was_busy
    }

    /// Call after every state mutation with the freshly computed busy bit.
    /// Returns `Some(edge)` only on a transition.
    pub fn poll(&mut self, now_busy: bool, failed: bool) -> Option<BusyEdge> {
        if now_busy == self.was_busy {
            return None;
        }
        self.was_busy = now_busy;
        let edge =
            if now_busy { BusyEdge::BecameBusy } else { BusyEdge::BecameIdle { failed } };
        match edge {
            BusyEdge::BecameBusy => info!("{}: Rebuilding code…", self.label),
            BusyEdge::BecameIdle { failed: true } => {
                info!("{}: Rebuilding code failed", self.label)
            }
            BusyEdge::BecameIdle { failed: false } => info!("{}: Done building code", self.label),
        }
        Some(edge)
    }
}
