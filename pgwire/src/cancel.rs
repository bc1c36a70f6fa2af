//! The Cancel Registry (spec.md §4.9, §5): a process-wide map from
//! `(backend_pid, secret)` to a weak handle on the owning session's
//! executor. Insertion (at auth completion) and removal (at session end)
//! are serialized under one lock; lookups take no lock of their own
//! beyond the read the `RwLock` itself provides, matching spec.md §5's
//! "lookups may occur concurrently with no lock... Reads see either an
//! old or new entry, never a torn one." No teacher code exists for this —
//! `ming535-floppy` has no cancel sub-protocol — so it's grounded instead
//! on the `(pid, secret)` pair the teacher's own
//! `FrontendStartupMessage::CancelRequest` variant already carries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// What the registry hands back on a successful lookup: a cheap clone of
/// the cancellation waiter/signal pair's signal half, owned by whichever
/// executor handle the target session currently has bound. Stored as a
/// `Weak` so a session that already ended leaves no dangling strong
/// reference behind.
pub type CancelSlot = Weak<executor::CancelSignal>;

#[derive(Default)]
pub struct CancelRegistry {
    entries: RwLock<HashMap<(u32, u32), CancelSlot>>,
}

impl CancelRegistry {
    pub fn new() -> Arc<CancelRegistry> {
        Arc::new(CancelRegistry::default())
    }

    /// Registers a session's cancel token right after `BackendKeyData` is
    /// emitted (spec.md §4.5's PARAM-EMIT state).
    pub fn register(&self, pid: u32, secret: u32, signal: Weak<executor::CancelSignal>) {
        self.entries.write().expect("cancel registry lock poisoned").insert((pid, secret), signal);
    }

    /// Removes a session's entry at END (spec.md §4.5).
    pub fn unregister(&self, pid: u32, secret: u32) {
        self.entries.write().expect("cancel registry lock poisoned").remove(&(pid, secret));
    }

    /// Services a `CancelRequest`: a lookup returning a dead (already
    /// dropped) session is a documented no-op (spec.md §3's "Cancel
    /// token" invariant), as is one for a pair that was never registered.
    pub fn cancel(&self, pid: u32, secret: u32) {
        let slot = self.entries.read().expect("cancel registry lock poisoned").get(&(pid, secret)).cloned();
        if let Some(weak) = slot {
            if let Some(signal) = weak.upgrade() {
                signal.cancel();
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor::CancelSignal;

    #[test]
    fn cancel_on_live_session_invokes_signal() {
        let registry = CancelRegistry::new();
        let (signal, waiter) = CancelSignal::new();
        let signal = Arc::new(signal);
        registry.register(1, 2, Arc::downgrade(&signal));

        registry.cancel(1, 2);
        assert!(waiter.is_cancelled());
    }

    #[test]
    fn cancel_on_unknown_pair_is_a_no_op() {
        let registry = CancelRegistry::new();
        registry.cancel(999, 999);
    }

    #[test]
    fn cancel_after_session_dropped_is_a_no_op() {
        let registry = CancelRegistry::new();
        {
            let (signal, _waiter) = CancelSignal::new();
            let signal = Arc::new(signal);
            registry.register(1, 2, Arc::downgrade(&signal));
        }
        registry.cancel(1, 2);
    }

    #[test]
    fn unregister_removes_entry() {
        let registry = CancelRegistry::new();
        let (signal, _waiter) = CancelSignal::new();
        let signal = Arc::new(signal);
        registry.register(1, 2, Arc::downgrade(&signal));
        assert_eq!(registry.len(), 1);
        registry.unregister(1, 2);
        assert_eq!(registry.len(), 0);
    }
}
