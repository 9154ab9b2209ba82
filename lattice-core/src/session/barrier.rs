//! Multi-peer reply aggregation.
//!
//! A broadcast request is answered once per peer under the same request id.
//! The collector folds the replies and reports an outcome once every
//! addressed peer has answered or been lost.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use crate::net::PeerId;

/// Combined result of a completed barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierOutcome {
    /// `true` only if every peer replied successfully.
    pub result: bool,
    /// Error strings reported by failing peers, in arrival order.
    pub errors: Vec<String>,
}

impl BarrierOutcome {
    /// All reported errors joined into one message.
    pub fn error_message(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }
}

#[derive(Debug)]
struct Barrier {
    operation: &'static str,
    waiting: BTreeSet<PeerId>,
    result: bool,
    errors: Vec<String>,
}

impl Barrier {
    fn outcome(&mut self) -> BarrierOutcome {
        BarrierOutcome {
            result: self.result,
            errors: std::mem::take(&mut self.errors),
        }
    }
}

/// Open barriers keyed by request id.
#[derive(Debug, Default)]
pub struct BarrierCollector {
    barriers: HashMap<u64, Barrier>,
}

impl BarrierCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting replies for `id` from `peers`.
    ///
    /// With no peers to wait on the barrier is complete immediately and its
    /// outcome is returned.
    pub fn open(
        &mut self,
        id: u64,
        operation: &'static str,
        peers: impl IntoIterator<Item = PeerId>,
    ) -> Option<BarrierOutcome> {
        let waiting: BTreeSet<PeerId> = peers.into_iter().collect();
        let mut barrier = Barrier {
            operation,
            waiting,
            result: true,
            errors: Vec::new(),
        };
        if barrier.waiting.is_empty() {
            return Some(barrier.outcome());
        }
        debug!(
            "{operation}: request {id} waiting on {} peer(s)",
            barrier.waiting.len()
        );
        self.barriers.insert(id, barrier);
        None
    }

    /// Record one peer's reply. Returns the outcome once the barrier closes.
    pub fn reply(
        &mut self,
        id: u64,
        peer: PeerId,
        ok: bool,
        error: Option<String>,
    ) -> Option<BarrierOutcome> {
        let Some(barrier) = self.barriers.get_mut(&id) else {
            warn!("reply from peer {peer} for unknown barrier {id}");
            return None;
        };
        if !barrier.waiting.remove(&peer) {
            warn!(
                "{}: unexpected reply from peer {peer} for request {id}",
                barrier.operation
            );
            return None;
        }
        if !ok {
            barrier.result = false;
            if let Some(error) = error {
                barrier.errors.push(error);
            }
        }
        self.close_if_done(id)
    }

    /// Fail every barrier still waiting on `peer`.
    ///
    /// Returns the barriers that completed because of the loss.
    pub fn peer_lost(&mut self, peer: PeerId) -> Vec<(u64, BarrierOutcome)> {
        let affected: Vec<u64> = self
            .barriers
            .iter_mut()
            .filter_map(|(&id, barrier)| {
                barrier.waiting.remove(&peer).then(|| {
                    barrier.result = false;
                    barrier.errors.push(format!("peer {peer} disconnected"));
                    id
                })
            })
            .collect();

        affected
            .into_iter()
            .filter_map(|id| self.close_if_done(id).map(|outcome| (id, outcome)))
            .collect()
    }

    /// Stop collecting for `id`. Later replies are logged and ignored.
    pub fn cancel(&mut self, id: u64) {
        self.barriers.remove(&id);
    }

    /// Peers that have not yet answered barrier `id`.
    pub fn waiting_on(&self, id: u64) -> Vec<PeerId> {
        self.barriers
            .get(&id)
            .map(|barrier| barrier.waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every peer some open barrier is still waiting on.
    pub fn stalled_peers(&self) -> BTreeSet<PeerId> {
        self.barriers
            .values()
            .flat_map(|barrier| barrier.waiting.iter().copied())
            .collect()
    }

    pub fn is_open(&self, id: u64) -> bool {
        self.barriers.contains_key(&id)
    }

    fn close_if_done(&mut self, id: u64) -> Option<BarrierOutcome> {
        let done = self
            .barriers
            .get(&id)
            .is_some_and(|barrier| barrier.waiting.is_empty());
        if !done {
            return None;
        }
        self.barriers.remove(&id).map(|mut barrier| barrier.outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_barrier_completes_immediately() {
        let mut barriers = BarrierCollector::new();
        let outcome = barriers.open(1, "start_init", []).unwrap();
        assert!(outcome.result);
        assert!(!barriers.is_open(1));
    }

    #[test]
    fn completes_after_last_reply() {
        let mut barriers = BarrierCollector::new();
        assert!(barriers.open(5, "exit", [1, 2]).is_none());
        assert!(barriers.reply(5, 1, true, None).is_none());
        assert_eq!(barriers.waiting_on(5), vec![2]);

        let outcome = barriers.reply(5, 2, true, None).unwrap();
        assert!(outcome.result);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn any_failure_fails_the_barrier() {
        let mut barriers = BarrierCollector::new();
        barriers.open(2, "start_init", [1, 2]);
        barriers.reply(2, 1, false, Some("no display".into()));
        let outcome = barriers.reply(2, 2, true, None).unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.error_message().as_deref(), Some("no display"));
    }

    #[test]
    fn duplicate_reply_is_ignored() {
        let mut barriers = BarrierCollector::new();
        barriers.open(3, "exit", [1, 2]);
        assert!(barriers.reply(3, 1, true, None).is_none());
        assert!(barriers.reply(3, 1, true, None).is_none());
        assert!(barriers.is_open(3));
    }

    #[test]
    fn lost_peer_fails_and_closes() {
        let mut barriers = BarrierCollector::new();
        barriers.open(4, "finish_init", [1, 2]);
        barriers.open(6, "exit", [3]);
        barriers.reply(4, 1, true, None);

        let closed = barriers.peer_lost(2);
        assert_eq!(closed.len(), 1);
        let (id, outcome) = &closed[0];
        assert_eq!(*id, 4);
        assert!(!outcome.result);
        assert_eq!(outcome.errors, vec!["peer 2 disconnected".to_string()]);
        assert_eq!(barriers.stalled_peers().into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn cancelled_barrier_ignores_replies() {
        let mut barriers = BarrierCollector::new();
        barriers.open(8, "exit", [1]);
        barriers.cancel(8);
        assert!(barriers.reply(8, 1, true, None).is_none());
    }
}
