//! Request correlation.
//!
//! Allocates request ids and holds the result of each request until the
//! waiter collects it. Only the queue owner touches a `RequestHandler`, so
//! it needs no locking.

use std::collections::HashMap;

use tracing::warn;

// ── RequestResult ────────────────────────────────────────────────

/// The value a request is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    Unit,
    Bool(bool),
    Frame(u32),
}

impl RequestResult {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<u32> {
        match self {
            Self::Frame(frame) => Some(*frame),
            _ => None,
        }
    }
}

// ── RequestHandler ───────────────────────────────────────────────

#[derive(Debug)]
enum Slot {
    Pending,
    Served(RequestResult),
    /// The waiter gave up; a late reply is dropped.
    Abandoned,
}

/// Tracks outstanding requests keyed by request id.
#[derive(Debug)]
pub struct RequestHandler {
    next_id: u64,
    requests: HashMap<u64, Slot>,
}

impl RequestHandler {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            requests: HashMap::new(),
        }
    }

    /// Allocate a fresh request id. Ids are never reused while pending.
    pub fn register_request(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let previous = self.requests.insert(id, Slot::Pending);
        assert!(previous.is_none(), "request {id} registered twice");
        id
    }

    /// Store the result for `id`.
    ///
    /// # Panics
    ///
    /// Serving an id that was never registered, or serving it twice, is a
    /// correlation bug and panics.
    pub fn serve_request(&mut self, id: u64, result: RequestResult) {
        match self.requests.get_mut(&id) {
            Some(slot @ Slot::Pending) => *slot = Slot::Served(result),
            Some(Slot::Abandoned) => {
                warn!("dropping late reply for abandoned request {id}");
                self.requests.remove(&id);
            }
            Some(Slot::Served(_)) => panic!("request {id} served twice"),
            None => panic!("request {id} was never registered"),
        }
    }

    /// Returns `true` once `id` has a result waiting.
    pub fn is_served(&self, id: u64) -> bool {
        matches!(self.requests.get(&id), Some(Slot::Served(_)))
    }

    /// Returns `true` while `id` is registered and not yet served.
    pub fn is_pending(&self, id: u64) -> bool {
        matches!(self.requests.get(&id), Some(Slot::Pending))
    }

    /// Collect the result of a served request and free its id.
    ///
    /// Returns `None` if the request has not been served yet; the entry is
    /// left in place in that case.
    pub fn wait_request(&mut self, id: u64) -> Option<RequestResult> {
        match self.requests.get(&id) {
            Some(Slot::Served(result)) => {
                let result = *result;
                self.requests.remove(&id);
                Some(result)
            }
            _ => None,
        }
    }

    /// Give up on a pending request. A reply arriving later is logged and
    /// dropped instead of tripping the double-serve check.
    pub fn abandon_request(&mut self, id: u64) {
        match self.requests.get_mut(&id) {
            Some(slot @ Slot::Pending) => *slot = Slot::Abandoned,
            Some(Slot::Served(_)) => {
                self.requests.remove(&id);
            }
            _ => {}
        }
    }

    /// Forget every abandoned request. Call once no late reply can still
    /// be routed to them; a reply to a forgotten id is a correlation bug.
    pub fn drop_abandoned(&mut self) -> usize {
        let before = self.requests.len();
        self.requests.retain(|_, slot| !matches!(slot, Slot::Abandoned));
        before - self.requests.len()
    }

    /// Number of abandoned requests still holding a tombstone.
    pub fn abandoned_count(&self) -> usize {
        self.requests
            .values()
            .filter(|slot| matches!(slot, Slot::Abandoned))
            .count()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.requests
            .values()
            .filter(|slot| matches!(slot, Slot::Pending))
            .count()
    }
}

impl Default for RequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_serve_wait() {
        let mut requests = RequestHandler::new();
        let id = requests.register_request();
        assert!(requests.is_pending(id));
        assert!(!requests.is_served(id));
        assert_eq!(requests.wait_request(id), None);

        requests.serve_request(id, RequestResult::Bool(true));
        assert!(requests.is_served(id));
        assert_eq!(requests.wait_request(id), Some(RequestResult::Bool(true)));
        assert!(!requests.is_served(id));
        assert_eq!(requests.pending_count(), 0);
    }

    #[test]
    fn ids_are_distinct_while_pending() {
        let mut requests = RequestHandler::new();
        let a = requests.register_request();
        let b = requests.register_request();
        assert_ne!(a, b);
        assert_eq!(requests.pending_count(), 2);
    }

    #[test]
    #[should_panic(expected = "served twice")]
    fn double_serve_panics() {
        let mut requests = RequestHandler::new();
        let id = requests.register_request();
        requests.serve_request(id, RequestResult::Unit);
        requests.serve_request(id, RequestResult::Unit);
    }

    #[test]
    #[should_panic(expected = "never registered")]
    fn serving_unknown_id_panics() {
        let mut requests = RequestHandler::new();
        requests.serve_request(77, RequestResult::Unit);
    }

    #[test]
    fn late_reply_to_abandoned_request_is_dropped() {
        let mut requests = RequestHandler::new();
        let id = requests.register_request();
        requests.abandon_request(id);
        assert!(!requests.is_pending(id));

        requests.serve_request(id, RequestResult::Frame(4));
        assert!(!requests.is_served(id));
        assert_eq!(requests.wait_request(id), None);
    }

    #[test]
    fn dropping_abandoned_requests_keeps_the_rest() {
        let mut requests = RequestHandler::new();
        let gone = requests.register_request();
        let live = requests.register_request();
        requests.abandon_request(gone);
        assert_eq!(requests.abandoned_count(), 1);

        assert_eq!(requests.drop_abandoned(), 1);
        assert_eq!(requests.abandoned_count(), 0);
        assert!(requests.is_pending(live));
        assert_ne!(requests.register_request(), gone);
    }

    #[test]
    fn result_accessors() {
        assert_eq!(RequestResult::Bool(false).as_bool(), Some(false));
        assert_eq!(RequestResult::Frame(9).as_frame(), Some(9));
        assert_eq!(RequestResult::Unit.as_bool(), None);
    }
}
