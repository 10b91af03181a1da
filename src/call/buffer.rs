use crate::peer::types::NetworkCandidate;
use crate::session::CallId;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Remote candidates that arrived before the call had a negotiator.
/// FIFO per call, bounded; the oldest entry goes when full.
#[derive(Debug)]
pub struct CandidateBuffer {
    capacity: usize,
    queues: HashMap<CallId, VecDeque<NetworkCandidate>>,
}

impl CandidateBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: HashMap::new(),
        }
    }

    pub fn push(&mut self, call_id: &CallId, candidate: NetworkCandidate) {
        let queue = self.queues.entry(call_id.clone()).or_default();
        if queue.len() == self.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(%call_id, candidate = %dropped.candidate, "candidate buffer full, dropping oldest");
            }
        }
        queue.push_back(candidate);
        debug!(%call_id, buffered = queue.len(), "remote candidate buffered");
    }

    /// Removes and returns everything buffered for `call_id`, oldest first
    pub fn drain(&mut self, call_id: &CallId) -> Vec<NetworkCandidate> {
        self.queues
            .remove(call_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn len(&self, call_id: &CallId) -> usize {
        self.queues.get(call_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
