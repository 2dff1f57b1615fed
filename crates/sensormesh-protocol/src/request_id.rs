//! Per-node request id generator.
//!
//! The counter starts at 1 and only ever increases, so two consecutive
//! ids from the same node are strictly increasing.
use crate::types::{NodeId, RequestId};

#[derive(Debug, Clone)]
pub struct RequestIdGenerator {
    node_id: NodeId,
    counter: u64,
}

impl RequestIdGenerator {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            counter: 1,
        }
    }

    /// Produce the next id and advance the counter.
    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId::compose(self.node_id, self.counter);
        self.counter += 1;
        id
    }

    /// Counter value the next id will use.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}
