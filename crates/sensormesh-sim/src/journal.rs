use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sensormesh_protocol::{NetAddress, NodeEvent, NodeId, RequestId};
use serde::Serialize;

/// Application-level observations made by the simulated hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// The coordinator accepted a registration.
    Registered {
        node_id: NodeId,
        sensor_type: String,
    },
    /// The coordinator received a reading it asked for.
    Reading {
        request_id: RequestId,
        from: NetAddress,
        value: String,
    },
    /// A leaf received the answer to its registration or request.
    Acknowledged { request_id: RequestId, value: String },
    /// A radio went off the air or came back.
    LinkChanged { node_id: NodeId, up: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Observation {
    Node(NodeEvent),
    Host(HostEvent),
}

/// One JSONL line: what happened, where, and on which tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub tick: u64,
    pub node: NodeId,
    #[serde(flatten)]
    pub observation: Observation,
}

/// Shared, append-only log of a simulation run.
#[derive(Clone, Default)]
pub struct Journal {
    clock: Rc<Cell<u64>>,
    records: Rc<RefCell<Vec<Record>>>,
    taken: Rc<Cell<usize>>,
}

impl Journal {
    pub fn tick(&self) -> u64 {
        self.clock.get()
    }

    pub(crate) fn advance(&self) -> u64 {
        let tick = self.clock.get() + 1;
        self.clock.set(tick);
        tick
    }

    pub fn node(&self, node: NodeId, event: NodeEvent) {
        self.push(node, Observation::Node(event));
    }

    pub fn host(&self, node: NodeId, event: HostEvent) {
        self.push(node, Observation::Host(event));
    }

    fn push(&self, node: NodeId, observation: Observation) {
        self.records.borrow_mut().push(Record {
            tick: self.clock.get(),
            node,
            observation,
        });
    }

    /// Every record so far.
    pub fn records(&self) -> Vec<Record> {
        self.records.borrow().clone()
    }

    /// Records appended since the previous call.
    pub fn take_new(&self) -> Vec<Record> {
        let records = self.records.borrow();
        let fresh = records[self.taken.get()..].to_vec();
        self.taken.set(records.len());
        fresh
    }

    /// Event sink for `node`, to hand to `SensorNode::with_event_sink`.
    pub fn sink_for(&self, node: NodeId) -> impl FnMut(&NodeEvent) + 'static {
        let journal = self.clone();
        move |event: &NodeEvent| journal.node(node, event.clone())
    }
}
