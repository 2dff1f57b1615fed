//! A coordinator and its leaves, driven tick by tick over one [`SimNetwork`].
//!
//! Every leaf registers with a sensor type on start. The coordinator keeps a
//! registry of what it heard and periodically asks each registered leaf for
//! a reading of its sensor type. Scheduled dropouts take a leaf's radio off
//! the air for a while, which exercises connection recovery.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Context;
use sensormesh_protocol::{
    BoundedText, NetAddress, NodeConfig, NodeEvent, NodeId, RequestId, SensorNode,
};
use serde::Serialize;

use crate::journal::{HostEvent, Journal, Observation, Record};
use crate::network::{NetworkStats, SimLink, SimNetwork};

/// Sensor types handed out to leaves, round robin.
pub const SENSOR_TYPES: [&str; 4] = ["temperature", "humidity", "pressure", "light"];

/// Attribute the coordinator answers itself: how many nodes registered.
pub const NODE_COUNT_ATTRIBUTE: &str = "node-count";

type Registry = Rc<RefCell<BTreeMap<NodeId, BoundedText>>>;

/// Take `node` off the air at tick `at` for `duration` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropout {
    pub node: NodeId,
    pub at: u64,
    pub duration: u64,
}

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of leaves, with identities `1..=leaves`.
    pub leaves: u8,
    pub ticks: u64,
    pub seed: u64,
    /// Probability that any single write is lost.
    pub loss: f64,
    /// Coordinator polls every registered leaf this often (0 disables polling).
    pub poll_every: u64,
    pub dropouts: Vec<Dropout>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            leaves: 3,
            ticks: 30,
            seed: 1,
            loss: 0.0,
            poll_every: 5,
            dropouts: Vec::new(),
        }
    }
}

impl ScenarioConfig {
    pub fn leaves(mut self, leaves: u8) -> Self {
        self.leaves = leaves;
        self
    }

    pub fn ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    pub fn poll_every(mut self, ticks: u64) -> Self {
        self.poll_every = ticks;
        self
    }

    pub fn dropout(mut self, dropout: Dropout) -> Self {
        self.dropouts.push(dropout);
        self
    }
}

/// One row of the coordinator's address table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    pub node_id: NodeId,
    /// Octal, as the mesh prints it.
    pub address: String,
}

/// End-of-run totals, emitted as the last JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub event: &'static str,
    pub ticks: u64,
    pub registered: usize,
    pub readings: usize,
    pub recoveries: usize,
    pub send_failures: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub address_table: Vec<TableEntry>,
}

pub struct Simulation {
    config: ScenarioConfig,
    network: SimNetwork,
    journal: Journal,
    registry: Registry,
    coordinator: SensorNode<SimLink>,
    leaves: Vec<SensorNode<SimLink>>,
}

impl Simulation {
    pub fn new(config: ScenarioConfig) -> anyhow::Result<Self> {
        let network = SimNetwork::new(config.seed).with_loss(config.loss);
        let journal = Journal::default();
        let registry = Registry::default();

        let coordinator = coordinator_node(&network, &journal, &registry);
        let leaves = (1..=config.leaves)
            .map(|n| -> anyhow::Result<SensorNode<SimLink>> {
                let sensor_type = SENSOR_TYPES[usize::from(n - 1) % SENSOR_TYPES.len()];
                let node_config = NodeConfig::leaf(n)
                    .with_context(|| format!("leaf {n}"))?
                    .sensor_type(sensor_type);
                Ok(leaf_node(&network, &journal, node_config))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            config,
            network,
            journal,
            registry,
            coordinator,
            leaves,
        })
    }

    /// Bring the coordinator up, then every leaf (each registers on join).
    pub fn start(&mut self) -> anyhow::Result<()> {
        self.coordinator
            .start_mesh()
            .context("coordinator failed to create the mesh")?;
        for leaf in &mut self.leaves {
            let node_id = leaf.node_id();
            leaf.start_mesh()
                .with_context(|| format!("leaf {node_id} failed to join"))?;
        }
        Ok(())
    }

    /// One simulation round: dropouts, every node's tick, then polling.
    pub fn step(&mut self) -> anyhow::Result<()> {
        let tick = self.journal.advance();
        self.apply_dropouts(tick);

        self.coordinator.tick()?;
        for leaf in &mut self.leaves {
            leaf.tick()?;
        }

        if self.config.poll_every > 0 && tick % self.config.poll_every == 0 {
            self.poll();
        }
        Ok(())
    }

    /// Start, then step until the configured tick count.
    pub fn run(&mut self) -> anyhow::Result<Summary> {
        self.start()?;
        while self.journal.tick() < self.config.ticks {
            self.step()?;
        }
        Ok(self.summary())
    }

    fn apply_dropouts(&self, tick: u64) {
        for dropout in &self.config.dropouts {
            let up = if tick == dropout.at {
                false
            } else if tick == dropout.at + dropout.duration {
                true
            } else {
                continue;
            };
            self.network.set_link(dropout.node, up);
            self.journal.host(
                dropout.node,
                HostEvent::LinkChanged {
                    node_id: dropout.node,
                    up,
                },
            );
        }
    }

    /// Ask every registered leaf for a reading of its sensor type.
    fn poll(&mut self) {
        let targets: Vec<(NodeId, BoundedText)> = self
            .registry
            .borrow()
            .iter()
            .map(|(node, sensor_type)| (*node, sensor_type.clone()))
            .collect();
        for (node, sensor_type) in targets {
            self.coordinator.request(sensor_type, node);
        }
    }

    pub fn summary(&self) -> Summary {
        let records = self.journal.records();
        let count = |pred: fn(&Observation) -> bool| {
            records.iter().filter(|r| pred(&r.observation)).count()
        };
        let stats: NetworkStats = self.network.stats();
        Summary {
            event: "summary",
            ticks: self.journal.tick(),
            registered: self.registry.borrow().len(),
            readings: count(|o| matches!(o, Observation::Host(HostEvent::Reading { .. }))),
            recoveries: count(|o| matches!(o, Observation::Node(NodeEvent::Recovered { .. }))),
            send_failures: count(|o| matches!(o, Observation::Node(NodeEvent::SendFailed { .. }))),
            delivered: stats.delivered,
            dropped: stats.dropped,
            address_table: self
                .coordinator
                .address_table()
                .into_iter()
                .map(|(node_id, address)| TableEntry {
                    node_id,
                    address: address.to_string(),
                })
                .collect(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    pub fn coordinator(&self) -> &SensorNode<SimLink> {
        &self.coordinator
    }

    pub fn leaf(&self, node_id: NodeId) -> Option<&SensorNode<SimLink>> {
        self.leaves.iter().find(|n| n.node_id() == node_id)
    }

    pub fn leaf_mut(&mut self, node_id: NodeId) -> Option<&mut SensorNode<SimLink>> {
        self.leaves.iter_mut().find(|n| n.node_id() == node_id)
    }

    /// Sensor types the coordinator has registered, by node.
    pub fn registry(&self) -> BTreeMap<NodeId, BoundedText> {
        self.registry.borrow().clone()
    }

    /// Records for one node, in order.
    pub fn records_for(&self, node: NodeId) -> Vec<Record> {
        self.journal
            .records()
            .into_iter()
            .filter(|r| r.node == node)
            .collect()
    }
}

fn coordinator_node(network: &SimNetwork, journal: &Journal, registry: &Registry) -> SensorNode<SimLink> {
    let id = NodeId::COORDINATOR;
    let mut node = SensorNode::new(network.link(), NodeConfig::coordinator())
        .with_event_sink(journal.sink_for(id));

    let (log, seen) = (journal.clone(), registry.clone());
    node.set_registration_handler(move |registration, _, outbox| {
        seen.borrow_mut()
            .insert(registration.node_id, registration.sensor_type.clone());
        log.host(
            id,
            HostEvent::Registered {
                node_id: registration.node_id,
                sensor_type: registration.sensor_type.to_string(),
            },
        );
        outbox.respond_to_registration("ok", &registration);
    });

    let seen = registry.clone();
    node.set_request_handler(move |request, header, outbox| {
        let value = if request.attribute_requested == NODE_COUNT_ATTRIBUTE {
            seen.borrow().len().to_string()
        } else {
            "unknown".to_string()
        };
        outbox.respond_to_request(value, &request, header);
    });

    let log = journal.clone();
    node.set_response_handler(move |response, header, _| {
        log.host(
            id,
            HostEvent::Reading {
                request_id: response.request_id,
                from: header.from_node,
                value: response.value.to_string(),
            },
        );
    });
    node
}

fn leaf_node(network: &SimNetwork, journal: &Journal, config: NodeConfig) -> SensorNode<SimLink> {
    let id = config.node_id;
    let sensor_type = config.sensor_type.clone().unwrap_or_default();
    let mut node =
        SensorNode::new(network.link(), config).with_event_sink(journal.sink_for(id));

    // Leaves never receive registrations.
    node.set_registration_handler(|_, _, _| {});

    let clock = journal.clone();
    node.set_request_handler(move |request, header, outbox| {
        let value = if request.attribute_requested == sensor_type {
            sample(sensor_type.as_str(), id, clock.tick())
        } else {
            "unknown".to_string()
        };
        outbox.respond_to_request(value, &request, header);
    });

    let log = journal.clone();
    node.set_response_handler(move |response, _, _| {
        log.host(
            id,
            HostEvent::Acknowledged {
                request_id: response.request_id,
                value: response.value.to_string(),
            },
        );
    });
    node
}

/// Deterministic fake reading for `sensor_type` on `node` at `tick`.
pub fn sample(sensor_type: &str, node: NodeId, tick: u64) -> String {
    let wobble = ((tick * 7 + u64::from(node.get()) * 13) % 50) as f64 / 10.0;
    match sensor_type {
        "temperature" => format!("{:.1}", 18.0 + wobble),
        "humidity" => format!("{:.0}", 40.0 + wobble * 4.0),
        "pressure" => format!("{:.1}", 1010.0 + wobble),
        "light" => format!("{:.0}", 200.0 + wobble * 60.0),
        _ => format!("{wobble:.1}"),
    }
}

/// Address of the node that produced `request_id`, as the coordinator saw it.
pub fn reading_sources(records: &[Record]) -> BTreeMap<RequestId, NetAddress> {
    records
        .iter()
        .filter_map(|r| match &r.observation {
            Observation::Host(HostEvent::Reading {
                request_id, from, ..
            }) => Some((*request_id, *from)),
            _ => None,
        })
        .collect()
}
