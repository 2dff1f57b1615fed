//! In-memory mesh shared by every node of one simulation.
//!
//! Addresses form an octal tree below the coordinator (`00`): its children
//! are `01`..`05`, the children of `01` are `011`..`051`, and so on. Leaves
//! lease an address when they join; the coordinator publishes leases to the
//! directory when it services address assignment. Frames are delivered
//! immediately into the receiver's inbound queue.
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sensormesh_protocol::{
    Frame, Header, MeshError, MeshLink, NetAddress, NodeId, MAX_FRAME_BODY,
};

/// Children per node in the address tree.
const FANOUT: u16 = 5;

/// Levels of the address tree below the coordinator.
const MAX_DEPTH: u16 = 4;

/// Delivery counters for a whole network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub dropped: u64,
}

struct Station {
    owner: usize,
    address: Option<NetAddress>,
    inbound: VecDeque<Frame>,
    link_up: bool,
}

struct NetworkState {
    stations: BTreeMap<NodeId, Station>,
    /// Authoritative leases, updated on join and renewal.
    leases: BTreeMap<NetAddress, NodeId>,
    /// What the coordinator last published; used for routing.
    directory: BTreeMap<NetAddress, NodeId>,
    next_owner: usize,
    rng: StdRng,
    loss: f64,
    stats: NetworkStats,
}

impl NetworkState {
    fn coordinator_up(&self) -> bool {
        self.stations
            .get(&NodeId::COORDINATOR)
            .is_some_and(|s| s.address.is_some() && s.link_up)
    }

    fn lease(&mut self, node_id: NodeId) -> Option<NetAddress> {
        let address = tree_addresses().find(|a| !self.leases.contains_key(a))?;
        self.leases.insert(address, node_id);
        Some(address)
    }

    fn route(&self, to: NodeId) -> Option<NetAddress> {
        if to.is_coordinator() {
            return self
                .stations
                .get(&to)
                .and_then(|s| s.address)
                .filter(|a| *a == NetAddress::MASTER);
        }
        self.directory
            .iter()
            .find(|(_, node)| **node == to)
            .map(|(address, _)| *address)
    }
}

/// Every assignable leaf address, breadth first.
fn tree_addresses() -> impl Iterator<Item = NetAddress> {
    let mut all = Vec::new();
    let mut level: Vec<u16> = vec![0];
    for depth in 0..MAX_DEPTH {
        let shift = 3 * depth;
        let next: Vec<u16> = level
            .iter()
            .flat_map(|&parent| (1..=FANOUT).map(move |digit| parent | (digit << shift)))
            .collect();
        all.extend_from_slice(&next);
        level = next;
    }
    all.into_iter().map(NetAddress)
}

/// Handle to the shared network. Cheap to clone.
#[derive(Clone)]
pub struct SimNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl SimNetwork {
    /// Lossless network. `seed` drives every random drop once loss is enabled.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(NetworkState {
                stations: BTreeMap::new(),
                leases: BTreeMap::new(),
                directory: BTreeMap::new(),
                next_owner: 0,
                rng: StdRng::seed_from_u64(seed),
                loss: 0.0,
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Drop each write with probability `loss` (clamped to `0.0..=1.0`).
    pub fn with_loss(self, loss: f64) -> Self {
        self.state.borrow_mut().loss = loss.clamp(0.0, 1.0);
        self
    }

    /// A new, unattached radio on this network.
    pub fn link(&self) -> SimLink {
        let owner = {
            let mut state = self.state.borrow_mut();
            state.next_owner += 1;
            state.next_owner
        };
        SimLink {
            network: self.clone(),
            owner,
            node_id: None,
        }
    }

    /// Take a node's radio off the air, or bring it back.
    ///
    /// Frames already queued for the node stay queued.
    pub fn set_link(&self, node_id: NodeId, up: bool) {
        if let Some(station) = self.state.borrow_mut().stations.get_mut(&node_id) {
            station.link_up = up;
        }
    }

    pub fn is_link_up(&self, node_id: NodeId) -> bool {
        self.state
            .borrow()
            .stations
            .get(&node_id)
            .is_some_and(|s| s.link_up)
    }

    /// Address currently held by `node_id`.
    pub fn address_of(&self, node_id: NodeId) -> Option<NetAddress> {
        self.state
            .borrow()
            .stations
            .get(&node_id)
            .and_then(|s| s.address)
    }

    pub fn stats(&self) -> NetworkStats {
        self.state.borrow().stats
    }
}

/// One node's view of the [`SimNetwork`].
pub struct SimLink {
    network: SimNetwork,
    owner: usize,
    node_id: Option<NodeId>,
}

impl SimLink {
    fn with_station<R>(&self, f: impl FnOnce(&Station) -> R) -> Option<R> {
        let node_id = self.node_id?;
        let state = self.network.state.borrow();
        state
            .stations
            .get(&node_id)
            .filter(|s| s.owner == self.owner)
            .map(f)
    }

    fn is_coordinator(&self) -> bool {
        self.node_id.is_some_and(NodeId::is_coordinator)
    }
}

impl MeshLink for SimLink {
    fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = Some(node_id);
        let mut state = self.network.state.borrow_mut();
        state.stations.entry(node_id).or_insert_with(|| Station {
            owner: self.owner,
            address: None,
            inbound: VecDeque::new(),
            link_up: true,
        });
    }

    fn begin(&mut self) -> Result<NetAddress, MeshError> {
        let node_id = self.node_id.ok_or(MeshError::NotStarted)?;
        let mut guard = self.network.state.borrow_mut();
        let state = &mut *guard;

        let owner = state.stations.get(&node_id).map(|s| s.owner);
        if owner != Some(self.owner) {
            return Err(MeshError::Join(format!("node id {node_id} already in use")));
        }

        let address = if node_id.is_coordinator() {
            NetAddress::MASTER
        } else {
            if !state.coordinator_up() {
                return Err(MeshError::Join("no coordinator in range".into()));
            }
            state
                .lease(node_id)
                .ok_or_else(|| MeshError::Join("address space exhausted".into()))?
        };

        if let Some(station) = state.stations.get_mut(&node_id) {
            station.address = Some(address);
        }
        tracing::debug!("sim: node {node_id} joined at {address}");
        Ok(address)
    }

    fn refresh(&mut self) {
        // Delivery is immediate; nothing to pump.
    }

    fn service_address_assignment(&mut self) {
        if !self.is_coordinator() {
            return;
        }
        let mut guard = self.network.state.borrow_mut();
        let state = &mut *guard;
        if state.directory != state.leases {
            for (address, node_id) in &state.leases {
                if state.directory.get(address) != Some(node_id) {
                    tracing::debug!("sim: publishing node {node_id} at {address}");
                }
            }
            state.directory = state.leases.clone();
        }
    }

    fn is_connected(&mut self) -> bool {
        let Some(node_id) = self.node_id else {
            return false;
        };
        let state = self.network.state.borrow();
        let Some(station) = state.stations.get(&node_id) else {
            return false;
        };
        let Some(address) = station.address else {
            return false;
        };
        if !station.link_up {
            return false;
        }
        node_id.is_coordinator()
            || (state.coordinator_up() && state.leases.get(&address) == Some(&node_id))
    }

    fn renew_address(&mut self) -> Result<NetAddress, MeshError> {
        let node_id = self.node_id.ok_or(MeshError::NotStarted)?;
        let mut guard = self.network.state.borrow_mut();
        let state = &mut *guard;

        let link_up = state.stations.get(&node_id).is_some_and(|s| s.link_up);
        if !link_up || !state.coordinator_up() {
            return Err(MeshError::Renewal("no coordinator in range".into()));
        }

        state.leases.retain(|_, holder| *holder != node_id);
        let address = state
            .lease(node_id)
            .ok_or_else(|| MeshError::Renewal("address space exhausted".into()))?;
        if let Some(station) = state.stations.get_mut(&node_id) {
            station.address = Some(address);
        }
        Ok(address)
    }

    fn available(&self) -> bool {
        self.with_station(|s| !s.inbound.is_empty())
            .unwrap_or(false)
    }

    fn peek_header(&self) -> Option<Header> {
        self.with_station(|s| s.inbound.front().map(|f| f.header))
            .flatten()
    }

    fn read(&mut self) -> Option<Frame> {
        let node_id = self.node_id?;
        let mut state = self.network.state.borrow_mut();
        state
            .stations
            .get_mut(&node_id)
            .filter(|s| s.owner == self.owner)?
            .inbound
            .pop_front()
    }

    fn write(&mut self, body: &[u8], msg_type: u8, to: NodeId) -> Result<(), MeshError> {
        let node_id = self.node_id.ok_or(MeshError::NotStarted)?;
        if body.len() > MAX_FRAME_BODY {
            return Err(MeshError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_BODY,
            });
        }

        let mut guard = self.network.state.borrow_mut();
        let state = &mut *guard;

        let sender = state.stations.get(&node_id).filter(|s| s.owner == self.owner);
        let (from, link_up) = match sender {
            Some(Station {
                address: Some(address),
                link_up,
                ..
            }) => (*address, *link_up),
            _ => return Err(MeshError::NotStarted),
        };
        if !link_up {
            state.stats.dropped += 1;
            return Err(MeshError::Write {
                node_id: to,
                reason: "radio link down".into(),
            });
        }

        let dest = state.route(to).ok_or(MeshError::Unroutable { node_id: to })?;

        let lost = state.loss > 0.0 && state.rng.random_bool(state.loss);
        let receiver = state
            .stations
            .get_mut(&to)
            .filter(|s| s.link_up && s.address == Some(dest));
        match receiver {
            Some(station) if !lost => {
                station.inbound.push_back(Frame::new(
                    Header {
                        msg_type,
                        from_node: from,
                        to_node: dest,
                    },
                    body.to_vec(),
                ));
                state.stats.delivered += 1;
                Ok(())
            }
            _ => {
                state.stats.dropped += 1;
                Err(MeshError::Write {
                    node_id: to,
                    reason: "no acknowledgement".into(),
                })
            }
        }
    }

    fn node_id_of(&self, address: NetAddress) -> Option<NodeId> {
        let state = self.network.state.borrow();
        if address == NetAddress::MASTER {
            return state
                .stations
                .contains_key(&NodeId::COORDINATOR)
                .then_some(NodeId::COORDINATOR);
        }
        state.directory.get(&address).copied()
    }

    fn address_table(&self) -> Vec<(NodeId, NetAddress)> {
        if !self.is_coordinator() {
            return Vec::new();
        }
        let state = self.network.state.borrow();
        let mut table: Vec<_> = state.directory.iter().map(|(a, n)| (*n, *a)).collect();
        table.sort();
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensormesh_protocol::REQUEST_TAG;

    fn id(n: u8) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn joined(network: &SimNetwork, node_id: NodeId) -> SimLink {
        let mut link = network.link();
        link.set_node_id(node_id);
        link.begin().unwrap();
        link
    }

    #[test]
    fn address_tree_is_breadth_first() {
        let first: Vec<u16> = tree_addresses().take(7).map(|a| a.0).collect();
        assert_eq!(first, vec![0o1, 0o2, 0o3, 0o4, 0o5, 0o11, 0o21]);
        assert_eq!(tree_addresses().count(), 5 + 25 + 125 + 625);
    }

    #[test]
    fn leaf_cannot_join_without_coordinator() {
        let network = SimNetwork::new(1);
        let mut leaf = network.link();
        leaf.set_node_id(id(1));
        assert!(matches!(leaf.begin(), Err(MeshError::Join(_))));
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let network = SimNetwork::new(1);
        let _master = joined(&network, NodeId::COORDINATOR);
        let _first = joined(&network, id(4));
        let mut second = network.link();
        second.set_node_id(id(4));
        assert!(matches!(second.begin(), Err(MeshError::Join(_))));
    }

    #[test]
    fn leaves_are_routable_once_published() {
        let network = SimNetwork::new(1);
        let mut master = joined(&network, NodeId::COORDINATOR);
        let mut leaf = joined(&network, id(3));
        assert_eq!(network.address_of(id(3)), Some(NetAddress(0o1)));

        // Leaf to coordinator always routes.
        leaf.write(b"hi", REQUEST_TAG, NodeId::COORDINATOR).unwrap();
        let header = master.peek_header().unwrap();
        assert_eq!(header.from_node, NetAddress(0o1));
        assert_eq!(master.node_id_of(header.from_node), None);

        assert!(matches!(
            master.write(b"yo", REQUEST_TAG, id(3)),
            Err(MeshError::Unroutable { .. })
        ));

        master.service_address_assignment();
        assert_eq!(master.node_id_of(NetAddress(0o1)), Some(id(3)));
        assert_eq!(master.address_table(), vec![(id(3), NetAddress(0o1))]);
        assert!(leaf.address_table().is_empty());
        master.write(b"yo", REQUEST_TAG, id(3)).unwrap();
        assert_eq!(leaf.read().unwrap().body, b"yo".to_vec());
    }

    #[test]
    fn link_down_breaks_probe_writes_and_renewal() {
        let network = SimNetwork::new(1);
        let _master = joined(&network, NodeId::COORDINATOR);
        let mut leaf = joined(&network, id(2));
        assert!(leaf.is_connected());

        network.set_link(id(2), false);
        assert!(!leaf.is_connected());
        assert!(leaf.write(b"x", REQUEST_TAG, NodeId::COORDINATOR).is_err());
        assert!(matches!(leaf.renew_address(), Err(MeshError::Renewal(_))));

        network.set_link(id(2), true);
        assert_eq!(leaf.renew_address().unwrap(), NetAddress(0o1));
        assert!(leaf.is_connected());
        assert_eq!(network.stats().dropped, 1);
    }

    #[test]
    fn oversized_frames_are_refused() {
        let network = SimNetwork::new(1);
        let mut master = joined(&network, NodeId::COORDINATOR);
        let body = vec![0u8; MAX_FRAME_BODY + 1];
        assert!(matches!(
            master.write(&body, REQUEST_TAG, NodeId::COORDINATOR),
            Err(MeshError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn total_loss_drops_everything() {
        let network = SimNetwork::new(9).with_loss(1.0);
        let mut master = joined(&network, NodeId::COORDINATOR);
        let _leaf = joined(&network, id(1));
        master.service_address_assignment();
        assert!(master.write(b"x", REQUEST_TAG, id(1)).is_err());
        assert_eq!(network.stats(), NetworkStats { delivered: 0, dropped: 1 });
    }
}
