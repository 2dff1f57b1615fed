use crate::envelope::{Frame, Header};
use crate::types::{NetAddress, NodeId};

/// Largest frame body a mesh is expected to carry in one write.
pub const MAX_FRAME_BODY: usize = 144;

/// Errors reported by a [`MeshLink`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("could not join the mesh: {0}")]
    Join(String),

    #[error("no route to node {node_id}")]
    Unroutable { node_id: NodeId },

    #[error("write to node {node_id} failed: {reason}")]
    Write { node_id: NodeId, reason: String },

    #[error("address renewal failed: {0}")]
    Renewal(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("mesh not started")]
    NotStarted,
}

/// Mesh, network and radio layer underneath the protocol.
///
/// In production: implemented over the radio driver's mesh stack.
/// In tests: `mock::MockMesh` (records writes, scripted connectivity).
/// The simulator crate provides an in-memory multi-node implementation.
///
/// Every method is synchronous; the protocol polls, it never awaits.
pub trait MeshLink {
    /// Assign the node identity before [`begin`](Self::begin).
    fn set_node_id(&mut self, node_id: NodeId);

    /// Create (coordinator) or join (leaf) the mesh. Returns the address obtained.
    fn begin(&mut self) -> Result<NetAddress, MeshError>;

    /// Per-tick bookkeeping: pump the network, route pending traffic.
    fn refresh(&mut self);

    /// Coordinator only: hand out addresses to joining nodes.
    fn service_address_assignment(&mut self);

    /// Probe whether this node is still reachable from the coordinator.
    fn is_connected(&mut self) -> bool;

    /// Drop the current address and obtain a new one.
    fn renew_address(&mut self) -> Result<NetAddress, MeshError>;

    /// Whether at least one inbound frame is queued.
    fn available(&self) -> bool;

    /// Header of the head frame, without consuming it.
    fn peek_header(&self) -> Option<Header>;

    /// Consume the head frame.
    fn read(&mut self) -> Option<Frame>;

    /// Send `body` tagged with `msg_type` to the node with identity `to`.
    fn write(&mut self, body: &[u8], msg_type: u8, to: NodeId) -> Result<(), MeshError>;

    /// Map a transport address back to the node identity holding it.
    fn node_id_of(&self, address: NetAddress) -> Option<NodeId>;

    /// Assigned (identity, address) pairs, as known to this node.
    ///
    /// Only the coordinator keeps the full table; leaves return nothing by default.
    fn address_table(&self) -> Vec<(NodeId, NetAddress)> {
        Vec::new()
    }
}

// ── MockMesh (tests) ────────────────────────────────────────────────
