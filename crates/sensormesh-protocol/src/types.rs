use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Wire tag for registration messages (leaf → coordinator).
pub const REGISTRATION_TAG: u8 = 70;

/// Wire tag for attribute requests.
pub const REQUEST_TAG: u8 = 71;

/// Wire tag for responses to a request or registration.
pub const RESPONSE_TAG: u8 = 72;

/// Multiplier applied to the request counter when composing a [`RequestId`].
///
/// Must stay above [`NodeId::MAX`] so the originating node can be
/// recovered from any id.
pub const REQUEST_ID_STRIDE: u64 = 100;

/// Mesh identity of a node.
///
/// `0` is the coordinator ("master"); every other value is a leaf.
/// Identities are limited to `0..=99` so that request ids stay unique
/// across the whole mesh.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct NodeId(u8);

impl NodeId {
    /// The coordinator identity.
    pub const COORDINATOR: NodeId = NodeId(0);

    /// Highest valid identity.
    pub const MAX: u8 = 99;

    pub fn new(value: u8) -> Result<Self, ProtocolError> {
        if value > Self::MAX {
            return Err(ProtocolError::InvalidNodeId {
                value,
                max: Self::MAX,
            });
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_coordinator(self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport address assigned by the mesh.
///
/// Addresses are octal-structured (each digit is one hop in the tree), so
/// they display in octal with a leading zero: the coordinator is `00`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetAddress(pub u16);

impl NetAddress {
    /// Address of the coordinator.
    pub const MASTER: NetAddress = NetAddress(0);
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0{:o}", self.0)
    }
}

/// Classification of a frame by its header tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Registration,
    Request,
    Response,
    /// Traffic this layer does not understand. Drained without interpretation.
    Other(u8),
}

impl MessageKind {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            REGISTRATION_TAG => MessageKind::Registration,
            REQUEST_TAG => MessageKind::Request,
            RESPONSE_TAG => MessageKind::Response,
            other => MessageKind::Other(other),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            MessageKind::Registration => REGISTRATION_TAG,
            MessageKind::Request => REQUEST_TAG,
            MessageKind::Response => RESPONSE_TAG,
            MessageKind::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Registration => write!(f, "registration"),
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
            MessageKind::Other(tag) => write!(f, "unknown({tag})"),
        }
    }
}

/// Correlation token linking a request or registration to its response.
///
/// Composed as `node_id + counter * 100`. Because node ids never exceed
/// 99, the pair (origin, sequence) can always be read back and two nodes
/// never produce the same id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    pub fn compose(node_id: NodeId, counter: u64) -> Self {
        Self(u64::from(node_id.get()) + counter * REQUEST_ID_STRIDE)
    }

    /// Node that generated this id.
    pub fn origin(self) -> NodeId {
        // Always < 100, so always a valid identity.
        NodeId((self.0 % REQUEST_ID_STRIDE) as u8)
    }

    /// Counter value at generation time.
    pub fn sequence(self) -> u64 {
        self.0 / REQUEST_ID_STRIDE
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
