use serde::{Deserialize, Serialize};

use crate::types::{MessageKind, NetAddress};

/// Per-frame metadata, readable without consuming the frame.
///
/// `from_node` / `to_node` are transport addresses, not node identities:
/// use [`MeshLink::node_id_of`](crate::MeshLink::node_id_of) to map the
/// sender back to its [`NodeId`](crate::NodeId).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Raw message type tag.
    pub msg_type: u8,
    /// Sender address.
    pub from_node: NetAddress,
    /// Receiver address.
    pub to_node: NetAddress,
}

impl Header {
    pub fn new(kind: MessageKind, from_node: NetAddress, to_node: NetAddress) -> Self {
        Self {
            msg_type: kind.tag(),
            from_node,
            to_node,
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::from_tag(self.msg_type)
    }
}

/// One inbound frame as handed over by the mesh: header plus encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(header: Header, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::REQUEST_TAG;

    #[test]
    fn header_kind_follows_tag() {
        let header = Header::new(MessageKind::Request, NetAddress(0o3), NetAddress::MASTER);
        assert_eq!(header.msg_type, REQUEST_TAG);
        assert_eq!(header.kind(), MessageKind::Request);

        let foreign = Header {
            msg_type: 200,
            from_node: NetAddress(0o1),
            to_node: NetAddress::MASTER,
        };
        assert_eq!(foreign.kind(), MessageKind::Other(200));
    }
}
