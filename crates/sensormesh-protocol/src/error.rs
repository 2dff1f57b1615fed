use crate::mesh::MeshError;
use crate::types::MessageKind;

/// Protocol-level errors for SensorMesh.
///
/// Transmission failures are not errors at this level (send operations
/// report them as `false`); these variants cover configuration mistakes,
/// misuse of the receive operations and wire decoding problems.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid node id {value} (max {max})")]
    InvalidNodeId { value: u8, max: u8 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no handler registered for {kind} messages")]
    MissingHandler { kind: MessageKind },

    #[error("expected a {expected} message, found {found}")]
    UnexpectedMessage {
        expected: MessageKind,
        found: MessageKind,
    },

    #[error("no message available")]
    NoMessage,

    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(e.to_string())
    }
}
