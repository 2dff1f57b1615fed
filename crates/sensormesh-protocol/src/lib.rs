//! SensorMesh protocol layer.
//!
//! Registration, attribute request/response and connection recovery for
//! sensor nodes on a self-organizing radio mesh. The mesh itself (address
//! assignment, routing, the radio) sits behind the [`MeshLink`] trait.
//!
//! Wire format: MessagePack (compact binary), one frame per message, the
//! header tag selecting the payload type.
//!
//! A node is driven by polling: the host calls [`SensorNode::tick`] in its
//! main loop, and every inbound frame is dispatched to the matching handler
//! before `tick` returns.

pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod mesh;
pub mod node;
pub mod payload;
pub mod request_id;
pub mod text;
pub mod types;

pub use config::NodeConfig;
pub use envelope::{Frame, Header};
pub use error::ProtocolError;
pub use events::{EventSink, LossTrigger, NodeEvent, TracingSink};
pub use mesh::{MeshError, MeshLink, MAX_FRAME_BODY};
pub use node::{ConnectionState, Outbox, SensorNode, TickReport};
pub use payload::{Payload, RegistrationPayload, RequestPayload, ResponsePayload};
pub use request_id::RequestIdGenerator;
pub use text::{BoundedText, MAX_TEXT_LEN};
pub use types::{
    MessageKind, NetAddress, NodeId, RequestId, REGISTRATION_TAG, REQUEST_ID_STRIDE, REQUEST_TAG,
    RESPONSE_TAG,
};
