//! Wire payloads for the three message kinds.
//!
//! Encoded as MessagePack. Every text field is a [`BoundedText`], so the
//! encoded size stays small and fixed-bounded whatever the caller passes in.
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::text::BoundedText;
use crate::types::{MessageKind, NodeId, RequestId};

/// Common behavior of the typed payloads.
pub trait Payload: Serialize + DeserializeOwned {
    /// Kind written into the header when this payload is sent.
    const KIND: MessageKind;

    /// Correlation id carried by the payload.
    fn request_id(&self) -> RequestId;

    /// Serialize to MessagePack bytes.
    fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

/// Sent by a leaf when it joins or rejoins the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub request_id: RequestId,
    pub node_id: NodeId,
    pub sensor_type: BoundedText,
}

impl Payload for RegistrationPayload {
    const KIND: MessageKind = MessageKind::Registration;

    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// Asks the receiving node for one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub request_id: RequestId,
    pub attribute_requested: BoundedText,
}

impl Payload for RequestPayload {
    const KIND: MessageKind = MessageKind::Request;

    fn request_id(&self) -> RequestId {
        self.request_id
    }
}

/// Answer to a request or registration; `request_id` is copied from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub request_id: RequestId,
    pub value: BoundedText,
}

impl ResponsePayload {
    pub fn answering(request_id: RequestId, value: impl Into<BoundedText>) -> Self {
        Self {
            request_id,
            value: value.into(),
        }
    }
}

impl Payload for ResponsePayload {
    const KIND: MessageKind = MessageKind::Response;

    fn request_id(&self) -> RequestId {
        self.request_id
    }
}
