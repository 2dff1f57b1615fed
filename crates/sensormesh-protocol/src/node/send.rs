//! Send / receive operations and the registration flow.
//!
//! Every send reports success as a `bool`. A failed send on a leaf runs one
//! synchronous recovery before returning; the failed message itself is not
//! retried. A reply whose destination address cannot be resolved counts as a
//! failed send.
use crate::envelope::Header;
use crate::error::ProtocolError;
use crate::events::{LossTrigger, NodeEvent};
use crate::mesh::MeshLink;
use crate::payload::{Payload, RegistrationPayload, RequestPayload, ResponsePayload};
use crate::text::BoundedText;
use crate::types::{NetAddress, NodeId, RequestId};

use super::outbox::Transmit;
use super::SensorNode;

impl<M: MeshLink> SensorNode<M> {
    // ── Registration ─────────────────────────────────────────────────────

    /// Remember `sensor_type` and register it with the coordinator.
    pub fn register_at_master(&mut self, sensor_type: impl Into<BoundedText>) -> bool {
        let sensor_type = sensor_type.into();
        self.sensor_type = Some(sensor_type.clone());
        let payload = self.registration_payload(sensor_type);
        self.send_registration(&payload)
    }

    pub fn send_registration(&mut self, payload: &RegistrationPayload) -> bool {
        self.send_payload(payload, NodeId::COORDINATOR)
    }

    pub(super) fn registration_payload(&mut self, sensor_type: BoundedText) -> RegistrationPayload {
        RegistrationPayload {
            request_id: self.ids.next_id(),
            node_id: self.node_id(),
            sensor_type,
        }
    }

    // ── Requests ─────────────────────────────────────────────────────────

    pub fn send_request(&mut self, payload: &RequestPayload, to: NodeId) -> bool {
        self.send_payload(payload, to)
    }

    /// Ask `to` for `attribute` under a fresh request id.
    ///
    /// Returns the id on success so the caller can match the response.
    pub fn request(&mut self, attribute: impl Into<BoundedText>, to: NodeId) -> Option<RequestId> {
        let payload = RequestPayload {
            request_id: self.ids.next_id(),
            attribute_requested: attribute.into(),
        };
        self.send_request(&payload, to).then_some(payload.request_id)
    }

    // ── Responses ────────────────────────────────────────────────────────

    pub fn send_response(&mut self, payload: &ResponsePayload, to: NodeId) -> bool {
        self.send_payload(payload, to)
    }

    /// Answer `request` by sending `value` to `to`.
    pub fn respond(
        &mut self,
        value: impl Into<BoundedText>,
        request: &RequestPayload,
        to: NodeId,
    ) -> bool {
        let payload = ResponsePayload::answering(request.request_id, value);
        self.send_response(&payload, to)
    }

    /// Answer `request` back to the node that sent `header`.
    ///
    /// The destination is resolved from the header's sender address, never
    /// from the request id. If the mesh cannot resolve it, nothing is sent
    /// and the call fails like any other send.
    pub fn respond_to_header(
        &mut self,
        value: impl Into<BoundedText>,
        request: &RequestPayload,
        header: &Header,
    ) -> bool {
        let payload = ResponsePayload::answering(request.request_id, value);
        self.respond_to_address(&payload, header.from_node)
    }

    /// Answer a registration, addressed to the registering node.
    pub fn respond_to_registration(
        &mut self,
        value: impl Into<BoundedText>,
        registration: &RegistrationPayload,
    ) -> bool {
        let payload = ResponsePayload::answering(registration.request_id, value);
        self.send_response(&payload, registration.node_id)
    }

    fn respond_to_address(&mut self, payload: &ResponsePayload, address: NetAddress) -> bool {
        match self.mesh.node_id_of(address) {
            Some(to) => self.send_response(payload, to),
            None => {
                tracing::warn!(
                    "response #{}: sender address {} is unknown, dropping",
                    payload.request_id,
                    address
                );
                self.send_failures += 1;
                self.after_failed_send();
                false
            }
        }
    }

    // ── Receive ──────────────────────────────────────────────────────────

    pub fn read_registration(&mut self) -> Result<RegistrationPayload, ProtocolError> {
        self.read_payload()
    }

    pub fn read_request(&mut self) -> Result<RequestPayload, ProtocolError> {
        self.read_payload()
    }

    pub fn read_response(&mut self) -> Result<ResponsePayload, ProtocolError> {
        self.read_payload()
    }

    /// Consume the head frame as `P`.
    ///
    /// A head frame of another kind is left in place. A frame of the right
    /// kind is consumed even when its body fails to decode.
    pub(super) fn read_payload<P: Payload>(&mut self) -> Result<P, ProtocolError> {
        let header = self.mesh.peek_header().ok_or(ProtocolError::NoMessage)?;
        if header.kind() != P::KIND {
            return Err(ProtocolError::UnexpectedMessage {
                expected: P::KIND,
                found: header.kind(),
            });
        }
        let frame = self.mesh.read().ok_or(ProtocolError::NoMessage)?;
        P::from_bytes(&frame.body)
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Send, and recover the connection if the send fails on a leaf.
    fn send_payload<P: Payload>(&mut self, payload: &P, to: NodeId) -> bool {
        if self.attempt(payload, to).is_ok() {
            return true;
        }
        self.after_failed_send();
        false
    }

    /// A leaf treats any failed send as a lost connection.
    fn after_failed_send(&mut self) {
        if !self.is_coordinator() {
            self.recover(LossTrigger::SendFailure);
        }
    }

    /// One transmission attempt with its events; never triggers recovery.
    pub(super) fn attempt<P: Payload>(&mut self, payload: &P, to: NodeId) -> Result<(), ProtocolError> {
        let kind = P::KIND;
        let request_id = payload.request_id();
        self.emit(NodeEvent::SendAttempted {
            kind,
            to,
            request_id,
        });

        let result = payload
            .to_bytes()
            .and_then(|body| self.mesh.write(&body, kind.tag(), to).map_err(ProtocolError::from));

        match &result {
            Ok(()) => self.emit(NodeEvent::SendSucceeded {
                kind,
                to,
                request_id,
            }),
            Err(e) => {
                self.send_failures += 1;
                self.emit(NodeEvent::SendFailed {
                    kind,
                    to,
                    request_id,
                    reason: e.to_string(),
                });
            }
        }
        result
    }
}

impl<M: MeshLink> Transmit for SensorNode<M> {
    fn next_request_id(&mut self) -> RequestId {
        self.ids.next_id()
    }

    fn transmit_request(&mut self, payload: &RequestPayload, to: NodeId) -> bool {
        self.send_request(payload, to)
    }

    fn transmit_response(&mut self, payload: &ResponsePayload, to: NodeId) -> bool {
        self.send_response(payload, to)
    }

    fn transmit_to_address(&mut self, payload: &ResponsePayload, address: NetAddress) -> bool {
        self.respond_to_address(payload, address)
    }
}

#[cfg(test)]
mod tests {
    use crate::envelope::Header;
    use crate::error::ProtocolError;
    use crate::events::{LossTrigger, NodeEvent};
    use crate::node::fixtures::*;
    use crate::node::ConnectionState;
    use crate::payload::{RegistrationPayload, RequestPayload};
    use crate::types::{MessageKind, NetAddress, NodeId, RequestId, REGISTRATION_TAG, REQUEST_TAG};

    #[test]
    fn leaf_three_request_uses_id_103() {
        let (mut node, _) = leaf(3);
        assert_eq!(node.request_counter(), 1);

        let id = node.request("humidity", NodeId::COORDINATOR);
        assert_eq!(id, Some(RequestId(103)));
        assert_eq!(node.request_counter(), 2);

        let sent = &node.mesh().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type, REQUEST_TAG);
        assert_eq!(sent[0].to, NodeId::COORDINATOR);
        let payload: RequestPayload = sent[0].decode();
        assert_eq!(payload.attribute_requested, "humidity");
    }

    #[test]
    fn request_ids_increase_across_operations() {
        let (mut node, _) = leaf(8);
        let first = node.request("a", NodeId::COORDINATOR).unwrap();
        node.register_at_master("light");
        let third = node.request("b", NodeId::COORDINATOR).unwrap();
        assert!(first < third);
        assert_eq!(third, RequestId(308));
    }

    #[test]
    fn respond_to_header_resolves_sender() {
        let (mut master, _) = coordinator();
        master.mesh_mut().directory.insert(NetAddress(0o3), leaf_id(3));
        let req = request(103, "humidity");
        let header = Header::new(MessageKind::Request, NetAddress(0o3), NetAddress::MASTER);

        assert!(master.respond_to_header("55", &req, &header));
        assert_eq!(master.mesh().sent[0].to, leaf_id(3));
    }

    #[test]
    fn unknown_sender_address_fails_and_recovers_leaf() {
        let (mut node, log) = leaf(2);
        let header = Header::new(MessageKind::Request, NetAddress(0o44), NetAddress(0o1));

        assert!(!node.respond_to_header("x", &request(109, "t"), &header));
        assert_eq!(node.mesh().write_attempts, 0);
        assert_eq!(node.mesh().renewals, 1);
        assert_eq!(node.send_failures(), 1);
        assert_eq!(
            count(&log, |e| *e
                == NodeEvent::ConnectionLost {
                    trigger: LossTrigger::SendFailure
                }),
            1
        );
    }

    #[test]
    fn unknown_sender_address_on_coordinator_never_recovers() {
        let (mut master, log) = coordinator();
        let header = Header::new(MessageKind::Request, NetAddress(0o44), NetAddress::MASTER);

        assert!(!master.respond_to_header("x", &request(109, "t"), &header));
        assert_eq!(master.mesh().write_attempts, 0);
        assert_eq!(master.mesh().renewals, 0);
        assert_eq!(
            count(&log, |e| matches!(e, NodeEvent::ConnectionLost { .. })),
            0
        );
    }

    #[test]
    fn read_of_wrong_kind_leaves_frame_in_place() {
        let (mut node, _) = leaf(1);
        node.mesh_mut().push(NetAddress::MASTER, &request(100, "t"));

        assert!(matches!(
            node.read_response(),
            Err(ProtocolError::UnexpectedMessage {
                expected: MessageKind::Response,
                found: MessageKind::Request,
            })
        ));
        assert_eq!(node.mesh().inbound.len(), 1);

        let payload = node.read_request().unwrap();
        assert_eq!(payload.request_id, RequestId(100));
        assert!(matches!(node.read_registration(), Err(ProtocolError::NoMessage)));
    }

    #[test]
    fn send_failure_on_leaf_triggers_exactly_one_recovery() {
        let (mut node, log) = leaf(3);
        node.register_at_master("humidity");
        node.mesh_mut().fail_writes = true;
        let attempts_before = node.mesh().write_attempts;

        assert_eq!(node.request("temp", NodeId::COORDINATOR), None);
        assert_eq!(node.mesh().renewals, 1);
        // The failed request plus one re-registration; the request is not retried.
        assert_eq!(node.mesh().write_attempts - attempts_before, 2);
        assert_eq!(node.connection_state(), ConnectionState::Recovering);
        assert_eq!(
            count(&log, |e| matches!(
                e,
                NodeEvent::ConnectionLost {
                    trigger: LossTrigger::SendFailure
                }
            )),
            1
        );

        // Link is back: the next tick finishes the recovery.
        node.mesh_mut().fail_writes = false;
        node.mesh_mut().sent.clear();
        let report = node.tick().unwrap();
        assert!(report.recovered);
        assert_eq!(node.mesh().renewals, 2);
        assert_eq!(node.mesh().sent_with_tag(REGISTRATION_TAG).len(), 1);
        assert!(node.mesh().sent_with_tag(REQUEST_TAG).is_empty());
        assert_eq!(node.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn send_failure_on_coordinator_never_recovers() {
        let (mut master, log) = coordinator();
        master.mesh_mut().fail_writes = true;

        assert!(!master.respond_to_registration(
            "ok",
            &RegistrationPayload {
                request_id: RequestId(101),
                node_id: leaf_id(1),
                sensor_type: "t".into(),
            }
        ));
        assert_eq!(master.mesh().renewals, 0);
        assert_eq!(master.connection_state(), ConnectionState::Connected);
        assert_eq!(
            count(&log, |e| matches!(e, NodeEvent::SendFailed { .. })),
            1
        );
        assert_eq!(
            count(&log, |e| matches!(e, NodeEvent::ConnectionLost { .. })),
            0
        );
    }

    #[test]
    fn send_events_bracket_each_attempt() {
        let (mut node, log) = leaf(3);
        node.request("humidity", NodeId::COORDINATOR);
        let events = log.borrow();
        assert_eq!(
            *events,
            vec![
                NodeEvent::SendAttempted {
                    kind: MessageKind::Request,
                    to: NodeId::COORDINATOR,
                    request_id: RequestId(103),
                },
                NodeEvent::SendSucceeded {
                    kind: MessageKind::Request,
                    to: NodeId::COORDINATOR,
                    request_id: RequestId(103),
                },
            ]
        );
    }
}
