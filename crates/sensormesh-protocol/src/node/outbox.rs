use crate::envelope::Header;
use crate::payload::{RegistrationPayload, RequestPayload, ResponsePayload};
use crate::text::BoundedText;
use crate::types::{NetAddress, NodeId, RequestId};

/// Send path a handler reaches through its [`Outbox`].
///
/// Implemented by the dispatching node; every call goes through the regular
/// send operations, including recovery on a failed leaf send.
pub(crate) trait Transmit {
    fn next_request_id(&mut self) -> RequestId;
    fn transmit_request(&mut self, payload: &RequestPayload, to: NodeId) -> bool;
    fn transmit_response(&mut self, payload: &ResponsePayload, to: NodeId) -> bool;
    fn transmit_to_address(&mut self, payload: &ResponsePayload, address: NetAddress) -> bool;
}

/// Send context handed to every handler.
///
/// Messages go out immediately, before the node reads the next inbound
/// frame. Each method reports its outcome; a failed message is not retried.
pub struct Outbox<'a> {
    node: &'a mut dyn Transmit,
    failures: usize,
}

impl<'a> Outbox<'a> {
    pub(crate) fn new(node: &'a mut dyn Transmit) -> Self {
        Self { node, failures: 0 }
    }

    /// Answer a request, addressed to whichever node sent `header`.
    pub fn respond_to_request(
        &mut self,
        value: impl Into<BoundedText>,
        request: &RequestPayload,
        header: &Header,
    ) -> bool {
        let payload = ResponsePayload::answering(request.request_id, value);
        let sent = self.node.transmit_to_address(&payload, header.from_node);
        self.tally(sent)
    }

    /// Answer a registration, addressed to the registering node.
    pub fn respond_to_registration(
        &mut self,
        value: impl Into<BoundedText>,
        registration: &RegistrationPayload,
    ) -> bool {
        let payload = ResponsePayload::answering(registration.request_id, value);
        let sent = self.node.transmit_response(&payload, registration.node_id);
        self.tally(sent)
    }

    /// Answer `request_id` with an explicit destination.
    pub fn respond(&mut self, value: impl Into<BoundedText>, request_id: RequestId, to: NodeId) -> bool {
        let payload = ResponsePayload::answering(request_id, value);
        let sent = self.node.transmit_response(&payload, to);
        self.tally(sent)
    }

    /// Ask `to` for an attribute. Returns the id the response will carry,
    /// or `None` if the request could not be sent.
    pub fn request(&mut self, attribute: impl Into<BoundedText>, to: NodeId) -> Option<RequestId> {
        let payload = RequestPayload {
            request_id: self.node.next_request_id(),
            attribute_requested: attribute.into(),
        };
        let sent = self.node.transmit_request(&payload, to);
        self.tally(sent).then_some(payload.request_id)
    }

    /// Sends that failed through this outbox so far.
    pub fn failures(&self) -> usize {
        self.failures
    }

    fn tally(&mut self, sent: bool) -> bool {
        if !sent {
            self.failures += 1;
        }
        sent
    }
}
