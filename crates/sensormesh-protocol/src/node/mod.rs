//! Sensor node: one protocol participant driven by repeated `tick()` calls.
//!
//! The node owns its mesh link and all protocol state (request counter,
//! retained sensor type, connection state, handler slots). It never blocks
//! or schedules itself: the host polls, the node does one bounded round of
//! work per call.
mod outbox;
mod recovery;
mod send;

pub use outbox::Outbox;
pub use recovery::ConnectionState;

use crate::config::NodeConfig;
use crate::envelope::Header;
use crate::error::ProtocolError;
use crate::events::{EventSink, NodeEvent, TracingSink};
use crate::mesh::MeshLink;
use crate::payload::{Payload, RegistrationPayload, RequestPayload, ResponsePayload};
use crate::request_id::RequestIdGenerator;
use crate::text::BoundedText;
use crate::types::{MessageKind, NetAddress, NodeId};

type RegistrationHandler = Box<dyn FnMut(RegistrationPayload, &Header, &mut Outbox<'_>)>;
type RequestHandler = Box<dyn FnMut(RequestPayload, &Header, &mut Outbox<'_>)>;
type ResponseHandler = Box<dyn FnMut(ResponsePayload, &Header, &mut Outbox<'_>)>;

/// Summary of one `tick()` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Frames handed to a handler.
    pub dispatched: usize,
    /// Frames consumed without a handler (unknown type or undecodable body).
    pub discarded: usize,
    /// Whether a recovery ran this tick, from the connection monitor or
    /// from a failed send made by a handler.
    pub recovered: bool,
    /// Sends that failed this tick, including those made by handlers.
    pub send_failures: usize,
}

/// A mesh participant: coordinator when its identity is 0, leaf otherwise.
pub struct SensorNode<M: MeshLink> {
    mesh: M,
    config: NodeConfig,
    ids: RequestIdGenerator,
    sensor_type: Option<BoundedText>,
    state: ConnectionState,
    recoveries: u64,
    send_failures: u64,
    on_registration: Option<RegistrationHandler>,
    on_request: Option<RequestHandler>,
    on_response: Option<ResponseHandler>,
    events: Box<dyn EventSink>,
}

impl<M: MeshLink> SensorNode<M> {
    pub fn new(mesh: M, config: NodeConfig) -> Self {
        Self {
            ids: RequestIdGenerator::new(config.node_id),
            mesh,
            config,
            sensor_type: None,
            state: ConnectionState::Connected,
            recoveries: 0,
            send_failures: 0,
            on_registration: None,
            on_request: None,
            on_response: None,
            events: Box::new(TracingSink),
        }
    }

    /// Replace the default `tracing` sink.
    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Box::new(sink);
        self
    }

    // ── Bootstrap ────────────────────────────────────────────────────────

    /// Assign the identity, then create (coordinator) or join (leaf) the mesh.
    ///
    /// If the config carries a sensor type, a leaf registers right away; a
    /// failed registration is handled like any other send failure.
    pub fn start_mesh(&mut self) -> Result<NetAddress, ProtocolError> {
        let node_id = self.config.node_id;
        self.mesh.set_node_id(node_id);
        if node_id.is_coordinator() {
            tracing::info!("creating mesh as coordinator");
        } else {
            tracing::info!("node {node_id}: connecting to the mesh");
        }

        let address = self.mesh.begin()?;
        self.emit(NodeEvent::MeshStarted { node_id, address });

        if !node_id.is_coordinator() {
            if let Some(sensor_type) = self.config.sensor_type.clone() {
                self.register_at_master(sensor_type);
            }
        }
        Ok(address)
    }

    // ── Handler slots ────────────────────────────────────────────────────

    pub fn set_registration_handler<F>(&mut self, handler: F)
    where
        F: FnMut(RegistrationPayload, &Header, &mut Outbox<'_>) + 'static,
    {
        self.on_registration = Some(Box::new(handler));
    }

    pub fn set_request_handler<F>(&mut self, handler: F)
    where
        F: FnMut(RequestPayload, &Header, &mut Outbox<'_>) + 'static,
    {
        self.on_request = Some(Box::new(handler));
    }

    pub fn set_response_handler<F>(&mut self, handler: F)
    where
        F: FnMut(ResponsePayload, &Header, &mut Outbox<'_>) + 'static,
    {
        self.on_response = Some(Box::new(handler));
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn is_coordinator(&self) -> bool {
        self.config.node_id.is_coordinator()
    }

    /// Counter value the next request id will use.
    pub fn request_counter(&self) -> u64 {
        self.ids.counter()
    }

    /// Last sensor type this node registered with.
    pub fn sensor_type(&self) -> Option<&BoundedText> {
        self.sensor_type.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Recoveries started since this node was created.
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// Failed sends since this node was created.
    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut M {
        &mut self.mesh
    }

    /// Addresses the coordinator has handed out, by node identity.
    pub fn address_table(&self) -> Vec<(NodeId, NetAddress)> {
        self.mesh.address_table()
    }

    // ── Tick: dispatch loop ──────────────────────────────────────────────

    /// One polling round.
    ///
    /// Order: mesh bookkeeping, address assignment (coordinator), connection
    /// monitor (leaf), then every queued inbound frame is dispatched before
    /// returning. Fails only if a handler slot is still empty, in which case
    /// nothing is touched.
    pub fn tick(&mut self) -> Result<TickReport, ProtocolError> {
        self.ensure_handlers()?;
        let mut report = TickReport::default();
        let (recoveries, send_failures) = (self.recoveries, self.send_failures);

        self.mesh.refresh();
        if self.is_coordinator() {
            self.mesh.service_address_assignment();
        }
        self.check_connection();

        while self.mesh.available() {
            let Some(header) = self.mesh.peek_header() else {
                break;
            };
            let dispatched = match header.kind() {
                MessageKind::Registration => self.dispatch_registration(header),
                MessageKind::Request => self.dispatch_request(header),
                MessageKind::Response => self.dispatch_response(header),
                MessageKind::Other(msg_type) => {
                    self.mesh.read();
                    self.emit(NodeEvent::Discarded {
                        msg_type,
                        from: header.from_node,
                    });
                    false
                }
            };
            if dispatched {
                report.dispatched += 1;
            } else {
                report.discarded += 1;
            }
        }
        report.recovered = self.recoveries > recoveries;
        report.send_failures = (self.send_failures - send_failures) as usize;
        Ok(report)
    }

    fn ensure_handlers(&self) -> Result<(), ProtocolError> {
        let missing = if self.on_registration.is_none() {
            Some(MessageKind::Registration)
        } else if self.on_request.is_none() {
            Some(MessageKind::Request)
        } else if self.on_response.is_none() {
            Some(MessageKind::Response)
        } else {
            None
        };
        match missing {
            Some(kind) => Err(ProtocolError::MissingHandler { kind }),
            None => Ok(()),
        }
    }

    // Each handler is taken out of its slot while it runs, so the outbox can
    // borrow the whole node.

    fn dispatch_registration(&mut self, header: Header) -> bool {
        let Some(payload) = self.read_for_dispatch::<RegistrationPayload>(&header) else {
            return false;
        };
        if let Some(mut handler) = self.on_registration.take() {
            handler(payload, &header, &mut Outbox::new(self));
            self.on_registration = Some(handler);
        }
        true
    }

    fn dispatch_request(&mut self, header: Header) -> bool {
        let Some(payload) = self.read_for_dispatch::<RequestPayload>(&header) else {
            return false;
        };
        if let Some(mut handler) = self.on_request.take() {
            handler(payload, &header, &mut Outbox::new(self));
            self.on_request = Some(handler);
        }
        true
    }

    fn dispatch_response(&mut self, header: Header) -> bool {
        let Some(payload) = self.read_for_dispatch::<ResponsePayload>(&header) else {
            return false;
        };
        if let Some(mut handler) = self.on_response.take() {
            handler(payload, &header, &mut Outbox::new(self));
            self.on_response = Some(handler);
        }
        true
    }

    /// Consume the head frame as `P`. Undecodable frames are dropped.
    fn read_for_dispatch<P: Payload>(&mut self, header: &Header) -> Option<P> {
        match self.read_payload::<P>() {
            Ok(payload) => {
                self.emit(NodeEvent::Dispatched {
                    kind: P::KIND,
                    from: header.from_node,
                    request_id: payload.request_id(),
                });
                Some(payload)
            }
            Err(e) => {
                tracing::debug!("bad {} frame from {}: {e}", P::KIND, header.from_node);
                self.emit(NodeEvent::Discarded {
                    msg_type: header.msg_type,
                    from: header.from_node,
                });
                None
            }
        }
    }

    pub(crate) fn emit(&mut self, event: NodeEvent) {
        self.events.on_event(&event);
    }
}
