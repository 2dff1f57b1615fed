//! Structured node events.
//!
//! The node never prints anything itself: every observable step is
//! reported as a [`NodeEvent`] to the configured [`EventSink`]. The
//! default sink forwards to `tracing`.
use serde::Serialize;

use crate::types::{MessageKind, NetAddress, NodeId, RequestId};

/// Why a leaf node entered recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LossTrigger {
    /// The periodic connectivity probe failed.
    Probe,
    /// A send operation could not deliver its frame.
    SendFailure,
    /// A previous recovery did not complete; retrying.
    Retry,
}

/// Something the node did or observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NodeEvent {
    MeshStarted {
        node_id: NodeId,
        address: NetAddress,
    },
    SendAttempted {
        kind: MessageKind,
        to: NodeId,
        request_id: RequestId,
    },
    SendSucceeded {
        kind: MessageKind,
        to: NodeId,
        request_id: RequestId,
    },
    SendFailed {
        kind: MessageKind,
        to: NodeId,
        request_id: RequestId,
        reason: String,
    },
    ConnectionLost {
        trigger: LossTrigger,
    },
    AddressRenewed {
        address: NetAddress,
    },
    /// Recovery finished; `reregistered` is false when no sensor type was ever declared.
    Recovered {
        reregistered: bool,
    },
    /// Recovery stopped early and will be retried on the next tick.
    RecoveryIncomplete {
        reason: String,
    },
    Dispatched {
        kind: MessageKind,
        from: NetAddress,
        request_id: RequestId,
    },
    Discarded {
        msg_type: u8,
        from: NetAddress,
    },
}

/// Receiver for [`NodeEvent`]s.
pub trait EventSink {
    fn on_event(&mut self, event: &NodeEvent);
}

impl<F> EventSink for F
where
    F: FnMut(&NodeEvent),
{
    fn on_event(&mut self, event: &NodeEvent) {
        self(event)
    }
}

/// Default sink: one `tracing` record per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&mut self, event: &NodeEvent) {
        match event {
            NodeEvent::MeshStarted { node_id, address } => {
                tracing::info!("node {node_id}: on the mesh at address {address}");
            }
            NodeEvent::SendAttempted { kind, to, request_id } => {
                tracing::trace!("send {kind} #{request_id} to node {to}");
            }
            NodeEvent::SendSucceeded { kind, to, request_id } => {
                tracing::debug!("sent {kind} #{request_id} to node {to}");
            }
            NodeEvent::SendFailed {
                kind,
                to,
                request_id,
                reason,
            } => {
                tracing::warn!("send {kind} #{request_id} to node {to} failed: {reason}");
            }
            NodeEvent::ConnectionLost { trigger } => {
                tracing::warn!("mesh connection lost ({trigger:?}), reconnecting");
            }
            NodeEvent::AddressRenewed { address } => {
                tracing::info!("address renewed: {address}");
            }
            NodeEvent::Recovered { reregistered } => {
                tracing::info!("reconnected (re-registered: {reregistered})");
            }
            NodeEvent::RecoveryIncomplete { reason } => {
                tracing::warn!("recovery incomplete: {reason}");
            }
            NodeEvent::Dispatched {
                kind,
                from,
                request_id,
            } => {
                tracing::debug!("dispatched {kind} #{request_id} from {from}");
            }
            NodeEvent::Discarded { msg_type, from } => {
                tracing::debug!("discarded frame with tag {msg_type} from {from}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |event: &NodeEvent| seen.push(event.clone());
            sink.on_event(&NodeEvent::Recovered { reregistered: true });
        }
        assert_eq!(seen, vec![NodeEvent::Recovered { reregistered: true }]);
    }

    #[test]
    fn tracing_sink_accepts_every_event() {
        let mut sink = TracingSink;
        sink.on_event(&NodeEvent::ConnectionLost {
            trigger: LossTrigger::Probe,
        });
        sink.on_event(&NodeEvent::Discarded {
            msg_type: 200,
            from: NetAddress(0o5),
        });
    }
}
