//! Connection monitor and recovery for leaf nodes.
//!
//! Two states: `Connected` and `Recovering`. Recovery is synchronous: renew
//! the address, then replay the retained registration, within the call that
//! detected the loss. If either step fails the node stays `Recovering` and
//! the next tick retries without waiting for another failed probe.
use crate::events::{LossTrigger, NodeEvent};
use crate::mesh::MeshLink;
use crate::types::NodeId;

use super::SensorNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Recovering,
}

impl<M: MeshLink> SensorNode<M> {
    /// Run the monitor once.
    ///
    /// The coordinator is always considered connected.
    pub(super) fn check_connection(&mut self) {
        if self.is_coordinator() {
            return;
        }
        if self.state == ConnectionState::Recovering {
            self.recover(LossTrigger::Retry);
        } else if !self.mesh.is_connected() {
            self.recover(LossTrigger::Probe);
        }
    }

    /// Renew the address and re-register with the retained sensor type.
    ///
    /// The registration goes through `attempt`, so a failure here never
    /// recurses into another recovery.
    pub(super) fn recover(&mut self, trigger: LossTrigger) {
        self.state = ConnectionState::Recovering;
        self.recoveries += 1;
        self.emit(NodeEvent::ConnectionLost { trigger });

        match self.mesh.renew_address() {
            Ok(address) => self.emit(NodeEvent::AddressRenewed { address }),
            Err(e) => {
                self.emit(NodeEvent::RecoveryIncomplete {
                    reason: e.to_string(),
                });
                return;
            }
        }

        // Never registered: nothing to replay.
        let Some(sensor_type) = self.sensor_type.clone() else {
            self.state = ConnectionState::Connected;
            self.emit(NodeEvent::Recovered {
                reregistered: false,
            });
            return;
        };

        let payload = self.registration_payload(sensor_type);
        match self.attempt(&payload, NodeId::COORDINATOR) {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.emit(NodeEvent::Recovered { reregistered: true });
            }
            Err(e) => self.emit(NodeEvent::RecoveryIncomplete {
                reason: e.to_string(),
            }),
        }
    }
}
