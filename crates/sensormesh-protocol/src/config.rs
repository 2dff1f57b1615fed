use crate::error::ProtocolError;
use crate::text::BoundedText;
use crate::types::NodeId;

/// Environment variable holding the node identity (`0` or unset: coordinator).
pub const NODE_ID_ENV: &str = "SENSORMESH_NODE_ID";

/// Environment variable holding the sensor type to register with.
pub const SENSOR_TYPE_ENV: &str = "SENSORMESH_SENSOR_TYPE";

/// Configuration for a [`SensorNode`](crate::SensorNode).
///
/// ```rust
/// use sensormesh_protocol::NodeConfig;
///
/// let leaf = NodeConfig::leaf(3)?.sensor_type("humidity");
/// assert!(!leaf.node_id.is_coordinator());
///
/// let master = NodeConfig::coordinator();
/// assert!(master.node_id.is_coordinator());
/// # Ok::<(), sensormesh_protocol::ProtocolError>(())
/// ```
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity of this node; `0` makes it the coordinator.
    pub node_id: NodeId,
    /// Sensor type to register with right after joining the mesh.
    ///
    /// Ignored on the coordinator. When `None`, the host calls
    /// `register_at_master` itself.
    pub sensor_type: Option<BoundedText>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::coordinator()
    }
}

impl NodeConfig {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            sensor_type: None,
        }
    }

    pub fn coordinator() -> Self {
        Self::new(NodeId::COORDINATOR)
    }

    /// Leaf node config. Fails if `node_id` is outside `1..=99`.
    pub fn leaf(node_id: u8) -> Result<Self, ProtocolError> {
        let node_id = NodeId::new(node_id)?;
        if node_id.is_coordinator() {
            return Err(ProtocolError::Config(format!(
                "leaf identity must be 1..={}",
                NodeId::MAX
            )));
        }
        Ok(Self::new(node_id))
    }

    /// Build a config from [`NODE_ID_ENV`] and [`SENSOR_TYPE_ENV`].
    ///
    /// An unset node id means coordinator. An empty sensor type is ignored.
    pub fn from_env() -> Result<Self, ProtocolError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ProtocolError> {
        let node_id = match get(NODE_ID_ENV) {
            Some(raw) => {
                let value: u8 = raw.trim().parse().map_err(|_| {
                    ProtocolError::Config(format!("{NODE_ID_ENV}={raw:?} is not a node id"))
                })?;
                NodeId::new(value)?
            }
            None => NodeId::COORDINATOR,
        };

        let mut config = Self::new(node_id);
        if let Some(sensor_type) = get(SENSOR_TYPE_ENV).filter(|s| !s.is_empty()) {
            config = config.sensor_type(sensor_type);
        }
        Ok(config)
    }

    /// Register with this sensor type as part of `start_mesh`.
    pub fn sensor_type(mut self, sensor_type: impl Into<BoundedText>) -> Self {
        self.sensor_type = Some(sensor_type.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_is_coordinator() {
        let config = NodeConfig::default();
        assert!(config.node_id.is_coordinator());
        assert!(config.sensor_type.is_none());
    }

    #[test]
    fn leaf_rejects_zero_and_out_of_range() {
        let err = NodeConfig::leaf(0).unwrap_err();
        assert!(matches!(err, ProtocolError::Config(_)));
        assert_eq!(err.to_string(), "invalid configuration: leaf identity must be 1..=99");
        assert!(matches!(
            NodeConfig::leaf(100),
            Err(ProtocolError::InvalidNodeId { value: 100, .. })
        ));
        assert_eq!(NodeConfig::leaf(12).unwrap().node_id.get(), 12);
    }

    #[test]
    fn sensor_type_is_bounded() {
        let config = NodeConfig::leaf(4)
            .unwrap()
            .sensor_type("barometric-pressure-sensor-v2");
        assert_eq!(config.sensor_type.unwrap().as_str(), "barometric-pressure-");
    }

    #[test]
    fn from_vars_reads_identity_and_type() {
        let config =
            NodeConfig::from_vars(vars(&[(NODE_ID_ENV, " 7 "), (SENSOR_TYPE_ENV, "rain")])).unwrap();
        assert_eq!(config.node_id.get(), 7);
        assert_eq!(config.sensor_type.unwrap(), "rain");
    }

    #[test]
    fn from_vars_defaults_to_coordinator() {
        let config = NodeConfig::from_vars(vars(&[(SENSOR_TYPE_ENV, "")])).unwrap();
        assert!(config.node_id.is_coordinator());
        assert!(config.sensor_type.is_none());
    }

    #[test]
    fn from_vars_rejects_bad_identity() {
        assert!(matches!(
            NodeConfig::from_vars(vars(&[(NODE_ID_ENV, "leaf")])),
            Err(ProtocolError::Config(_))
        ));
        assert!(matches!(
            NodeConfig::from_vars(vars(&[(NODE_ID_ENV, "150")])),
            Err(ProtocolError::InvalidNodeId { value: 150, .. })
        ));
    }
}
