//! In-memory simulation of a SensorMesh network.
//!
//! [`SimNetwork`] implements the mesh layer for any number of nodes on one
//! thread; [`Simulation`] wires a coordinator and its leaves onto it and
//! drives them tick by tick, journaling every event.

pub mod journal;
pub mod network;
pub mod scenario;

pub use journal::{HostEvent, Journal, Observation, Record};
pub use network::{NetworkStats, SimLink, SimNetwork};
pub use scenario::{Dropout, ScenarioConfig, Simulation, Summary, TableEntry};
