// ================================
// src/lib.rs
// ================================
pub mod chain;
pub mod config;
pub mod control;
pub mod error;
pub mod node;
pub mod pose;
pub mod sim;
pub mod slot;
pub mod transport;

pub use chain::{Chain, ChainManager};
pub use config::{ChainParams, ControllerConfig};
pub use control::PursuitController;
pub use error::ChainError;
pub use node::{AgentId, AgentNode, AgentPhase, Role, SpawnOutcome, SpawnPolicy, SpawnRegion};
pub use pose::{Pose2D, VelocityCommand};
pub use sim::TurtleSim;
pub use transport::{PlacementService, TopicBus, Transport};
