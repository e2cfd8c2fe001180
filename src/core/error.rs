//! Error types for the terragraph engine

use thiserror::Error;

use crate::core::types::ClusterCoord;
use crate::graph::{NodeId, PortId, PortKind};

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A configuration parsed but holds a value the engine cannot run with.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Unknown port {0}")]
    UnknownPort(PortId),

    #[error("Cannot link outlet {outlet} ({outlet_kind:?}) to inlet {inlet} ({inlet_kind:?})")]
    KindMismatch {
        outlet: PortId,
        outlet_kind: PortKind,
        inlet: PortId,
        inlet_kind: PortKind,
    },

    #[error("Linking outlet {outlet} to inlet {inlet} would create a dependency cycle")]
    CyclicLink { outlet: PortId, inlet: PortId },

    /// A node turned ready while its own generation was still unwinding.
    /// Either the graph has a cycle or two threads generate into one cache.
    #[error("Node {0} became ready during its own generation")]
    ReentrantGeneration(NodeId),

    /// Two completions committed the same revision for one coordinate.
    #[error("Cluster {coord} already committed revision {revision}")]
    RevisionRace { coord: ClusterCoord, revision: u64 },

    #[error("Cluster {coord} generation failed: {message}")]
    ClusterFailed { coord: ClusterCoord, message: String },

    #[error("Generator error: {0}")]
    Generator(String),
}

impl Error {
    /// True for errors that indicate a broken engine invariant rather than
    /// bad input or a failing leaf generator.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::ReentrantGeneration(_) | Error::RevisionRace { .. })
    }
}
