//! Node graph: ports, nodes, edits, and the invalidation and generation
//! passes that keep a tile cache in sync with it.

pub mod port;
pub mod node;
pub mod graph;
pub mod clear;
pub mod generate;

#[cfg(test)]
pub(crate) mod testing;

pub use port::{Inlet, InletSpec, Outlet, OutletSpec, PortId, PortKind, Transition, Value};
pub use node::{ClearingContext, GenerateContext, Generator, Node, NodeId, Params, ResolvedParams};
pub use graph::{Diagnostic, Graph};
pub use clear::{ClearOptions, next_rebuild_epoch};
pub use generate::{GenerateScope, finalize};
