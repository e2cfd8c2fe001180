//! Terragraph - incremental, versioned, multi-threaded execution engine for
//! procedural terrain node graphs

pub mod core;
pub mod graph;
pub mod tile;
pub mod cluster;
pub mod runtime;
pub mod generators;
