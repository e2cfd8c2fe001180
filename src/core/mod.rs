//! Core engine types and utilities

pub mod types;
pub mod error;
pub mod logging;
pub mod config;
pub mod matrix;

pub use types::*;
pub use error::Error;
pub use config::{ClusterConfig, EngineConfig};
pub use matrix::Matrix;
