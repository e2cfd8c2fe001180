//! Deferred post-generation steps: finalize (merge products) and apply
//! (write them to the terrain on the main thread).

use std::fmt;
use std::sync::Arc;

use crate::core::types::{DetailLevel, Result, TileCoord};
use crate::core::Matrix;
use crate::graph::Transition;

use super::data::TileData;
use super::stop::StopToken;

/// Final product kinds. The derived order is the finalize order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputKind {
    Height,
    Splats,
    Objects,
}

/// Merges per-node outputs of one kind into an apply descriptor.
///
/// A finalizer may enqueue further finalizers on the cache it is given.
pub trait Finalizer: Send + Sync + fmt::Debug {
    fn kind(&self) -> OutputKind;

    fn finalize(&self, cache: &mut TileData, stop: &StopToken) -> Result<()>;
}

/// Ready-to-write product for one output kind of one tile.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyDescriptor {
    Height(Arc<Matrix>),
    Splats(Vec<Arc<Matrix>>),
    Objects(Arc<Vec<Transition>>),
}

impl ApplyDescriptor {
    pub fn kind(&self) -> OutputKind {
        match self {
            ApplyDescriptor::Height(_) => OutputKind::Height,
            ApplyDescriptor::Splats(_) => OutputKind::Splats,
            ApplyDescriptor::Objects(_) => OutputKind::Objects,
        }
    }
}

/// Terrain write-back target. Only ever called from the main-thread queue.
pub trait TerrainSink {
    fn apply(&mut self, tile: TileCoord, detail: DetailLevel, descriptor: &ApplyDescriptor);

    /// Currently applied product, for generators with a main-thread pre-pass.
    fn current(&self, _tile: TileCoord, _kind: OutputKind) -> Option<ApplyDescriptor> {
        None
    }
}

/// Sink that records every apply call; handy for tools and tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub applied: Vec<(TileCoord, DetailLevel, ApplyDescriptor)>,
}

impl TerrainSink for RecordingSink {
    fn apply(&mut self, tile: TileCoord, detail: DetailLevel, descriptor: &ApplyDescriptor) {
        self.applied.push((tile, detail, descriptor.clone()));
    }

    fn current(&self, tile: TileCoord, kind: OutputKind) -> Option<ApplyDescriptor> {
        self.applied
            .iter()
            .rev()
            .find(|(t, _, d)| *t == tile && d.kind() == kind)
            .map(|(_, _, d)| d.clone())
    }
}
