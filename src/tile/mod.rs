//! Tile state: caches, cancellation, finalize/apply and the scheduler that
//! drives generation runs.

pub mod stop;
pub mod data;
pub mod finalize;
pub mod scheduler;

pub use stop::StopToken;
pub use data::{TileContext, TileData};
pub use finalize::{ApplyDescriptor, Finalizer, OutputKind, RecordingSink, TerrainSink};
pub use scheduler::{LevelPhase, TileEvent, TileScheduler};
