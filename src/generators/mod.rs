//! Leaf generators: sources, combinators, outputs and the two node kinds the
//! engine treats specially (biome sub-graph hosts and cluster inputs).

pub mod constant;
pub mod noise;
pub mod blend;
pub mod scatter;
pub mod output;
pub mod biome;
pub mod cluster_input;

pub use constant::Constant;
pub use noise::NoiseGenerator;
pub use blend::Blend;
pub use scatter::Scatter;
pub use output::{HeightFinalizer, HeightOutput, ObjectsFinalizer, ObjectsOutput, merged_height};
pub use biome::{Biome, BiomeBuilder, Portal};
pub use cluster_input::ClusterInput;
