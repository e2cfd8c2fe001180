//! Fractal noise height source.

use std::sync::Arc;

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};

use crate::core::types::Result;
use crate::core::Matrix;
use crate::graph::{GenerateContext, Generator, OutletSpec, Params, PortKind};

/// FBM Perlin noise sampled in world space, so neighbouring tiles line up.
///
/// Parameters: `scale` (world units per noise period), `height` (output
/// range `[0, height]`), `octaves`, `persistence`, `lacunarity`, `seed`
/// (added to the tile seed).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoiseGenerator;

impl NoiseGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Generator for NoiseGenerator {
    fn type_name(&self) -> &'static str {
        "noise"
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        vec![OutletSpec::new("out", PortKind::Matrix)]
    }

    fn default_params(&self) -> Params {
        Params::new()
            .with("scale", 200.0)
            .with("height", 1.0)
            .with("octaves", 4.0)
            .with("persistence", 0.5)
            .with("lacunarity", 2.0)
            .with("seed", 0.0)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let params = cx.params();
        let scale = params.get_or("scale", 200.0).max(f32::EPSILON) as f64;
        let height = params.get_or("height", 1.0) as f64;
        let seed = (cx.tile().seed as u32).wrapping_add(params.get_or("seed", 0.0) as u32);

        let noise = Fbm::<Perlin>::new(seed)
            .set_octaves(params.get_or("octaves", 4.0).clamp(1.0, 16.0) as usize)
            .set_persistence(params.get_or("persistence", 0.5) as f64)
            .set_lacunarity(params.get_or("lacunarity", 2.0) as f64);

        let tile = cx.tile();
        let mut matrix = Matrix::filled(tile.rect, tile.resolution, 0.0);
        for z in 0..matrix.resolution {
            if cx.is_stopped() {
                return Ok(());
            }
            for x in 0..matrix.resolution {
                let pos = matrix.world_pos(x, z);
                let n = noise.get([pos.x as f64 / scale, pos.y as f64 / scale]);
                let normalized = ((n + 1.0) * 0.5).clamp(0.0, 1.0);
                matrix.set(x, z, (normalized * height) as f32);
            }
        }

        cx.set_output(0, matrix.into());
        Ok(())
    }
}
