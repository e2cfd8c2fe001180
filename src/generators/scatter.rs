//! Jittered-grid object scatter.

use std::f32::consts::TAU;
use std::sync::Arc;

use glam::Vec2;

use crate::core::types::Result;
use crate::graph::{GenerateContext, Generator, InletSpec, OutletSpec, Params, PortKind, Transition, Value};

/// Places one candidate per `spacing`-sized world cell, jittered by a hash
/// of the cell, and keeps it with probability `density` (or the sample of
/// the linked density matrix). Cells are world-aligned so objects never
/// double up on tile borders.
#[derive(Clone, Copy, Debug, Default)]
pub struct Scatter;

impl Scatter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Integer hash in [0, 1].
    fn hash_2d(ix: i32, iz: i32, seed: u32) -> f32 {
        let mut h = (ix as u32)
            .wrapping_mul(374761393)
            .wrapping_add((iz as u32).wrapping_mul(668265263))
            .wrapping_add(seed.wrapping_mul(1274126177));
        h = (h ^ (h >> 13)).wrapping_mul(1103515245);
        h ^= h >> 16;
        (h & 0x7FFFFFFF) as f32 / 0x7FFFFFFF_u32 as f32
    }
}

impl Generator for Scatter {
    fn type_name(&self) -> &'static str {
        "scatter"
    }

    fn inlets(&self) -> Vec<InletSpec> {
        vec![InletSpec::new("density", PortKind::Matrix)]
    }

    fn outlets(&self) -> Vec<OutletSpec> {
        vec![OutletSpec::new("objects", PortKind::Objects)]
    }

    fn default_params(&self) -> Params {
        Params::new().with("spacing", 25.0).with("density", 1.0).with("seed", 0.0)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let spacing = cx.params().get_or("spacing", 25.0).max(1.0);
        let density = cx.params().get_or("density", 1.0);
        let seed = (cx.tile().seed as u32).wrapping_add(cx.params().get_or("seed", 0.0) as u32);
        let density_map = cx.input(0);
        let rect = cx.tile().rect;

        let min = (rect.origin.as_vec2() / spacing).floor().as_ivec2();
        let max = (rect.end().as_vec2() / spacing).ceil().as_ivec2();

        let mut objects = Vec::new();
        for iz in min.y..max.y {
            if cx.is_stopped() {
                return Ok(());
            }
            for ix in min.x..max.x {
                let jitter = Vec2::new(
                    Self::hash_2d(ix, iz, seed),
                    Self::hash_2d(ix, iz, seed.wrapping_add(1)),
                );
                let pos = (Vec2::new(ix as f32, iz as f32) + jitter) * spacing;
                if !rect.contains(pos) {
                    continue;
                }

                let keep = match &density_map {
                    Some(Value::Matrix(m)) => m.sample(pos).unwrap_or(0.0),
                    _ => density,
                };
                if Self::hash_2d(ix, iz, seed.wrapping_add(2)) >= keep {
                    continue;
                }

                objects.push(Transition {
                    pos,
                    height: 0.0,
                    rotation: Self::hash_2d(ix, iz, seed.wrapping_add(3)) * TAU,
                    scale: 0.8 + 0.4 * Self::hash_2d(ix, iz, seed.wrapping_add(4)),
                });
            }
        }

        cx.set_output(0, Value::Objects(Arc::new(objects)));
        Ok(())
    }
}
