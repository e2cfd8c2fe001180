//! Output nodes and the finalizers that merge their contributions.
//!
//! Output nodes only record their value in the cache and schedule the
//! finalizer of their kind. The finalizer merges every contribution in the
//! cache tree, biome outputs weighted by the biome mask, into one apply
//! descriptor.

use std::sync::Arc;

use crate::core::types::Result;
use crate::core::Matrix;
use crate::graph::{GenerateContext, Generator, InletSpec, PortKind, Transition};
use crate::tile::{ApplyDescriptor, Finalizer, OutputKind, StopToken, TileData};

/// Biome objects survive where the biome's mask is at least this strong.
const OBJECT_MASK_THRESHOLD: f32 = 0.5;

fn record_output(cx: &mut GenerateContext<'_>, kind: OutputKind, finalizer: Arc<dyn Finalizer>) {
    let id = cx.node().id;
    let value = cx.input(0);
    let cache = cx.cache_mut();
    match value {
        Some(value) => cache.set_output(id, kind, value),
        None => cache.remove_output(id),
    }
    cache.enqueue_finalize(finalizer);
}

/// Contributes its input to the tile's final height.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeightOutput;

impl HeightOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Generator for HeightOutput {
    fn type_name(&self) -> &'static str {
        "height_output"
    }

    fn inlets(&self) -> Vec<InletSpec> {
        vec![InletSpec::new("height", PortKind::Matrix)]
    }

    fn output_kind(&self) -> Option<OutputKind> {
        Some(OutputKind::Height)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        record_output(cx, OutputKind::Height, Arc::new(HeightFinalizer));
        Ok(())
    }
}

/// Contributes its input to the tile's object set.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectsOutput;

impl ObjectsOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Generator for ObjectsOutput {
    fn type_name(&self) -> &'static str {
        "objects_output"
    }

    fn inlets(&self) -> Vec<InletSpec> {
        vec![InletSpec::new("objects", PortKind::Objects)]
    }

    fn output_kind(&self) -> Option<OutputKind> {
        Some(OutputKind::Objects)
    }

    fn generate(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        record_output(cx, OutputKind::Objects, Arc::new(ObjectsFinalizer));
        Ok(())
    }
}

/// Resample `m` onto the cache's rect and resolution if it differs.
fn fit(m: &Matrix, cache: &TileData) -> Option<Matrix> {
    let tile = cache.context();
    if m.rect == tile.rect && m.resolution == tile.resolution {
        return None;
    }
    let mut fitted = Matrix::filled(tile.rect, tile.resolution, 0.0);
    fitted.blit_from(m);
    Some(fitted)
}

/// Sum of all height outputs in the cache tree, each weighted by the mask of
/// the cache it was recorded in.
pub fn merged_height(cache: &TileData) -> Matrix {
    let tile = cache.context();
    let mut merged = Matrix::filled(tile.rect, tile.resolution, 0.0);

    for (value, mask) in cache.collect_outputs(OutputKind::Height) {
        let Some(height) = value.as_matrix() else { continue };
        let height_fit = fit(height, cache);
        let mask_fit = mask.as_deref().and_then(|m| fit(m, cache));

        let height = height_fit.as_ref().unwrap_or(height.as_ref());
        let mask = mask_fit.as_ref().or(mask.as_deref());
        merged.add_weighted(height, mask);
    }
    merged
}

/// Merges height outputs into the `Height` apply descriptor.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeightFinalizer;

impl Finalizer for HeightFinalizer {
    fn kind(&self) -> OutputKind {
        OutputKind::Height
    }

    fn finalize(&self, cache: &mut TileData, stop: &StopToken) -> Result<()> {
        let merged = merged_height(cache);
        if stop.is_stopped() {
            return Ok(());
        }
        cache.set_apply(ApplyDescriptor::Height(Arc::new(merged)));

        // Objects sit on the height, so they follow it
        if cache.has_outputs(OutputKind::Objects) {
            cache.enqueue_finalize(Arc::new(ObjectsFinalizer));
        }
        Ok(())
    }
}

/// Drops every object onto the merged height and stores the `Objects`
/// apply descriptor.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectsFinalizer;

impl Finalizer for ObjectsFinalizer {
    fn kind(&self) -> OutputKind {
        OutputKind::Objects
    }

    fn finalize(&self, cache: &mut TileData, stop: &StopToken) -> Result<()> {
        let height = merged_height(cache);

        let mut placed: Vec<Transition> = Vec::new();
        for (value, mask) in cache.collect_outputs(OutputKind::Objects) {
            if stop.is_stopped() {
                return Ok(());
            }
            let Some(objects) = value.as_objects() else { continue };
            placed.extend(objects.iter().filter_map(|object| {
                let weight = mask.as_ref().map_or(1.0, |m| m.sample(object.pos).unwrap_or(0.0));
                (weight >= OBJECT_MASK_THRESHOLD).then(|| Transition {
                    height: height.sample(object.pos).unwrap_or(0.0),
                    ..*object
                })
            }));
        }

        cache.set_apply(ApplyDescriptor::Objects(Arc::new(placed)));
        Ok(())
    }
}
