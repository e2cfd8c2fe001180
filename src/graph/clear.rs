//! Invalidation pass: drop every cached node whose result no longer matches
//! the graph.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::tile::TileData;

use super::graph::Graph;
use super::node::{ClearingContext, NodeId};

static REBUILD_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Fresh id for a total rebuild spanning one or more caches.
pub fn next_rebuild_epoch() -> u64 {
    REBUILD_EPOCH.fetch_add(1, Ordering::Relaxed) + 1
}

/// Knobs for [`Graph::clear_changed`].
#[derive(Default)]
pub struct ClearOptions<'a> {
    /// Forget everything, including markers the versions cannot see
    /// (shared cluster revisions).
    pub total_rebuild: bool,
    /// Non-zero when `total_rebuild` is set.
    pub rebuild_epoch: u64,
    /// Called for every node removed from a cache.
    pub on_cleared: Option<&'a mut dyn FnMut(NodeId)>,
}

impl<'a> ClearOptions<'a> {
    /// Total rebuild of a single cache.
    pub fn total_rebuild() -> Self {
        Self::rebuild(next_rebuild_epoch())
    }

    /// Total rebuild shared by every cache cleared with the same `epoch`.
    pub fn rebuild(epoch: u64) -> Self {
        Self {
            total_rebuild: true,
            rebuild_epoch: epoch,
            on_cleared: None,
        }
    }

    pub fn with_callback(mut self, callback: &'a mut dyn FnMut(NodeId)) -> Self {
        self.on_cleared = Some(callback);
        self
    }

    fn notify(&mut self, id: NodeId) {
        if let Some(callback) = self.on_cleared.as_deref_mut() {
            callback(id);
        }
    }
}

/// One walk over a graph. `processed` memoizes readiness so each node is
/// settled once; the provisional `false` also stops a corrupt cyclic graph
/// from recursing forever.
struct ClearPass<'g, 'o, 'a> {
    graph: &'g Graph,
    options: &'o mut ClearOptions<'a>,
    processed: HashMap<NodeId, bool>,
    cleared: usize,
}

impl ClearPass<'_, '_, '_> {
    fn visit(&mut self, id: NodeId, cache: &mut TileData) -> bool {
        if let Some(&ready) = self.processed.get(&id) {
            return ready;
        }
        self.processed.insert(id, false);

        let graph = self.graph;
        let Some(node) = graph.node(id) else {
            return false;
        };

        let mut inlet_changed = false;
        for inlet in &node.inlets {
            if let Some(producer) = graph.producer_node(inlet.id) {
                if !self.visit(producer.id, cache) {
                    inlet_changed = true;
                }
            }
        }

        let this_changed = !cache.is_ready(node);
        let total_rebuild = self.options.total_rebuild;
        let rebuild_epoch = self.options.rebuild_epoch;
        let marker = cache.marker(id);
        let tile = cache.shared_context();

        let mut inner_ready = true;
        let invalidate = match node.generator.subgraph() {
            Some(inner) if node.enabled => {
                let sub = cache.sub_mut(id);
                let mut cx = ClearingContext {
                    node,
                    tile: &tile,
                    this_changed,
                    inlet_changed,
                    total_rebuild,
                    rebuild_epoch,
                    marker,
                    sub: Some(&mut *sub),
                    invalidate: false,
                };
                node.generator.on_clearing(&mut cx);
                let invalidate = cx.invalidate;

                self.cleared += inner.clear_changed(sub, self.options);
                inner_ready = sub.all_outputs_ready(inner, true);
                invalidate
            }
            _ => {
                let mut cx = ClearingContext {
                    node,
                    tile: &tile,
                    this_changed,
                    inlet_changed,
                    total_rebuild,
                    rebuild_epoch,
                    marker,
                    sub: None,
                    invalidate: false,
                };
                node.generator.on_clearing(&mut cx);
                cx.invalidate
            }
        };

        let ready = !this_changed && !inlet_changed && inner_ready && !invalidate;
        if !ready && cache.ready_version(id).is_some() {
            cache.clear_ready(id);
            self.cleared += 1;
            self.options.notify(id);
            log::trace!(
                "Cleared {} '{}' (this: {}, inlet: {}, inner: {}, hook: {})",
                id,
                node.name,
                this_changed,
                inlet_changed,
                !inner_ready,
                invalidate
            );
        }

        self.processed.insert(id, ready);
        ready
    }
}

impl Graph {
    /// Remove from `cache` every relevant node (and its producers) whose
    /// cached result is stale. Returns the number of entries dropped,
    /// sub-caches included.
    ///
    /// A node stays ready only if its cached version equals its current one,
    /// all of its producers stay ready, and for sub-graph hosts every relevant
    /// inner node stays ready. Running it twice without edits in between
    /// leaves the ready set unchanged.
    pub fn clear_changed(&self, cache: &mut TileData, options: &mut ClearOptions<'_>) -> usize {
        let mut cleared = 0;

        if options.total_rebuild {
            for id in cache.ready_nodes() {
                options.notify(id);
                cleared += 1;
            }
            cache.clear_all_ready(false);
            cache.clear_markers();
        }

        cache.clear_stray(self);

        let detail = cache.context().detail;
        let mut pass = ClearPass {
            graph: self,
            options,
            processed: HashMap::new(),
            cleared,
        };
        for id in self.relevant_nodes(detail) {
            pass.visit(id, cache);
        }
        pass.cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::{Stub, chain, test_context};
    use crate::tile::StopToken;

    fn generated(graph: &Graph) -> TileData {
        let mut cache = TileData::new(test_context());
        graph.generate(&mut cache, &StopToken::new()).unwrap();
        cache
    }

    #[test]
    fn test_clear_twice_is_idempotent() {
        let (mut graph, ids) = chain(3);
        graph.set_always_relevant(ids[2], true).unwrap();
        let mut cache = generated(&graph);

        graph.set_param(ids[1], "value", 2.0).unwrap();
        graph.clear_changed(&mut cache, &mut ClearOptions::default());
        let first = cache.ready_nodes();
        let dropped = graph.clear_changed(&mut cache, &mut ClearOptions::default());

        assert_eq!(dropped, 0);
        assert_eq!(cache.ready_nodes(), first);
        assert_eq!(first, vec![ids[0]]);
    }

    #[test]
    fn test_upstream_bump_invalidates_downstream() {
        let (mut graph, ids) = chain(4);
        graph.set_always_relevant(ids[3], true).unwrap();
        let mut cache = generated(&graph);
        assert_eq!(cache.ready_count(), 4);

        graph.bump_version(ids[0]).unwrap();
        let mut cleared = Vec::new();
        let mut record = |id: NodeId| cleared.push(id);
        let mut options = ClearOptions::default().with_callback(&mut record);
        graph.clear_changed(&mut cache, &mut options);

        for id in &ids {
            assert!(!cache.is_ready(graph.node(*id).unwrap()));
        }
        cleared.sort();
        assert_eq!(cleared, ids);
    }

    #[test]
    fn test_unrelated_node_stays_ready() {
        let (mut graph, ids) = chain(2);
        let d = graph.add(Stub::source("d"));
        graph.set_always_relevant(ids[1], true).unwrap();
        graph.set_always_relevant(d, true).unwrap();
        let mut cache = generated(&graph);

        graph.bump_version(ids[0]).unwrap();
        graph.clear_changed(&mut cache, &mut ClearOptions::default());

        assert_eq!(cache.ready_nodes(), vec![d]);
    }

    #[test]
    fn test_irrelevant_nodes_are_not_visited() {
        let (mut graph, ids) = chain(2);
        let mut cache = TileData::new(test_context());
        cache.mark_ready(ids[0], 1);
        cache.mark_ready(ids[1], 1);

        graph.bump_version(ids[0]).unwrap();
        graph.clear_changed(&mut cache, &mut ClearOptions::default());

        // Nothing relevant, so stale entries survive until something asks
        assert_eq!(cache.ready_version(ids[0]), Some(1));
    }

    #[test]
    fn test_total_rebuild_clears_everything() {
        let (mut graph, ids) = chain(2);
        graph.set_always_relevant(ids[1], true).unwrap();
        let mut cache = generated(&graph);

        cache.set_marker(ids[0], 5);

        let dropped = graph.clear_changed(&mut cache, &mut ClearOptions::total_rebuild());
        assert_eq!(dropped, 2);
        assert_eq!(cache.ready_count(), 0);
        assert_eq!(cache.marker_count(), 0);
    }

    #[test]
    fn test_rebuild_epochs_are_distinct() {
        let a = ClearOptions::total_rebuild();
        let b = ClearOptions::total_rebuild();
        assert!(a.rebuild_epoch > 0);
        assert_ne!(a.rebuild_epoch, b.rebuild_epoch);
        assert_eq!(ClearOptions::default().rebuild_epoch, 0);
        assert!(!ClearOptions::default().total_rebuild);
    }

    #[test]
    fn test_clear_drops_deleted_nodes() {
        let (mut graph, ids) = chain(3);
        graph.set_always_relevant(ids[0], true).unwrap();
        let mut cache = generated(&graph);

        graph.remove_node(ids[2]).unwrap();
        graph.clear_changed(&mut cache, &mut ClearOptions::default());
        assert!(cache.ready_version(ids[2]).is_none());
        assert!(cache.ready_version(ids[0]).is_some());
    }
}
