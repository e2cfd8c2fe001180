//! Editable node graph: nodes, ports, links, validation and fingerprinting.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{DetailLevel, Result};

use super::node::{Generator, Node, NodeId};
use super::port::{Inlet, InletSpec, Outlet, OutletSpec, PortId, PortKind};

/// Structural problem repaired by [`Graph::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// Link referenced a port that no longer exists; removed.
    DanglingLink { inlet: PortId, outlet: PortId },
    /// Link joined ports of different kinds; removed.
    KindMismatch { inlet: PortId, outlet: PortId },
    /// Link closed a dependency cycle; removed.
    CyclicLink { inlet: PortId, outlet: PortId },
    /// Port had id zero or an id already used by another port; reassigned.
    ReassignedPort { node: NodeId, old: PortId, new: PortId },
}

/// Ordered set of nodes plus the inlet → outlet link table.
///
/// Ids come from one graph-wide counter and are never reused, so a cache
/// keyed by id can always tell a deleted node from a live one.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    /// Owner of every live port
    ports: HashMap<PortId, NodeId>,
    /// inlet -> outlet
    links: HashMap<PortId, PortId>,
    seed: u64,
    next_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Graph {
    /// Create an empty graph.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            ports: HashMap::new(),
            links: HashMap::new(),
            seed,
            next_id: 1,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
        for node in &mut self.nodes {
            node.version += 1;
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ── Nodes ──

    /// Add a node named after its generator type.
    pub fn add(&mut self, generator: Arc<dyn Generator>) -> NodeId {
        let name = generator.type_name().to_string();
        self.add_node(name, generator)
    }

    /// Add a node with the ports and parameters its generator declares.
    pub fn add_node(&mut self, name: impl Into<String>, generator: Arc<dyn Generator>) -> NodeId {
        let id = NodeId(self.alloc_id());

        let inlets = generator
            .inlets()
            .into_iter()
            .map(|spec| self.make_inlet(spec))
            .collect::<Vec<_>>();
        let outlets = generator
            .outlets()
            .into_iter()
            .map(|spec| self.make_outlet(spec))
            .collect::<Vec<_>>();

        for port in inlets.iter().map(|i| i.id).chain(outlets.iter().map(|o| o.id)) {
            self.ports.insert(port, id);
        }

        let node = Node {
            id,
            name: name.into(),
            version: 1,
            enabled: true,
            inlets,
            outlets,
            params: generator.default_params(),
            always_relevant: false,
            preview: false,
            draft: true,
            generator,
        };

        log::trace!("Added {} '{}' ({})", id, node.name, node.generator.type_name());
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn make_inlet(&mut self, spec: InletSpec) -> Inlet {
        Inlet {
            id: PortId(self.alloc_id()),
            name: spec.name,
            kind: spec.kind,
            field: spec.field,
        }
    }

    fn make_outlet(&mut self, spec: OutletSpec) -> Outlet {
        Outlet {
            id: PortId(self.alloc_id()),
            name: spec.name,
            kind: spec.kind,
        }
    }

    /// Remove a node, pruning every link that touches it.
    ///
    /// Former consumers get a version bump since their input disappeared.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let pos = *self.index.get(&id).ok_or(Error::UnknownNode(id))?;
        let node = self.nodes.remove(pos);

        let own_ports: HashSet<PortId> = node.port_ids().collect();
        let mut orphaned = Vec::new();
        self.links.retain(|inlet, outlet| {
            if own_ports.contains(inlet) {
                return false;
            }
            if own_ports.contains(outlet) {
                orphaned.push(*inlet);
                return false;
            }
            true
        });
        for port in &own_ports {
            self.ports.remove(port);
        }
        self.reindex();

        for inlet in orphaned {
            self.bump_port_owner(inlet);
        }
        Ok(node)
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let i = *self.index.get(&id).ok_or(Error::UnknownNode(id))?;
        Ok(&mut self.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    // ── Node edits ──

    /// Force a node to be considered changed.
    pub fn bump_version(&mut self, id: NodeId) -> Result<u64> {
        let node = self.node_mut(id)?;
        node.version += 1;
        Ok(node.version)
    }

    pub fn set_param(&mut self, id: NodeId, name: &str, value: f32) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.params.get(name) != Some(value) {
            node.params.set(name, value);
            node.version += 1;
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<()> {
        let node = self.node_mut(id)?;
        if node.enabled != enabled {
            node.enabled = enabled;
            node.version += 1;
        }
        Ok(())
    }

    /// Preview does not affect what a node computes, only whether it is relevant.
    pub fn set_preview(&mut self, id: NodeId, preview: bool) -> Result<()> {
        self.node_mut(id)?.preview = preview;
        Ok(())
    }

    pub fn set_always_relevant(&mut self, id: NodeId, always: bool) -> Result<()> {
        self.node_mut(id)?.always_relevant = always;
        Ok(())
    }

    pub fn set_draft(&mut self, id: NodeId, draft: bool) -> Result<()> {
        self.node_mut(id)?.draft = draft;
        Ok(())
    }

    /// Swap a node's generator, keeping id, ports and links.
    pub fn replace_generator(&mut self, id: NodeId, generator: Arc<dyn Generator>) -> Result<()> {
        let node = self.node_mut(id)?;
        node.generator = generator;
        node.version += 1;
        Ok(())
    }

    // ── Ports ──

    /// Append an inlet to a multi-port node.
    pub fn add_inlet(&mut self, id: NodeId, spec: InletSpec) -> Result<PortId> {
        self.node_mut(id)?;
        let inlet = self.make_inlet(spec);
        let port = inlet.id;
        self.ports.insert(port, id);
        let node = self.node_mut(id)?;
        node.inlets.push(inlet);
        node.version += 1;
        Ok(port)
    }

    /// Append an outlet to a multi-port node.
    pub fn add_outlet(&mut self, id: NodeId, spec: OutletSpec) -> Result<PortId> {
        self.node_mut(id)?;
        let outlet = self.make_outlet(spec);
        let port = outlet.id;
        self.ports.insert(port, id);
        let node = self.node_mut(id)?;
        node.outlets.push(outlet);
        node.version += 1;
        Ok(port)
    }

    /// Remove a single port and the links through it.
    pub fn remove_port(&mut self, port: PortId) -> Result<()> {
        let owner = self.ports.remove(&port).ok_or(Error::UnknownPort(port))?;

        let mut orphaned = Vec::new();
        self.links.retain(|inlet, outlet| {
            if *inlet == port {
                return false;
            }
            if *outlet == port {
                orphaned.push(*inlet);
                return false;
            }
            true
        });

        let node = self.node_mut(owner)?;
        node.inlets.retain(|i| i.id != port);
        node.outlets.retain(|o| o.id != port);
        node.version += 1;

        for inlet in orphaned {
            self.bump_port_owner(inlet);
        }
        Ok(())
    }

    pub fn contains_port(&self, port: PortId) -> bool {
        self.ports.contains_key(&port)
    }

    pub fn port_owner(&self, port: PortId) -> Option<NodeId> {
        self.ports.get(&port).copied()
    }

    pub fn port_kind(&self, port: PortId) -> Option<PortKind> {
        let node = self.node(self.port_owner(port)?)?;
        node.inlet_by_id(port)
            .map(|i| i.kind)
            .or_else(|| node.outlet_by_id(port).map(|o| o.kind))
    }

    fn is_inlet(&self, port: PortId) -> bool {
        self.port_owner(port)
            .and_then(|n| self.node(n))
            .is_some_and(|n| n.inlet_by_id(port).is_some())
    }

    fn is_outlet(&self, port: PortId) -> bool {
        self.port_owner(port)
            .and_then(|n| self.node(n))
            .is_some_and(|n| n.outlet_by_id(port).is_some())
    }

    fn bump_port_owner(&mut self, port: PortId) {
        if let Some(owner) = self.port_owner(port) {
            if let Ok(node) = self.node_mut(owner) {
                node.version += 1;
            }
        }
    }

    // ── Links ──

    /// Connect `outlet` to `inlet`, replacing the inlet's previous producer.
    pub fn link(&mut self, outlet: PortId, inlet: PortId) -> Result<()> {
        if !self.is_outlet(outlet) {
            return Err(Error::UnknownPort(outlet));
        }
        if !self.is_inlet(inlet) {
            return Err(Error::UnknownPort(inlet));
        }

        let outlet_kind = self.port_kind(outlet).ok_or(Error::UnknownPort(outlet))?;
        let inlet_kind = self.port_kind(inlet).ok_or(Error::UnknownPort(inlet))?;
        if outlet_kind != inlet_kind {
            return Err(Error::KindMismatch { outlet, outlet_kind, inlet, inlet_kind });
        }

        let producer = self.port_owner(outlet).ok_or(Error::UnknownPort(outlet))?;
        let consumer = self.port_owner(inlet).ok_or(Error::UnknownPort(inlet))?;
        if producer == consumer || self.depends_on(producer, consumer) {
            return Err(Error::CyclicLink { outlet, inlet });
        }

        if self.links.insert(inlet, outlet) != Some(outlet) {
            self.bump_port_owner(inlet);
        }
        Ok(())
    }

    /// Disconnect an inlet. Returns the outlet it was fed from.
    pub fn unlink(&mut self, inlet: PortId) -> Option<PortId> {
        let outlet = self.links.remove(&inlet)?;
        self.bump_port_owner(inlet);
        Some(outlet)
    }

    /// Outlet feeding `inlet`, if linked.
    pub fn producer_of(&self, inlet: PortId) -> Option<PortId> {
        self.links.get(&inlet).copied()
    }

    /// Node owning the outlet that feeds `inlet`.
    pub fn producer_node(&self, inlet: PortId) -> Option<&Node> {
        self.node(self.port_owner(self.producer_of(inlet)?)?)
    }

    /// Inlets fed by `outlet`, in ascending id order.
    pub fn consumers_of(&self, outlet: PortId) -> Vec<PortId> {
        let mut inlets: Vec<PortId> = self
            .links
            .iter()
            .filter(|(_, o)| **o == outlet)
            .map(|(i, _)| *i)
            .collect();
        inlets.sort();
        inlets
    }

    /// (inlet, outlet) pairs in ascending inlet order.
    pub fn links(&self) -> Vec<(PortId, PortId)> {
        let mut links: Vec<_> = self.links.iter().map(|(i, o)| (*i, *o)).collect();
        links.sort();
        links
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Nodes directly feeding `id`, one entry per linked inlet.
    pub fn producers(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| {
                n.inlets
                    .iter()
                    .filter_map(|i| self.producer_node(i.id).map(|p| p.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `node` transitively consumes anything produced by `upstream`.
    pub fn depends_on(&self, node: NodeId, upstream: NodeId) -> bool {
        let mut stack = self.producers(node);
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == upstream {
                return true;
            }
            if seen.insert(current) {
                stack.extend(self.producers(current));
            }
        }
        false
    }

    /// Every node transitively downstream of `id`, excluding `id`.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        let mut consumers_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (inlet, outlet) in &self.links {
            if let (Some(c), Some(p)) = (self.port_owner(*inlet), self.port_owner(*outlet)) {
                consumers_of.entry(p).or_default().push(c);
            }
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for &c in consumers_of.get(&current).into_iter().flatten() {
                if seen.insert(c) {
                    out.push(c);
                    stack.push(c);
                }
            }
        }
        out
    }

    // ── Relevance ──

    /// Whether a node must be kept up to date for the given detail level.
    pub fn is_relevant(&self, node: &Node, detail: DetailLevel) -> bool {
        if node.always_relevant || node.preview {
            return true;
        }
        if !node.enabled {
            return false;
        }
        if node.hosts_subgraph() {
            return true;
        }
        node.is_output() && (detail == DetailLevel::Main || node.draft)
    }

    pub fn relevant_nodes(&self, detail: DetailLevel) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| self.is_relevant(n, detail))
            .map(|n| n.id)
            .collect()
    }

    // ── Fingerprint ──

    /// Combined hash of seed, node ids and versions.
    ///
    /// Every edit that changes what the graph computes bumps some version, so
    /// equal fingerprints mean nothing relevant changed.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        self.nodes.len().hash(&mut hasher);
        for node in &self.nodes {
            node.id.hash(&mut hasher);
            node.version.hash(&mut hasher);
        }
        hasher.finish()
    }

    // ── Validation ──

    /// Repair structural problems left by partial edits.
    ///
    /// Never fails: offending elements are dropped or reassigned and reported.
    pub fn validate(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        // Zero or duplicate port ids get a fresh id; links keep the first owner.
        let mut seen = HashSet::new();
        for n in 0..self.nodes.len() {
            let node_id = self.nodes[n].id;
            let ids: Vec<PortId> = self.nodes[n].port_ids().collect();
            for old in ids {
                if old.0 != 0 && seen.insert(old) {
                    continue;
                }
                let new = PortId(self.alloc_id());
                let node = &mut self.nodes[n];
                if let Some(i) = node.inlets.iter_mut().find(|i| i.id == old) {
                    i.id = new;
                } else if let Some(o) = node.outlets.iter_mut().find(|o| o.id == old) {
                    o.id = new;
                }
                node.version += 1;
                seen.insert(new);
                diagnostics.push(Diagnostic::ReassignedPort { node: node_id, old, new });
            }
        }
        self.rebuild_port_index();

        for (inlet, outlet) in self.links() {
            if !self.is_inlet(inlet) || !self.is_outlet(outlet) {
                self.links.remove(&inlet);
                self.bump_port_owner(inlet);
                diagnostics.push(Diagnostic::DanglingLink { inlet, outlet });
            } else if self.port_kind(inlet) != self.port_kind(outlet) {
                self.links.remove(&inlet);
                self.bump_port_owner(inlet);
                diagnostics.push(Diagnostic::KindMismatch { inlet, outlet });
            }
        }

        while let Some((inlet, outlet)) = self.find_cycle_link() {
            self.links.remove(&inlet);
            self.bump_port_owner(inlet);
            diagnostics.push(Diagnostic::CyclicLink { inlet, outlet });
        }

        for d in &diagnostics {
            log::warn!("Graph validation repaired {:?}", d);
        }
        diagnostics
    }

    fn rebuild_port_index(&mut self) {
        let mut ports = HashMap::new();
        for node in &self.nodes {
            for port in node.port_ids() {
                ports.entry(port).or_insert(node.id);
            }
        }
        self.ports = ports;
    }

    /// A link whose producer transitively depends on its consumer.
    fn find_cycle_link(&self) -> Option<(PortId, PortId)> {
        self.links().into_iter().find(|&(inlet, outlet)| {
            match (self.port_owner(inlet), self.port_owner(outlet)) {
                (Some(consumer), Some(producer)) => {
                    producer == consumer || self.depends_on(producer, consumer)
                }
                _ => false,
            }
        })
    }

    /// Insert a raw link without checks. Used to load or repair graphs.
    pub(crate) fn insert_link_unchecked(&mut self, outlet: PortId, inlet: PortId) {
        self.links.insert(inlet, outlet);
    }
}
