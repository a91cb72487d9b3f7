//! storage.rs
//! Node ownership, connection bookkeeping and dirty-state tracking.
//!
//! The connection set is the source of truth. `dependencies` and `dependents`
//! are node-level caches derived from it and updated in lockstep by
//! `link`/`unlink`, the only two places that touch edges.

use super::error::GraphError;
use super::node::{Edge, Node, NodeId, ParamRef, ParameterSlot, ResultRef, SlotRef};
use crate::analysis::topology::{self, Adjacency};
use crate::compute::NodeCall;
use crate::store::{TypeDescriptor, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

static EMPTY: Value = Value::None;

#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: BTreeMap<NodeId, Node>,
    names: HashMap<String, NodeId>,
    next_id: u32,

    connections: BTreeSet<Edge>,
    dependencies: Adjacency,
    dependents: Adjacency,

    dirty: BTreeSet<NodeId>,
}

impl NodeStore {
    pub fn new() -> Self { Self::default() }
    pub fn count(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    // --- Nodes ---

    /// Creates a node from a descriptor. A missing or colliding name is
    /// replaced by `<base><n>` with the lowest free positive `n`.
    /// New nodes start dirty: their result has never been computed.
    pub fn insert(&mut self, descriptor: Arc<TypeDescriptor>, requested: Option<&str>) -> NodeId {
        let name = match requested {
            Some(name) if !self.names.contains_key(name) => name.to_string(),
            Some(name) => self.next_name(name),
            None => self.next_name(descriptor.name()),
        };

        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.names.insert(name.clone(), id);
        self.nodes.insert(id, Node::new(id, name, descriptor));
        self.dirty.insert(id);
        id
    }

    fn next_name(&self, base: &str) -> String {
        (1..)
            .map(|i| format!("{}{}", base, i))
            .find(|candidate| !self.names.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Removes a node after disconnecting every edge that touches it.
    pub fn remove(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let node = self.node(id)?;
        let incoming = node.params.iter().enumerate().filter_map(|(i, slot)| {
            slot.incoming.map(|source| Edge::new(source, ParamRef { node: id, index: i as u32 }))
        });
        let outgoing = node.result.outgoing.iter().map(|&dest| Edge::new(ResultRef::of(id), dest));
        let edges: Vec<Edge> = incoming.chain(outgoing).collect();

        for edge in edges {
            self.unlink(edge);
        }

        self.dirty.remove(&id);
        self.dependencies.remove(&id);
        self.dependents.remove(&id);
        let node = self.nodes.remove(&id).ok_or_else(|| unknown_node(id))?;
        self.names.remove(&node.name);
        Ok(node)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(&id).ok_or_else(|| unknown_node(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn id_of(&self, name: &str) -> Result<NodeId, GraphError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode { name: name.to_string() })
    }

    // --- Slot addressing ---

    pub fn param(&self, id: NodeId, name: &str) -> Result<ParamRef, GraphError> {
        let node = self.node(id)?;
        let index = node.descriptor.param_index(name).ok_or_else(|| GraphError::UnknownSlot {
            node: node.name.clone(),
            slot: name.to_string(),
        })?;
        Ok(ParamRef { node: id, index: index as u32 })
    }

    pub fn result(&self, id: NodeId) -> Result<ResultRef, GraphError> {
        self.node(id)?;
        Ok(ResultRef::of(id))
    }

    /// Resolves `node.param` or `node.result`.
    pub fn resolve(&self, path: &str) -> Result<SlotRef, GraphError> {
        let (node_name, slot) = path.rsplit_once('.').ok_or_else(|| GraphError::UnknownSlot {
            node: path.to_string(),
            slot: String::new(),
        })?;
        let id = self.id_of(node_name)?;
        if slot == "result" {
            Ok(SlotRef::Result(ResultRef::of(id)))
        } else {
            Ok(SlotRef::Param(self.param(id, slot)?))
        }
    }

    pub fn param_path(&self, p: ParamRef) -> String {
        match self.nodes.get(&p.node) {
            Some(node) if (p.index as usize) < node.params.len() => node.param_path(p.index),
            _ => format!("{}[{}]", p.node, p.index),
        }
    }

    pub fn result_path(&self, r: ResultRef) -> String {
        match self.nodes.get(&r.node) {
            Some(node) => node.result_path(),
            None => format!("{}.result", r.node),
        }
    }

    pub fn slot_path(&self, slot: SlotRef) -> String {
        match slot {
            SlotRef::Param(p) => self.param_path(p),
            SlotRef::Result(r) => self.result_path(r),
        }
    }

    fn param_slot(&self, p: ParamRef) -> Result<&ParameterSlot, GraphError> {
        let node = self.node(p.node)?;
        node.params.get(p.index as usize).ok_or_else(|| GraphError::UnknownSlot {
            node: node.name.clone(),
            slot: format!("#{}", p.index),
        })
    }

    fn param_slot_mut(&mut self, p: ParamRef) -> Option<&mut ParameterSlot> {
        self.nodes.get_mut(&p.node)?.params.get_mut(p.index as usize)
    }

    // --- Values ---

    /// The effective value of a parameter: the connected result's value, or the
    /// literal when unconnected. An upstream result not yet computed reads as
    /// `Value::None`.
    pub fn get(&self, p: ParamRef) -> Result<&Value, GraphError> {
        let slot = self.param_slot(p)?;
        match slot.incoming {
            Some(source) => Ok(self.node(source.node)?.result.value.as_ref().unwrap_or(&EMPTY)),
            None => Ok(&slot.literal),
        }
    }

    /// Stores a literal and marks the owner dirty. Connected slots are read-only.
    pub fn set(&mut self, p: ParamRef, value: Value) -> Result<(), GraphError> {
        let slot = self.param_slot(p)?;
        if slot.incoming.is_some() {
            return Err(GraphError::ConnectedSlot { slot: self.param_path(p) });
        }
        let constraint = self.node(p.node)?.param_constraint(p.index);
        if !constraint.admits(&value) {
            return Err(GraphError::TypeMismatch {
                slot: self.param_path(p),
                expected: constraint.clone(),
                found: value.value_type(),
            });
        }

        if let Some(slot) = self.param_slot_mut(p) {
            slot.literal = value;
        }
        self.unclean(p.node);
        Ok(())
    }

    pub fn result_value(&self, id: NodeId) -> Result<Option<&Value>, GraphError> {
        Ok(self.node(id)?.result.value.as_ref())
    }

    /// Stores a computed value and marks the node clean. This is the only way
    /// a node leaves the dirty set.
    pub fn set_result(&mut self, id: NodeId, value: Value) -> Result<(), GraphError> {
        let node = self.node(id)?;
        let constraint = node.descriptor.returns();
        if !constraint.admits(&value) {
            return Err(GraphError::TypeMismatch {
                slot: node.result_path(),
                expected: constraint.clone(),
                found: value.value_type(),
            });
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            node.result.value = Some(value);
        }
        self.clean(id);
        Ok(())
    }

    // --- Topology ---

    /// Validates, then links `source -> dest`. Every check runs before the first
    /// mutation, so a rejected connection leaves the store untouched.
    pub fn connect(&mut self, source: ResultRef, dest: ParamRef, force: bool) -> Result<(), GraphError> {
        let source_node = self.node(source.node)?;
        let previous = self.param_slot(dest)?.incoming;

        if previous.is_some() && !force {
            return Err(GraphError::ConnectedSlot { slot: self.param_path(dest) });
        }

        let source_type = source_node.descriptor.returns();
        let dest_type = self.node(dest.node)?.param_constraint(dest.index);
        if !source_type.compatible_with(dest_type) {
            return Err(GraphError::IncompatibleSlots {
                source_slot: self.result_path(source),
                source_type: source_type.clone(),
                dest_slot: self.param_path(dest),
                dest_type: dest_type.clone(),
            });
        }

        if topology::reaches(&self.dependents, dest.node, source.node) {
            return Err(GraphError::Cycle {
                source_slot: self.result_path(source),
                dest_slot: self.param_path(dest),
            });
        }

        if let Some(previous) = previous {
            self.unlink(Edge::new(previous, dest));
        }
        self.link(Edge::new(source, dest));
        Ok(())
    }

    pub fn disconnect(&mut self, source: ResultRef, dest: ParamRef) -> Result<(), GraphError> {
        let edge = Edge::new(source, dest);
        if !self.connections.contains(&edge) {
            return Err(GraphError::NotConnected {
                source_slot: self.result_path(source),
                dest_slot: self.param_path(dest),
            });
        }
        self.unlink(edge);
        Ok(())
    }

    /// Drops the incoming edge of a parameter, if any. Returns the old source.
    pub fn disconnect_param(&mut self, dest: ParamRef) -> Result<Option<ResultRef>, GraphError> {
        let previous = self.param_slot(dest)?.incoming;
        if let Some(source) = previous {
            self.unlink(Edge::new(source, dest));
        }
        Ok(previous)
    }

    /// Drops every outgoing edge of a result. Returns the detached parameters.
    pub fn disconnect_result(&mut self, source: ResultRef) -> Result<Vec<ParamRef>, GraphError> {
        let outgoing: Vec<ParamRef> = self.node(source.node)?.result.outgoing.iter().copied().collect();
        for &dest in &outgoing {
            self.unlink(Edge::new(source, dest));
        }
        Ok(outgoing)
    }

    fn link(&mut self, edge: Edge) {
        let (from, to) = (edge.source.node, edge.dest.node);
        self.connections.insert(edge);
        self.dependencies.entry(to).or_default().insert(from);
        self.dependents.entry(from).or_default().insert(to);

        if let Some(slot) = self.param_slot_mut(edge.dest) {
            slot.incoming = Some(edge.source);
        }
        if let Some(node) = self.nodes.get_mut(&from) {
            node.result.outgoing.insert(edge.dest);
        }
        self.unclean(to);
        tracing::debug!(
            source = %self.result_path(edge.source),
            dest = %self.param_path(edge.dest),
            "connected"
        );
    }

    fn unlink(&mut self, edge: Edge) {
        let (from, to) = (edge.source.node, edge.dest.node);
        self.connections.remove(&edge);

        if let Some(slot) = self.param_slot_mut(edge.dest) {
            slot.incoming = None;
        }
        if let Some(node) = self.nodes.get_mut(&from) {
            node.result.outgoing.remove(&edge.dest);
        }

        // Two parameters of one node may read the same result; the node-level
        // pair survives until the last such edge is gone.
        let still_linked = self
            .nodes
            .get(&to)
            .map_or(false, |n| n.params.iter().any(|p| p.incoming.map(|s| s.node) == Some(from)));
        if !still_linked {
            remove_adjacent(&mut self.dependencies, to, from);
            remove_adjacent(&mut self.dependents, from, to);
        }

        self.unclean(to);
        tracing::debug!(
            source = %self.result_path(edge.source),
            dest = %self.param_path(edge.dest),
            "disconnected"
        );
    }

    pub fn connections(&self) -> &BTreeSet<Edge> { &self.connections }
    pub fn dependency_map(&self) -> &Adjacency { &self.dependencies }
    pub fn dependent_map(&self) -> &Adjacency { &self.dependents }

    /// Upstream nodes `id` reads from.
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependencies.get(&id).into_iter().flatten().copied()
    }

    /// Downstream nodes reading from `id`.
    pub fn dependents(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependents.get(&id).into_iter().flatten().copied()
    }

    pub fn topological_order(&self) -> Result<Vec<NodeId>, String> {
        topology::sort(self.nodes.keys().copied(), &self.dependencies, &self.dependents)
    }

    // --- Dirty state ---

    pub fn dirty(&self) -> &BTreeSet<NodeId> { &self.dirty }
    pub fn is_dirty(&self, id: NodeId) -> bool { self.dirty.contains(&id) }
    pub fn is_clean(&self) -> bool { self.dirty.is_empty() }

    pub(crate) fn clean(&mut self, id: NodeId) {
        self.dirty.remove(&id);
    }

    pub(crate) fn unclean(&mut self, id: NodeId) {
        if self.nodes.contains_key(&id) {
            self.dirty.insert(id);
        }
    }

    /// Marks everything downstream of a dirty node dirty. Returns how many nodes
    /// were newly dirtied.
    pub fn propagate(&mut self) -> usize {
        let before = self.dirty.len();
        let reached = topology::downstream_from(&self.dependents, self.dirty.iter().copied());
        self.dirty.extend(reached);
        self.dirty.len() - before
    }

    fn has_dirty_dependency(&self, id: NodeId) -> bool {
        self.dependencies(id).any(|dep| self.dirty.contains(&dep))
    }

    /// Dirty nodes whose dependencies are all clean, in creation order.
    pub fn ready(&self) -> Vec<NodeId> {
        self.dirty
            .iter()
            .copied()
            .filter(|&id| !self.has_dirty_dependency(id))
            .collect()
    }

    // --- Execution ---

    /// Snapshots everything needed to run a node away from the store.
    pub fn prepare(&self, id: NodeId) -> Result<NodeCall, GraphError> {
        let node = self.node(id)?;
        let values = (0..node.params.len())
            .map(|i| self.get(ParamRef { node: id, index: i as u32 }))
            .collect::<Result<Vec<_>, _>>()?;
        let args = node
            .descriptor
            .assemble(values)
            .map_err(|message| GraphError::Execution { node: node.name.clone(), message })?;
        Ok(NodeCall { node: id, name: node.name.clone(), func: node.descriptor.func(), args })
    }

    /// Runs a node on the current thread and stores its result.
    pub fn apply(&mut self, id: NodeId) -> Result<(), GraphError> {
        let value = self.prepare(id)?.invoke()?;
        self.set_result(id, value)
    }

    /// Renders a node as a call, e.g. `add(a=10.0, b=20.0)`.
    pub fn describe(&self, id: NodeId) -> Result<String, GraphError> {
        let call = self.prepare(id)?;
        Ok(format!("{}({})", self.node(id)?.type_name(), call.args))
    }
}

fn unknown_node(id: NodeId) -> GraphError {
    GraphError::UnknownNode { name: id.to_string() }
}

fn remove_adjacent(adjacency: &mut Adjacency, key: NodeId, value: NodeId) {
    if let Some(set) = adjacency.get_mut(&key) {
        set.remove(&value);
        if set.is_empty() {
            adjacency.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ParamSpec, TypeDescriptor, ValueType};

    fn binary(name: &str) -> Arc<TypeDescriptor> {
        Arc::new(
            TypeDescriptor::builder(name)
                .param("a", ValueType::Float)
                .param("b", ValueType::Float)
                .returns(ValueType::Float)
                .build(|args| Ok(Value::Float(args.float("a")? + args.float("b")?)))
                .unwrap(),
        )
    }

    fn text() -> Arc<TypeDescriptor> {
        Arc::new(
            TypeDescriptor::builder("text")
                .with_param(ParamSpec::new("s").typed(ValueType::Str).default(""))
                .returns(ValueType::Str)
                .build(|args| Ok(args.get("s").cloned().unwrap_or_default()))
                .unwrap(),
        )
    }

    #[test]
    fn test_names_take_lowest_free_suffix() {
        let mut store = NodeStore::new();
        let add = binary("add");
        let a1 = store.insert(add.clone(), None);
        let a2 = store.insert(add.clone(), None);
        let custom = store.insert(add.clone(), Some("sum"));
        let sum1 = store.insert(add.clone(), Some("sum"));
        assert_eq!(store.node(a1).unwrap().name(), "add1");
        assert_eq!(store.node(a2).unwrap().name(), "add2");
        assert_eq!(store.node(custom).unwrap().name(), "sum");
        assert_eq!(store.node(sum1).unwrap().name(), "sum1");

        store.remove(a1).unwrap();
        let again = store.insert(add, None);
        assert_eq!(store.node(again).unwrap().name(), "add1");
        assert_ne!(again, a1, "ids are never reused");
    }

    #[test]
    fn test_set_validates_and_dirties() {
        let mut store = NodeStore::new();
        let n = store.insert(binary("add"), None);
        let a = store.param(n, "a").unwrap();
        store.set_result(n, Value::Float(0.0)).unwrap();
        assert!(store.is_clean());

        let err = store.set(a, Value::Str("x".into())).unwrap_err();
        assert!(err.is_type_mismatch());
        assert!(store.is_clean(), "rejected set must not dirty");

        store.set(a, Value::Float(1.0)).unwrap();
        assert!(store.is_dirty(n));
        assert_eq!(store.get(a).unwrap(), &Value::Float(1.0));
    }

    #[test]
    fn test_set_result_validates_return_type() {
        let mut store = NodeStore::new();
        let n = store.insert(binary("add"), None);
        let err = store.set_result(n, Value::Int(1)).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert!(store.is_dirty(n));
        assert_eq!(store.result_value(n).unwrap(), None);
    }

    #[test]
    fn test_connect_updates_every_index() {
        let mut store = NodeStore::new();
        let add = binary("add");
        let up = store.insert(add.clone(), None);
        let down = store.insert(add, None);
        let dest = store.param(down, "b").unwrap();
        store.set_result(down, Value::Float(0.0)).unwrap();

        store.connect(ResultRef::of(up), dest, false).unwrap();

        assert!(store.connections().contains(&Edge::new(ResultRef::of(up), dest)));
        assert_eq!(store.dependencies(down).collect::<Vec<_>>(), vec![up]);
        assert_eq!(store.dependents(up).collect::<Vec<_>>(), vec![down]);
        assert_eq!(store.node(down).unwrap().params()[1].incoming(), Some(ResultRef::of(up)));
        assert!(store.node(up).unwrap().result().outgoing().contains(&dest));
        assert!(store.is_dirty(down));
    }

    #[test]
    fn test_connect_rejections() {
        let mut store = NodeStore::new();
        let add = binary("add");
        let x = store.insert(add.clone(), None);
        let y = store.insert(add, None);
        let t = store.insert(text(), None);
        let ya = store.param(y, "a").unwrap();

        store.connect(ResultRef::of(x), ya, false).unwrap();
        let err = store.connect(ResultRef::of(x), ya, false).unwrap_err();
        assert!(matches!(err, GraphError::ConnectedSlot { .. }));

        let err = store.connect(ResultRef::of(t), store.param(y, "b").unwrap(), false).unwrap_err();
        assert!(err.is_type_mismatch());

        let err = store.connect(ResultRef::of(x), store.param(x, "a").unwrap(), false).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }), "self edges are cycles");
    }

    #[test]
    fn test_force_replaces_incoming_edge() {
        let mut store = NodeStore::new();
        let add = binary("add");
        let first = store.insert(add.clone(), None);
        let second = store.insert(add.clone(), None);
        let sink = store.insert(add, None);
        let dest = store.param(sink, "a").unwrap();

        store.connect(ResultRef::of(first), dest, false).unwrap();
        store.connect(ResultRef::of(second), dest, true).unwrap();

        assert_eq!(store.connections().len(), 1);
        assert_eq!(store.dependencies(sink).collect::<Vec<_>>(), vec![second]);
        assert!(store.dependent_map().get(&first).is_none());
        assert!(store.node(first).unwrap().result().outgoing().is_empty());
    }

    #[test]
    fn test_shared_source_keeps_node_link_until_last_edge() {
        let mut store = NodeStore::new();
        let add = binary("add");
        let up = store.insert(add.clone(), None);
        let down = store.insert(add, None);
        let a = store.param(down, "a").unwrap();
        let b = store.param(down, "b").unwrap();

        store.connect(ResultRef::of(up), a, false).unwrap();
        store.connect(ResultRef::of(up), b, false).unwrap();
        store.disconnect(ResultRef::of(up), a).unwrap();
        assert_eq!(store.dependencies(down).collect::<Vec<_>>(), vec![up]);

        store.disconnect(ResultRef::of(up), b).unwrap();
        assert!(store.dependency_map().is_empty());
        assert!(store.dependent_map().is_empty());

        let err = store.disconnect(ResultRef::of(up), b).unwrap_err();
        assert!(matches!(err, GraphError::NotConnected { .. }));
    }

    #[test]
    fn test_propagate_and_ready() {
        // a -> b -> d, a -> c -> d
        let mut store = NodeStore::new();
        let add = binary("add");
        let ids: Vec<NodeId> = (0..4).map(|_| store.insert(add.clone(), None)).collect();
        let (a, b, c, d) = (ids[0], ids[1], ids[2], ids[3]);
        let edges = [(a, b, "a"), (a, c, "a"), (b, d, "a"), (c, d, "b")];
        for (from, to, slot) in edges {
            let p = store.param(to, slot).unwrap();
            store.connect(ResultRef::of(from), p, false).unwrap();
        }
        for &id in &ids {
            store.set_result(id, Value::Float(0.0)).unwrap();
        }

        store.unclean(a);
        assert_eq!(store.propagate(), 3);
        assert_eq!(store.ready(), vec![a]);

        store.set_result(a, Value::Float(1.0)).unwrap();
        assert_eq!(store.ready(), vec![b, c]);
    }

    #[test]
    fn test_resolve_paths() {
        let mut store = NodeStore::new();
        let n = store.insert(binary("add"), None);
        assert_eq!(store.resolve("add1.result").unwrap(), SlotRef::Result(ResultRef::of(n)));
        assert_eq!(
            store.resolve("add1.b").unwrap(),
            SlotRef::Param(ParamRef { node: n, index: 1 })
        );
        assert!(matches!(store.resolve("add1.c"), Err(GraphError::UnknownSlot { .. })));
        assert!(matches!(store.resolve("nope.a"), Err(GraphError::UnknownNode { .. })));
        assert!(store.resolve("add1").is_err());
    }

    #[test]
    fn test_describe() {
        let mut store = NodeStore::new();
        let n = store.insert(binary("add"), None);
        store.set(store.param(n, "a").unwrap(), Value::Float(10.0)).unwrap();
        store.set(store.param(n, "b").unwrap(), Value::Float(20.0)).unwrap();
        assert_eq!(store.describe(n).unwrap(), "add(a=10.0, b=20.0)");
    }
}
