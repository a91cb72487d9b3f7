//! dag.rs
//! The public graph handle: node storage plus the active evaluator and the
//! graph-level aliases for exposed slots.

use super::error::GraphError;
use super::node::{Edge, Node, NodeId, ParamRef, ResultRef, SlotRef};
use super::storage::NodeStore;
use crate::compute::{Evaluator, EvaluatorConfig, SerialEvaluator};
use crate::store::{TypeRegistry, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub struct Graph {
    name: String,
    registry: Arc<TypeRegistry>,
    pub(crate) store: NodeStore,
    evaluator: Box<dyn Evaluator>,
    exposed_params: BTreeMap<String, ParamRef>,
    exposed_results: BTreeMap<String, ResultRef>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &self.store.count())
            .field("connections", &self.store.connections().len())
            .field("dirty", &self.store.dirty().len())
            .field("evaluator", &self.evaluator.name())
            .finish()
    }
}

impl Graph {
    /// Creates an empty graph evaluated serially.
    pub fn new(name: impl Into<String>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
            store: NodeStore::new(),
            evaluator: Box::new(SerialEvaluator::new()),
            exposed_params: BTreeMap::new(),
            exposed_results: BTreeMap::new(),
        }
    }

    /// Creates an empty graph with the evaluator described by `config`.
    pub fn with_config(
        name: impl Into<String>,
        registry: Arc<TypeRegistry>,
        config: &EvaluatorConfig,
    ) -> Result<Self, GraphError> {
        let mut graph = Self::new(name, registry);
        graph.set_evaluator(config.build())?;
        Ok(graph)
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn registry(&self) -> &Arc<TypeRegistry> { &self.registry }
    pub fn store(&self) -> &NodeStore { &self.store }
    pub fn evaluator_name(&self) -> &'static str { self.evaluator.name() }

    /// Replaces the active evaluator. The old one is stopped before the new
    /// one starts; if the new one fails to start the old one is restarted.
    pub fn set_evaluator(&mut self, mut evaluator: Box<dyn Evaluator>) -> Result<(), GraphError> {
        self.evaluator.stop();
        if let Err(e) = evaluator.start() {
            tracing::warn!(graph = %self.name, evaluator = evaluator.name(), error = %e, "evaluator failed to start");
            self.evaluator.start()?;
            return Err(e);
        }
        tracing::info!(
            graph = %self.name,
            from = self.evaluator.name(),
            to = evaluator.name(),
            "evaluator replaced"
        );
        self.evaluator = evaluator;
        Ok(())
    }

    // --- Nodes ---

    pub fn create(&mut self, type_name: &str, name: Option<&str>) -> Result<NodeId, GraphError> {
        let descriptor = self.registry.lookup(type_name)?;
        let id = self.store.insert(descriptor, name);
        let node = self.store.node(id)?;
        tracing::debug!(graph = %self.name, node = node.name(), %id, "created");
        Ok(id)
    }

    /// Removes a node, its connections, and any aliases pointing at its slots.
    pub fn delete(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.store.remove(id)?;
        self.exposed_params.retain(|_, p| p.node != id);
        self.exposed_results.retain(|_, r| r.node != id);
        tracing::debug!(graph = %self.name, node = %node.name(), "deleted");
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.store.node(id)
    }

    pub fn id_of(&self, name: &str) -> Result<NodeId, GraphError> {
        self.store.id_of(name)
    }

    pub fn param(&self, id: NodeId, name: &str) -> Result<ParamRef, GraphError> {
        self.store.param(id, name)
    }

    pub fn result(&self, id: NodeId) -> Result<ResultRef, GraphError> {
        self.store.result(id)
    }

    /// Resolves a `node.param` / `node.result` path.
    pub fn slot(&self, path: &str) -> Result<SlotRef, GraphError> {
        self.store.resolve(path)
    }

    // --- Values ---

    pub fn set(&mut self, param: ParamRef, value: impl Into<Value>) -> Result<(), GraphError> {
        self.store.set(param, value.into())
    }

    pub fn get(&self, param: ParamRef) -> Result<&Value, GraphError> {
        self.store.get(param)
    }

    pub fn result_value(&self, id: NodeId) -> Result<Option<&Value>, GraphError> {
        self.store.result_value(id)
    }

    /// Forces a node to recompute on the next evaluation.
    pub fn mark_dirty(&mut self, id: NodeId) -> Result<(), GraphError> {
        self.store.node(id)?;
        self.store.unclean(id);
        Ok(())
    }

    pub fn describe(&self, id: NodeId) -> Result<String, GraphError> {
        self.store.describe(id)
    }

    // --- Topology ---

    pub fn connect(&mut self, source: ResultRef, dest: ParamRef) -> Result<(), GraphError> {
        self.store.connect(source, dest, false)
    }

    /// Like `connect`, but replaces an existing incoming edge on `dest`.
    pub fn connect_forced(&mut self, source: ResultRef, dest: ParamRef) -> Result<(), GraphError> {
        self.store.connect(source, dest, true)
    }

    /// Connects slots addressed by path, e.g. `("add1.result", "minus1.b")`.
    pub fn connect_paths(&mut self, source: &str, dest: &str) -> Result<(), GraphError> {
        let source = match self.slot(source)? {
            SlotRef::Result(r) => r,
            SlotRef::Param(_) => {
                return Err(GraphError::SlotKind { path: source.to_string(), expected: "result slot" })
            }
        };
        let dest = match self.slot(dest)? {
            SlotRef::Param(p) => p,
            SlotRef::Result(_) => {
                return Err(GraphError::SlotKind { path: dest.to_string(), expected: "parameter slot" })
            }
        };
        self.connect(source, dest)
    }

    pub fn disconnect(&mut self, source: ResultRef, dest: ParamRef) -> Result<(), GraphError> {
        self.store.disconnect(source, dest)
    }

    pub fn connections(&self) -> &BTreeSet<Edge> {
        self.store.connections()
    }

    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        self.store.dependencies(id).collect()
    }

    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.store.dependents(id).collect()
    }

    pub fn dirty(&self) -> &BTreeSet<NodeId> {
        self.store.dirty()
    }

    pub fn topological_order(&self) -> Result<Vec<NodeId>, String> {
        self.store.topological_order()
    }

    // --- Evaluation ---

    /// Propagates dirtiness downstream, then drains the dirty set with the
    /// active evaluator. On failure the graph keeps whatever partial progress
    /// was made; calling `evaluate` again retries only the dirty nodes.
    pub fn evaluate(&mut self) -> Result<(), GraphError> {
        let propagated = self.store.propagate();
        if self.store.is_clean() {
            return Ok(());
        }

        let started = Instant::now();
        tracing::info!(
            graph = %self.name,
            evaluator = self.evaluator.name(),
            dirty = self.store.dirty().len(),
            propagated,
            "evaluating"
        );

        let outcome = self.evaluator.drain(&mut self.store);
        match &outcome {
            Ok(()) => tracing::info!(graph = %self.name, elapsed = ?started.elapsed(), "evaluated"),
            Err(e) => tracing::warn!(
                graph = %self.name,
                error = %e,
                remaining = self.store.dirty().len(),
                "evaluation failed"
            ),
        }
        outcome
    }

    // --- Exposed slots ---

    /// Publishes a slot under a graph-level alias, defaulting to the slot's own
    /// name (`result` for results). Returns the alias used.
    pub fn expose(&mut self, slot: impl Into<SlotRef>, alias: Option<&str>) -> Result<String, GraphError> {
        let slot = slot.into();
        match slot {
            SlotRef::Param(p) => self.store.get(p).map(|_| ())?,
            SlotRef::Result(r) => self.store.result(r.node).map(|_| ())?,
        };
        let alias = match (alias, slot) {
            (Some(alias), _) => alias.to_string(),
            (None, SlotRef::Param(p)) => self.store.node(p.node)?.param_name(p.index).to_string(),
            (None, SlotRef::Result(_)) => "result".to_string(),
        };
        if self.exposed_params.contains_key(&alias) || self.exposed_results.contains_key(&alias) {
            return Err(GraphError::DuplicateName { name: alias });
        }
        match slot {
            SlotRef::Param(p) => {
                self.exposed_params.insert(alias.clone(), p);
            }
            SlotRef::Result(r) => {
                self.exposed_results.insert(alias.clone(), r);
            }
        }
        Ok(alias)
    }

    /// Removes an alias. Returns false when no such alias exists.
    pub fn unexpose(&mut self, alias: &str) -> bool {
        self.exposed_params.remove(alias).is_some() || self.exposed_results.remove(alias).is_some()
    }

    pub fn exposed_params(&self) -> &BTreeMap<String, ParamRef> { &self.exposed_params }
    pub fn exposed_results(&self) -> &BTreeMap<String, ResultRef> { &self.exposed_results }

    /// Sets exposed parameters by alias, evaluates, and returns every exposed
    /// result keyed by alias.
    pub fn call<'a>(
        &mut self,
        inputs: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<BTreeMap<String, Option<Value>>, GraphError> {
        for (alias, value) in inputs {
            let param = *self.exposed_params.get(alias).ok_or_else(|| GraphError::UnknownSlot {
                node: self.name.clone(),
                slot: alias.to_string(),
            })?;
            self.store.set(param, value)?;
        }
        self.evaluate()?;

        let mut outputs = BTreeMap::new();
        for (alias, r) in &self.exposed_results {
            outputs.insert(alias.clone(), self.store.result_value(r.node)?.cloned());
        }
        Ok(outputs)
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.evaluator.stop();
    }
}
