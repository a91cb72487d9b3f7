//! persist.rs
//! Saves a graph's structure to JSON and rebuilds it against a registry.
//!
//! Only structure is stored: nodes with their non-default literals, the
//! connections as `node.slot` paths, and the exposed aliases. Computed results
//! are not persisted, so a reopened graph starts with every node dirty.

use crate::graph::{Graph, GraphError, SlotRef};
use crate::store::{TypeRegistry, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed graph document: {0}")]
    Format(#[from] serde_json::Error),
    #[error("Graph could not be rebuilt: {0}")]
    Graph(#[from] GraphError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub literals: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
    /// Alias to slot path, parameters and results alike.
    #[serde(default)]
    pub exposed: BTreeMap<String, String>,
}

impl GraphDocument {
    /// Snapshots the structure of `graph`. Nodes are listed in creation order.
    pub fn capture(graph: &Graph) -> Self {
        let store = graph.store();
        let nodes = store
            .nodes()
            .map(|node| {
                let literals = node
                    .descriptor()
                    .params()
                    .iter()
                    .zip(node.params())
                    .filter(|(spec, slot)| *slot.literal() != spec.initial_value())
                    .map(|(spec, slot)| (spec.name.clone(), slot.literal().clone()))
                    .collect();
                NodeRecord { name: node.name().to_string(), type_name: node.type_name().to_string(), literals }
            })
            .collect();

        let connections = store
            .connections()
            .iter()
            .map(|edge| ConnectionRecord {
                source: store.result_path(edge.source),
                dest: store.param_path(edge.dest),
            })
            .collect();

        let mut exposed: BTreeMap<String, String> = graph
            .exposed_params()
            .iter()
            .map(|(alias, &p)| (alias.clone(), store.param_path(p)))
            .collect();
        exposed.extend(graph.exposed_results().iter().map(|(alias, &r)| (alias.clone(), store.result_path(r))));

        Self { name: graph.name().to_string(), nodes, connections, exposed }
    }

    /// Rebuilds a serially evaluated graph. Node names are restored exactly,
    /// literals are set before connections are made.
    pub fn restore(&self, registry: Arc<TypeRegistry>) -> Result<Graph, GraphError> {
        let mut graph = Graph::new(self.name.clone(), registry);

        for record in &self.nodes {
            let id = graph.create(&record.type_name, Some(record.name.as_str()))?;
            if graph.node(id)?.name() != record.name {
                return Err(GraphError::DuplicateName { name: record.name.clone() });
            }
            for (param, value) in &record.literals {
                let p = graph.param(id, param)?;
                graph.set(p, value.clone())?;
            }
        }

        for connection in &self.connections {
            graph.connect_paths(&connection.source, &connection.dest)?;
        }

        for (alias, path) in &self.exposed {
            let slot: SlotRef = graph.slot(path)?;
            graph.expose(slot, Some(alias.as_str()))?;
        }

        tracing::debug!(graph = %self.name, nodes = self.nodes.len(), "graph restored");
        Ok(graph)
    }
}

/// Writes `graph` to `path` as pretty-printed JSON.
pub fn save(graph: &Graph, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let path = path.as_ref();
    let document = GraphDocument::capture(graph);
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush()?;
    tracing::info!(graph = %document.name, path = %path.display(), "graph saved");
    Ok(())
}

/// Reads a graph saved by [`save`], resolving node types through `registry`.
pub fn open(path: impl AsRef<Path>, registry: Arc<TypeRegistry>) -> Result<Graph, PersistError> {
    let path = path.as_ref();
    let document: GraphDocument = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    let graph = document.restore(registry)?;
    tracing::info!(graph = %document.name, path = %path.display(), "graph opened");
    Ok(graph)
}
