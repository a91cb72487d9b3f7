// Core of an incremental dataflow engine.
// Nodes wrap registered callables, results feed parameters through typed
// connections, and an evaluator recomputes only what went stale.

pub mod analysis;
pub mod compute;
pub mod display;
pub mod graph;
pub mod persist;
pub mod store;

pub use compute::{Evaluator, EvaluatorConfig, ParallelEvaluator, SerialEvaluator, Strategy};
pub use graph::{Edge, Graph, GraphError, NodeId, ParamRef, ResultRef, SlotRef};
pub use persist::{open, save, PersistError};
pub use store::{Args, ParamKind, ParamSpec, TypeConstraint, TypeDescriptor, TypeRegistry, Value, ValueType};

/// Version of the engine, as recorded in the crate manifest.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
