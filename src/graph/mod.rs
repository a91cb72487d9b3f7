//! Defines the core data structures for the dataflow graph.
pub mod dag;
pub mod error;
pub mod node;
pub mod storage;

// Re-export key types for convenient access
pub use dag::Graph;
pub use error::GraphError;
pub use node::{Edge, Node, NodeId, ParamRef, ParameterSlot, ResultRef, ResultSlot, SlotRef};
pub use storage::NodeStore;
