//! The evaluator abstraction: strategies for draining a graph's dirty set.
use crate::graph::{GraphError, NodeStore};

/// Drains the dirty set of a [`NodeStore`].
///
/// The graph owns exactly one evaluator, calls `start` before first use and
/// `stop` when replacing it or when the graph is dropped. `drain` runs after
/// dirty propagation and returns once the dirty set is empty or a node fails.
pub trait Evaluator: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<(), GraphError> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn drain(&mut self, store: &mut NodeStore) -> Result<(), GraphError>;
}
