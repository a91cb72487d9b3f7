//! A node invocation detached from the graph, so it can run on any thread.
use crate::graph::{GraphError, NodeId};
use crate::store::{Args, NodeFn, Value};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Arguments are assembled and the callable captured by value at submission
/// time; the call never touches the graph again.
#[derive(Clone)]
pub struct NodeCall {
    pub node: NodeId,
    pub name: String,
    pub func: Arc<NodeFn>,
    pub args: Args,
}

impl fmt::Debug for NodeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCall")
            .field("node", &self.node)
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl NodeCall {
    /// Runs the callable. Errors and panics both become
    /// [`GraphError::Execution`] tagged with the node name.
    pub fn invoke(&self) -> Result<Value, GraphError> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.func)(&self.args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(self.failure(message)),
            Err(payload) => Err(self.failure(format!("panicked: {}", panic_message(payload.as_ref())))),
        }
    }

    fn failure(&self, message: String) -> GraphError {
        GraphError::Execution { node: self.name.clone(), message }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
