//! A synchronous, single-threaded evaluator.
use super::evaluator::Evaluator;
use crate::graph::{GraphError, NodeStore};

/// Applies ready nodes one at a time on the caller's thread, in creation
/// order. The first failure is returned as-is: nodes finished so far stay
/// clean, the failing node and everything not yet run stay dirty.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialEvaluator;

impl SerialEvaluator {
    pub fn new() -> Self { Self }
}

impl Evaluator for SerialEvaluator {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn drain(&mut self, store: &mut NodeStore) -> Result<(), GraphError> {
        while !store.is_clean() {
            let ready = store.ready();
            if ready.is_empty() {
                return Err(GraphError::Stalled { remaining: store.dirty().len() });
            }
            for node in ready {
                tracing::trace!(%node, "applying");
                store.apply(node)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResultRef;
    use crate::store::{TypeDescriptor, Value, ValueType};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_drain_runs_in_dependency_then_creation_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let echo = Arc::new(
            TypeDescriptor::builder("echo")
                .param("x", ValueType::Int)
                .returns(ValueType::Int)
                .build(move |args| {
                    let x = args.get("x").and_then(Value::as_int).unwrap_or(0);
                    sink.lock().unwrap().push(x);
                    Ok(Value::Int(x))
                })
                .unwrap(),
        );
        let mut store = NodeStore::new();
        // Created downstream-first so creation order and dependency order differ.
        let late = store.insert(echo.clone(), None);
        let early = store.insert(echo.clone(), None);
        let other = store.insert(echo, None);
        store.set(store.param(early, "x").unwrap(), Value::Int(1)).unwrap();
        store.set(store.param(other, "x").unwrap(), Value::Int(2)).unwrap();
        store.connect(ResultRef::of(early), store.param(late, "x").unwrap(), false).unwrap();

        SerialEvaluator::new().drain(&mut store).unwrap();

        assert!(store.is_clean());
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 1]);
        assert_eq!(store.result_value(late).unwrap(), Some(&Value::Int(1)));
    }

    #[test]
    fn test_drain_stops_at_first_failure() {
        let fail = Arc::new(
            TypeDescriptor::builder("fail")
                .param("x", ValueType::Int)
                .build(|_| Err("nope".to_string()))
                .unwrap(),
        );
        let mut store = NodeStore::new();
        let first = store.insert(fail.clone(), None);
        let second = store.insert(fail, None);

        let err = SerialEvaluator::new().drain(&mut store).unwrap_err();

        assert_eq!(err, GraphError::Execution { node: "fail1".into(), message: "nope".into() });
        assert!(store.is_dirty(first));
        assert!(store.is_dirty(second));
    }
}
