use crate::graph::{Graph, GraphError, NodeId, NodeStore};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the upstream audit tree of `target`: every node it reads from,
/// with current values and the literal or upstream node behind each argument.
/// A node reached a second time is printed as a reference to its first level.
pub fn format_trace(graph: &Graph, target: NodeId) -> Result<String, GraphError> {
    let store = graph.store();
    let name = store.node(target)?.name();

    let mut tracer = Tracer { store, visited_at_level: HashMap::new(), output: String::new() };
    let _ = writeln!(tracer.output, "AUDIT TRACE for node '{}':", name);
    let _ = writeln!(tracer.output, "--------------------------------------------------");
    tracer.trace(target);
    Ok(tracer.output)
}

struct Tracer<'a> {
    store: &'a NodeStore,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

struct Frame {
    node: NodeId,
    level: usize,
    prefix: String,
}

impl<'a> Tracer<'a> {
    /// Depth-first with an explicit stack so deep chains cannot overflow.
    fn trace(&mut self, root: NodeId) {
        let mut stack = vec![Frame { node: root, level: 1, prefix: String::new() }];

        while let Some(Frame { node: node_id, level, prefix }) = stack.pop() {
            let Ok(node) = self.store.node(node_id) else {
                let _ = writeln!(self.output, "{}[L{}] {} [missing]", prefix, level, node_id);
                continue;
            };

            if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
                let _ = writeln!(self.output, "{}-> {} (Ref to L{})", prefix, node.name(), first_seen);
                continue;
            }
            self.visited_at_level.insert(node_id, level);

            let value = match node.result().value() {
                Some(v) => format!("[{}]", v),
                None => "[?]".to_string(),
            };
            let dirty = if self.store.is_dirty(node_id) { " [dirty]" } else { "" };
            let call = self.format_call(node_id);
            let _ = writeln!(self.output, "{}[L{}] {}{} = {}{}", prefix, level, node.name(), value, call, dirty);

            let parents: Vec<NodeId> = node.params().iter().filter_map(|p| p.incoming()).map(|r| r.node).collect();
            let stem = build_child_stem(&prefix);
            // Reversed so the first parameter is printed first.
            for (i, &parent) in parents.iter().enumerate().rev() {
                let connector = if i == parents.len() - 1 { "`--" } else { "|--" };
                stack.push(Frame { node: parent, level: level + 1, prefix: format!("{}{}", stem, connector) });
            }
        }
    }

    /// `type(a=<literal>, b=<upstream node>)`
    fn format_call(&self, id: NodeId) -> String {
        let Ok(node) = self.store.node(id) else { return "?".into() };
        let args: Vec<String> = node
            .params()
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                let source = match slot.incoming() {
                    Some(r) => self.store.node(r.node).map(|n| n.name().to_string()).unwrap_or_else(|_| r.node.to_string()),
                    None => slot.literal().to_string(),
                };
                format!("{}={}", node.param_name(i as u32), source)
            })
            .collect();
        format!("{}({})", node.type_name(), args.join(", "))
    }
}

fn build_child_stem(current_prefix: &str) -> String {
    current_prefix.replace("`--", "   ").replace("|--", "|  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResultRef;
    use crate::store::{TypeDescriptor, TypeRegistry, Value, ValueType};
    use std::sync::Arc;

    fn graph() -> Graph {
        let mut registry = TypeRegistry::new();
        for (name, op) in [("add", (|a: f64, b: f64| a + b) as fn(f64, f64) -> f64), ("mult", |a: f64, b: f64| a * b)] {
            registry
                .register(
                    TypeDescriptor::builder(name)
                        .param("a", ValueType::Float)
                        .param("b", ValueType::Float)
                        .returns(ValueType::Float)
                        .build(move |args| Ok(Value::Float(op(args.float("a")?, args.float("b")?))))
                        .unwrap(),
                )
                .unwrap();
        }
        let mut graph = Graph::new("trace", Arc::new(registry));
        let add1 = graph.create("add", None).unwrap();
        let mult1 = graph.create("mult", None).unwrap();
        graph.set(graph.param(add1, "a").unwrap(), 1.0).unwrap();
        graph.set(graph.param(add1, "b").unwrap(), 2.0).unwrap();
        graph.connect(ResultRef::of(add1), graph.param(mult1, "a").unwrap()).unwrap();
        graph.connect(ResultRef::of(add1), graph.param(mult1, "b").unwrap()).unwrap();
        graph
    }

    #[test]
    fn test_trace_marks_dirty_and_references() {
        let graph = graph();
        let mult1 = graph.id_of("mult1").unwrap();
        let trace = format_trace(&graph, mult1).unwrap();

        assert!(trace.starts_with("AUDIT TRACE for node 'mult1':"));
        assert!(trace.contains("[L1] mult1[?] = mult(a=add1, b=add1) [dirty]"), "{}", trace);
        assert!(trace.contains("|--[L2] add1[?] = add(a=1.0, b=2.0) [dirty]"), "{}", trace);
        assert!(trace.contains("`---> add1 (Ref to L2)"), "{}", trace);
    }

    #[test]
    fn test_trace_after_evaluation() {
        let mut graph = graph();
        graph.evaluate().unwrap();
        let mult1 = graph.id_of("mult1").unwrap();
        let trace = format_trace(&graph, mult1).unwrap();

        assert!(trace.contains("[L1] mult1[9.0] = mult(a=add1, b=add1)\n"), "{}", trace);
        assert!(!trace.contains("[dirty]"));
        assert!(format_trace(&graph, NodeId(99)).is_err());
    }
}
