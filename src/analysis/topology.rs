use crate::graph::NodeId;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Node-level adjacency: for each node, the set of neighbouring nodes in one
/// direction (dependencies or dependents).
pub type Adjacency = BTreeMap<NodeId, BTreeSet<NodeId>>;

fn neighbours(adjacency: &Adjacency, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    adjacency.get(&node).into_iter().flatten().copied()
}

/// Identifies all nodes reachable from the start nodes, start nodes included.
/// Used for dirty propagation over the dependents relation.
///
/// Iterative BFS with a visited set: diamonds are processed once and stack
/// depth does not grow with graph depth.
pub fn downstream_from(
    dependents: &Adjacency,
    start_nodes: impl IntoIterator<Item = NodeId>,
) -> BTreeSet<NodeId> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<NodeId> = start_nodes.into_iter().collect();

    while let Some(node) = queue.pop_front() {
        if visited.insert(node) {
            queue.extend(neighbours(dependents, node).filter(|n| !visited.contains(n)));
        }
    }
    visited
}

/// True when `target` is reachable from `from` (or equal to it).
///
/// Connecting `source -> dest` closes a cycle exactly when `source` is
/// reachable from `dest` over the dependents relation.
pub fn reaches(dependents: &Adjacency, from: NodeId, target: NodeId) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![from];

    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if visited.insert(node) {
            stack.extend(neighbours(dependents, node).filter(|n| !visited.contains(n)));
        }
    }
    false
}

/// Returns a topological order (dependencies first) using Kahn's Algorithm.
/// Ties are broken by `NodeId`, i.e. creation order.
pub fn sort(
    nodes: impl IntoIterator<Item = NodeId>,
    dependencies: &Adjacency,
    dependents: &Adjacency,
) -> Result<Vec<NodeId>, String> {
    let nodes: Vec<NodeId> = nodes.into_iter().collect();
    let mut in_degree: BTreeMap<NodeId, usize> = nodes
        .iter()
        .map(|&n| (n, neighbours(dependencies, n).count()))
        .collect();

    let mut ready: BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for child in neighbours(dependents, node) {
            if let Some(d) = in_degree.get_mut(&child) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(format!(
            "Cycle detected: {} node(s) could not be ordered",
            nodes.len() - order.len()
        ));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u32) -> NodeId { NodeId(i) }

    /// Builds (dependencies, dependents) from `(upstream, downstream)` pairs.
    fn build(edges: &[(u32, u32)]) -> (Adjacency, Adjacency) {
        let mut deps = Adjacency::new();
        let mut dependents = Adjacency::new();
        for &(up, down) in edges {
            deps.entry(id(down)).or_default().insert(id(up));
            dependents.entry(id(up)).or_default().insert(id(down));
        }
        (deps, dependents)
    }

    #[test]
    fn test_downstream_diamond() {
        // Shape: A -> B, A -> C, B+C -> D, E detached
        let (_, dependents) = build(&[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let reached = downstream_from(&dependents, [id(1)]);
        assert_eq!(reached, [id(1), id(3)].into_iter().collect());

        let reached = downstream_from(&dependents, [id(0), id(4)]);
        assert_eq!(reached.len(), 5);
    }

    #[test]
    fn test_reaches() {
        let (_, dependents) = build(&[(0, 1), (1, 2)]);
        assert!(reaches(&dependents, id(0), id(2)));
        assert!(reaches(&dependents, id(1), id(1)));
        assert!(!reaches(&dependents, id(2), id(0)));
    }

    #[test]
    fn test_sort_diamond_dependency() {
        let (deps, dependents) = build(&[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let order = sort((0..4).map(id), &deps, &dependents).expect("Sort failed");
        assert_eq!(order, vec![id(0), id(1), id(2), id(3)]);
    }

    #[test]
    fn test_sort_detects_cycle() {
        let (deps, dependents) = build(&[(0, 1), (1, 0)]);
        let err = sort([id(0), id(1)], &deps, &dependents).unwrap_err();
        assert!(err.contains("Cycle detected"), "Msg: {}", err);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let edges: Vec<(u32, u32)> = (0..100_000).map(|i| (i, i + 1)).collect();
        let (_, dependents) = build(&edges);
        assert_eq!(downstream_from(&dependents, [id(0)]).len(), 100_001);
        assert!(reaches(&dependents, id(0), id(100_000)));
    }
}
