//! Backward reachability over workflow links.

use std::collections::{BTreeSet, HashSet};

use petgraph::{Direction, graphmap::DiGraphMap};

use crate::model::{Link, NodeId};

/// Directed view of the links, source node to target node.
pub fn link_graph(links: &[Link]) -> DiGraphMap<NodeId, ()> {
    let mut graph = DiGraphMap::new();
    for link in links {
        graph.add_edge(link.source(), link.target(), ());
    }
    graph
}

/// Nodes reachable backward from `inputs`, the inputs included.
///
/// Sources unknown to the workflow (`exists` is false) are walked through but
/// not reported. Every node is expanded at most once, so cycles terminate.
pub fn related_nodes<F>(
    links: &[Link],
    inputs: &[NodeId],
    exists: F,
) -> BTreeSet<NodeId>
where
    F: Fn(NodeId) -> bool,
{
    let graph = link_graph(links);
    let mut found: BTreeSet<NodeId> = inputs.iter().copied().collect();
    let mut visited: HashSet<NodeId> = inputs.iter().copied().collect();
    let mut stack: Vec<NodeId> = inputs.to_vec();

    while let Some(current) = stack.pop() {
        for source in graph.neighbors_directed(current, Direction::Incoming) {
            if !visited.insert(source) {
                continue;
            }
            if exists(source) {
                found.insert(source);
            }
            stack.push(source);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(
        id: i64,
        source: NodeId,
        target: NodeId,
    ) -> Link {
        Link::new(id, source, 0, target, 0, "IMAGE")
    }

    #[test]
    fn test_inputs_without_upstream() {
        let links = vec![link(1, 10, 20), link(2, 20, 30)];
        let related = related_nodes(&links, &[10], |_| true);
        assert_eq!(related, BTreeSet::from([10]));
    }

    #[test]
    fn test_walks_upstream_transitively() {
        // 1 -> 2 -> 5(bridge) -> 6, 3 -> 5
        let links = vec![link(1, 1, 2), link(2, 2, 5), link(3, 3, 5), link(4, 5, 6)];
        let related = related_nodes(&links, &[5], |_| true);
        assert_eq!(related, BTreeSet::from([1, 2, 3, 5]));
    }

    #[test]
    fn test_cycle_terminates() {
        let links = vec![link(1, 1, 2), link(2, 2, 1), link(3, 2, 5)];
        let related = related_nodes(&links, &[5], |_| true);
        assert_eq!(related, BTreeSet::from([1, 2, 5]));
    }

    #[test]
    fn test_unknown_sources_are_skipped() {
        let links = vec![link(1, 99, 2), link(2, 2, 5), link(3, 1, 99)];
        let related = related_nodes(&links, &[5], |id| id != 99);
        assert_eq!(related, BTreeSet::from([1, 2, 5]));
    }
}
