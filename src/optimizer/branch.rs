// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bookkeeping for DAGs that are not trees. A node with fan-out greater than
//! one opens a *branch*; the branch is closed at the node where all of its
//! outgoing paths reconverge. During enumeration, every candidate records
//! which branch alternatives it builds upon, and a reconverging node only
//! combines inputs that agree on every shared branch.

use crate::error::ErrorCode::CompilerInconsistency;
use crate::error::Result;
use crate::optimizer::graph::{NodeHandle, OptimizerGraph};

/// A branch some path below the current node runs through. `joined` has one
/// bit per output edge of the branching node; a path contributes the bits of
/// the edges it came through, and the branch closes once every bit is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenBranch {
    pub branch: NodeHandle,
    pub joined: u64,
}

/// Compute the unclosed-branch stack of every node. Nodes are processed in
/// ascending id order; ids are post-order, so all inputs of a node are
/// processed before the node itself.
pub fn compute_branch_stacks(graph: &mut OptimizerGraph) -> Result<()> {
    let mut order: Vec<NodeHandle> = (0..graph.nodes.len()).map(NodeHandle).collect();
    order.sort_by_key(|h| graph.node(*h).id);

    for handle in order {
        let node = graph.node(handle);
        let inputs = node.inputs.clone();
        let edge_indices = node.input_edge_out_index.clone();

        let mut merged: Vec<OpenBranch> = vec![];
        for (slot, input) in inputs.into_iter().enumerate() {
            let producer = graph.node(input);
            let mut side = producer.open_branches.clone();
            if producer.outputs.len() > 1 {
                if producer.outputs.len() > 64 {
                    return Err(CompilerInconsistency(format!(
                        "node '{}' has fan-out {}, larger than supported",
                        producer.name,
                        producer.outputs.len()
                    ))
                    .into());
                }
                merge_entry(
                    &mut side,
                    OpenBranch {
                        branch: input,
                        joined: 1 << edge_indices[slot],
                    },
                );
            }
            for entry in side {
                merge_entry(&mut merged, entry);
            }
        }

        let mut closed = vec![];
        merged.retain(|entry| {
            let fan_out = graph.node(entry.branch).outputs.len();
            let full = (1u64 << fan_out) - 1;
            if entry.joined == full {
                closed.push(entry.branch);
                false
            } else {
                true
            }
        });
        merged.sort_by_key(|entry| entry.branch);
        closed.sort();

        graph.nodes[handle.0].open_branches = merged;
        graph.nodes[handle.0].closed_branches = closed;
    }
    Ok(())
}

fn merge_entry(stack: &mut Vec<OpenBranch>, entry: OpenBranch) {
    match stack.iter_mut().find(|e| e.branch == entry.branch) {
        Some(existing) => existing.joined |= entry.joined,
        None => stack.push(entry),
    }
}

#[cfg(test)]
mod tests {
    use crate::contract::Plan;
    use crate::optimizer::graph::{NodeKind, OptimizerGraph};
    use crate::statistics::NoStatistics;

    use super::*;

    fn build(plan: &Plan) -> OptimizerGraph {
        let mut graph = OptimizerGraph::build(plan, &NoStatistics, 2, 2).unwrap();
        compute_branch_stacks(&mut graph).unwrap();
        graph
    }

    fn handle_of(graph: &OptimizerGraph, name: &str) -> NodeHandle {
        NodeHandle(
            graph
                .nodes
                .iter()
                .position(|n| n.name == name)
                .unwrap_or_else(|| panic!("no node named {}", name)),
        )
    }

    #[test]
    fn test_tree_has_no_branches() {
        let mut plan = Plan::new("tree");
        let src = plan.add_source("src");
        let map = plan.add_map("map", src);
        plan.add_sink("out", map);

        let graph = build(&plan);
        for node in &graph.nodes {
            assert!(node.open_branches.is_empty());
            assert!(node.closed_branches.is_empty());
        }
    }

    #[test]
    fn test_diamond_opens_and_closes() {
        let mut plan = Plan::new("diamond");
        let src = plan.add_source("src");
        let shared = plan.add_map("shared", src);
        let a = plan.add_map("a", shared);
        let b = plan.add_map("b", shared);
        let join = plan.add_match("join", a, b, vec![0], vec![0]);
        plan.add_sink("out", join);

        let graph = build(&plan);
        let shared_h = handle_of(&graph, "shared");
        let a_node = graph.node(handle_of(&graph, "a"));
        assert_eq!(a_node.open_branches.len(), 1);
        assert_eq!(a_node.open_branches[0].branch, shared_h);
        let b_node = graph.node(handle_of(&graph, "b"));
        assert_eq!(b_node.open_branches.len(), 1);

        let join_node = graph.node(handle_of(&graph, "join"));
        assert!(join_node.open_branches.is_empty());
        assert_eq!(join_node.closed_branches, vec![shared_h]);

        let sink_node = graph.node(handle_of(&graph, "out"));
        assert!(sink_node.open_branches.is_empty());
        assert!(sink_node.closed_branches.is_empty());
    }

    #[test]
    fn test_branch_stays_open_until_full_reconvergence() {
        // `shared` fans out three ways; the first join closes nothing, the
        // second sees all three paths.
        let mut plan = Plan::new("triple");
        let src = plan.add_source("src");
        let shared = plan.add_map("shared", src);
        let a = plan.add_map("a", shared);
        let b = plan.add_map("b", shared);
        let join1 = plan.add_match("join1", a, b, vec![0], vec![0]);
        let join2 = plan.add_match("join2", join1, shared, vec![0], vec![0]);
        plan.add_sink("out", join2);

        let graph = build(&plan);
        let shared_h = handle_of(&graph, "shared");
        let join1_node = graph.node(handle_of(&graph, "join1"));
        assert_eq!(join1_node.open_branches.len(), 1);
        assert_eq!(join1_node.open_branches[0].branch, shared_h);
        assert!(join1_node.closed_branches.is_empty());

        let join2_node = graph.node(handle_of(&graph, "join2"));
        assert!(join2_node.open_branches.is_empty());
        assert_eq!(join2_node.closed_branches, vec![shared_h]);
    }

    #[test]
    fn test_sink_joiner_closes_fan_out_to_sinks() {
        let mut plan = Plan::new("two sinks");
        let src = plan.add_source("src");
        let map = plan.add_map("map", src);
        plan.add_sink("a", map);
        plan.add_sink("b", map);

        let graph = build(&plan);
        let root = graph.node(graph.root);
        assert_eq!(root.kind, NodeKind::SinkJoiner);
        assert_eq!(root.closed_branches, vec![handle_of(&graph, "map")]);
    }
}
