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

//! The internal optimizer graph. Contracts are translated into
//! [`OptimizerNode`]s held in an arena; edges are handles into the arena, so
//! a contract consumed by several downstream operators becomes one shared
//! node and the graph stays a DAG without ownership cycles.

use crate::contract::{ContractId, ContractKind, Plan};
use crate::error::ErrorCode::{CompilerInconsistency, EmptyPlanError, InvalidPlan};
use crate::error::Result;
use crate::hints::ContractHints;
use crate::optimizer::branch::OpenBranch;
use crate::optimizer::interesting::InterestingProperties;
use crate::statistics::DataStatistics;

/// Handle of an [`OptimizerNode`] in the graph arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Sink,
    Map,
    Reduce,
    Match,
    CoGroup,
    Cross,
    /// Virtual binary node unifying multiple sinks under one root. It exists
    /// only for enumeration and has no runtime counterpart.
    SinkJoiner,
}

impl From<ContractKind> for NodeKind {
    fn from(kind: ContractKind) -> Self {
        match kind {
            ContractKind::Source => NodeKind::Source,
            ContractKind::Sink => NodeKind::Sink,
            ContractKind::Map => NodeKind::Map,
            ContractKind::Reduce => NodeKind::Reduce,
            ContractKind::Match => NodeKind::Match,
            ContractKind::CoGroup => NodeKind::CoGroup,
            ContractKind::Cross => NodeKind::Cross,
        }
    }
}

/// Output size estimates of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeEstimates {
    pub cardinality: u64,
    pub avg_record_width: u64,
    pub num_bytes: u64,
}

/// One logical node of the optimizer graph.
#[derive(Clone, Debug)]
pub struct OptimizerNode {
    /// Post-order id, unique and dense within a graph; 0 until assigned.
    pub id: i32,
    pub kind: NodeKind,
    pub name: String,
    pub inputs: Vec<NodeHandle>,
    /// For each input, the index of this edge among the producer's outputs.
    pub input_edge_out_index: Vec<usize>,
    pub outputs: Vec<NodeHandle>,
    /// Key fields of the first (or only) input; for a Map, the preserved
    /// fields.
    pub keys: Vec<usize>,
    pub second_keys: Vec<usize>,
    pub parallelism: usize,
    pub subtasks_per_instance: usize,
    pub estimates: Option<SizeEstimates>,
    pub hints: ContractHints,
    /// Whether candidates of this node may hold sort buffers or hash tables.
    pub memory_consumer: bool,
    pub interesting: InterestingProperties,
    /// Branches this node participates in that have not reconverged below it.
    pub open_branches: Vec<OpenBranch>,
    /// Branches whose paths all reconverge exactly at this node.
    pub closed_branches: Vec<NodeHandle>,
}

#[derive(Debug)]
pub struct OptimizerGraph {
    pub nodes: Vec<OptimizerNode>,
    pub root: NodeHandle,
    pub sources: Vec<NodeHandle>,
    pub sinks: Vec<NodeHandle>,
}

impl OptimizerGraph {
    pub fn node(&self, h: NodeHandle) -> &OptimizerNode {
        &self.nodes[h.0]
    }

    /// Translate a contract DAG into the optimizer graph: depth-first from
    /// the sinks, allocating a node per first-seen contract, wiring edges on
    /// the way back up and assigning dense post-order ids. Ends with sink
    /// joining so exactly one root remains.
    pub fn build(
        plan: &Plan,
        statistics: &dyn DataStatistics,
        default_parallelism: usize,
        max_machines: usize,
    ) -> Result<Self> {
        if plan.sinks().is_empty() {
            return Err(EmptyPlanError.into());
        }

        let mut builder = GraphBuilder {
            plan,
            statistics,
            default_parallelism,
            max_machines,
            nodes: vec![],
            mapping: vec![None; plan.contracts().len()],
            next_id: 1,
        };

        let mut sink_handles = vec![];
        for &sink in plan.sinks() {
            sink_handles.push(builder.visit(sink)?);
        }

        let GraphBuilder { nodes, next_id, .. } = builder;
        let mut graph = Self {
            sources: nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.kind == NodeKind::Source)
                .map(|(i, _)| NodeHandle(i))
                .collect(),
            nodes,
            root: sink_handles[0],
            sinks: sink_handles,
        };
        graph.join_sinks(next_id, default_parallelism, max_machines);
        Ok(graph)
    }

    /// Wrap the sinks left-deep under synthetic SinkJoiner nodes until one
    /// root remains. Joiner ids continue the post-order sequence, keeping the
    /// id set dense.
    fn join_sinks(&mut self, mut next_id: i32, default_parallelism: usize, max_machines: usize) {
        let mut roots = self.sinks.clone();
        while roots.len() > 1 {
            let left = roots[0];
            let right = roots[1];
            let joiner = NodeHandle(self.nodes.len());
            let left_out = self.nodes[left.0].outputs.len();
            let right_out = self.nodes[right.0].outputs.len();
            self.nodes.push(OptimizerNode {
                id: next_id,
                kind: NodeKind::SinkJoiner,
                name: "sink joiner".to_string(),
                inputs: vec![left, right],
                input_edge_out_index: vec![left_out, right_out],
                outputs: vec![],
                keys: vec![],
                second_keys: vec![],
                parallelism: default_parallelism,
                subtasks_per_instance: subtasks_per_instance(default_parallelism, max_machines),
                estimates: None,
                hints: ContractHints::default(),
                memory_consumer: false,
                interesting: InterestingProperties::default(),
                open_branches: vec![],
                closed_branches: vec![],
            });
            next_id += 1;
            self.nodes[left.0].outputs.push(joiner);
            self.nodes[right.0].outputs.push(joiner);
            roots.splice(0..2, [joiner]);
        }
        self.root = roots[0];
    }
}

struct GraphBuilder<'a> {
    plan: &'a Plan,
    statistics: &'a dyn DataStatistics,
    default_parallelism: usize,
    max_machines: usize,
    nodes: Vec<OptimizerNode>,
    mapping: Vec<Option<NodeHandle>>,
    next_id: i32,
}

impl GraphBuilder<'_> {
    fn visit(&mut self, id: ContractId) -> Result<NodeHandle> {
        // Contract handles only ever point at earlier contracts, so the plan
        // is acyclic by construction; a revisit means DAG sharing.
        if let Some(handle) = self.mapping[id.0] {
            return Ok(handle);
        }

        let contract = self.plan.contract(id);
        if contract.inputs.len() != contract.kind.num_inputs() {
            return Err(CompilerInconsistency(format!(
                "contract '{}' has {} inputs, expected {}",
                contract.name,
                contract.inputs.len(),
                contract.kind.num_inputs()
            ))
            .into());
        }
        match contract.kind {
            ContractKind::Reduce if contract.key_fields.is_empty() => {
                return Err(InvalidPlan(format!(
                    "reduce contract '{}' declares no key fields",
                    contract.name
                ))
                .into());
            }
            ContractKind::Match | ContractKind::CoGroup
                if contract.key_fields.is_empty()
                    || contract.key_fields.len() != contract.second_key_fields.len() =>
            {
                return Err(InvalidPlan(format!(
                    "contract '{}' needs matching key fields on both inputs",
                    contract.name
                ))
                .into());
            }
            _ => {}
        }

        let parallelism = match contract.parallelism {
            Some(dop) if dop >= 1 => dop,
            _ => self.default_parallelism,
        };
        let kind = NodeKind::from(contract.kind);
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(OptimizerNode {
            id: 0,
            kind,
            name: contract.name.clone(),
            inputs: vec![],
            input_edge_out_index: vec![],
            outputs: vec![],
            keys: contract.key_fields.clone(),
            second_keys: contract.second_key_fields.clone(),
            parallelism,
            subtasks_per_instance: subtasks_per_instance(parallelism, self.max_machines),
            estimates: None,
            hints: ContractHints::parse(&contract.hints),
            memory_consumer: matches!(
                kind,
                NodeKind::Reduce | NodeKind::Match | NodeKind::CoGroup | NodeKind::Cross
            ),
            interesting: InterestingProperties::default(),
            open_branches: vec![],
            closed_branches: vec![],
        });
        self.mapping[id.0] = Some(handle);

        for &input in &contract.inputs {
            let child = self.visit(input)?;
            let out_index = self.nodes[child.0].outputs.len();
            self.nodes[child.0].outputs.push(handle);
            self.nodes[handle.0].inputs.push(child);
            self.nodes[handle.0].input_edge_out_index.push(out_index);
        }

        if self.nodes[handle.0].id != 0 {
            return Err(CompilerInconsistency(format!(
                "node '{}' received two ids",
                self.nodes[handle.0].name
            ))
            .into());
        }
        self.nodes[handle.0].id = self.next_id;
        self.next_id += 1;
        self.nodes[handle.0].estimates = self.derive_estimates(handle);
        Ok(handle)
    }

    fn derive_estimates(&self, handle: NodeHandle) -> Option<SizeEstimates> {
        let node = &self.nodes[handle.0];
        let input = |i: usize| self.nodes[node.inputs[i].0].estimates;
        match node.kind {
            NodeKind::Source => {
                self.statistics
                    .table_stats(&node.name)
                    .map(|stats| SizeEstimates {
                        cardinality: stats.cardinality,
                        avg_record_width: stats.avg_record_width,
                        num_bytes: stats.num_bytes,
                    })
            }
            // Without user-function knowledge the safe assumption is that
            // Map and Reduce keep the volume of their input.
            NodeKind::Map | NodeKind::Sink | NodeKind::Reduce => input(0),
            NodeKind::Match | NodeKind::CoGroup => {
                let (left, right) = (input(0)?, input(1)?);
                let cardinality = left.cardinality.max(right.cardinality);
                let avg_record_width = left.avg_record_width + right.avg_record_width;
                Some(SizeEstimates {
                    cardinality,
                    avg_record_width,
                    num_bytes: cardinality.saturating_mul(avg_record_width),
                })
            }
            NodeKind::Cross => {
                let (left, right) = (input(0)?, input(1)?);
                let cardinality = left.cardinality.saturating_mul(right.cardinality);
                let avg_record_width = left.avg_record_width + right.avg_record_width;
                Some(SizeEstimates {
                    cardinality,
                    avg_record_width,
                    num_bytes: cardinality.saturating_mul(avg_record_width),
                })
            }
            NodeKind::SinkJoiner => None,
        }
    }
}

fn subtasks_per_instance(parallelism: usize, max_machines: usize) -> usize {
    if max_machines > 0 {
        (parallelism + max_machines - 1) / max_machines
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::statistics::{NoStatistics, StaticStatistics, TableStats};

    use super::*;

    fn word_count() -> Plan {
        let mut plan = Plan::new("word count");
        let src = plan.add_source("text");
        let map = plan.add_map("tokenize", src);
        let reduce = plan.add_reduce("sum", map, vec![0]);
        plan.add_sink("out", reduce);
        plan
    }

    #[test]
    fn test_ids_are_dense_post_order() {
        let graph = OptimizerGraph::build(&word_count(), &NoStatistics, 4, 2).unwrap();
        let ids: Vec<i32> = graph.nodes.iter().map(|n| n.id).collect();
        let unique: HashSet<i32> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(
            unique,
            (1..=graph.nodes.len() as i32).collect::<HashSet<i32>>()
        );
        // Post-order: every node is assigned after all of its inputs.
        for node in &graph.nodes {
            for &input in &node.inputs {
                assert!(graph.node(input).id < node.id);
            }
        }
    }

    #[test]
    fn test_shared_contract_becomes_one_node() {
        let mut plan = Plan::new("fan out");
        let src = plan.add_source("events");
        let map = plan.add_map("clean", src);
        plan.add_sink("a", map);
        plan.add_sink("b", map);

        let graph = OptimizerGraph::build(&plan, &NoStatistics, 2, 2).unwrap();
        let maps: Vec<_> = graph
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Map)
            .collect();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].outputs.len(), 2);
    }

    #[test]
    fn test_sink_joining_leaves_one_root() {
        let mut plan = Plan::new("two sinks");
        let src = plan.add_source("events");
        let map = plan.add_map("clean", src);
        plan.add_sink("a", map);
        plan.add_sink("b", map);

        let graph = OptimizerGraph::build(&plan, &NoStatistics, 2, 2).unwrap();
        let roots: Vec<_> = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.outputs.is_empty())
            .map(|(i, _)| NodeHandle(i))
            .collect();
        assert_eq!(roots, vec![graph.root]);
        assert_eq!(graph.node(graph.root).kind, NodeKind::SinkJoiner);
        assert_eq!(graph.sinks.len(), 2);
        // Joiner ids keep the sequence dense.
        let ids: HashSet<i32> = graph.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, (1..=graph.nodes.len() as i32).collect());
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let plan = Plan::new("empty");
        let err = OptimizerGraph::build(&plan, &NoStatistics, 2, 2).unwrap_err();
        assert!(format!("{}", err).contains("no sinks"));
    }

    #[test]
    fn test_parallelism_resolution() {
        let mut plan = Plan::new("dop");
        let src = plan.add_source("events");
        let map = plan.add_map("clean", src);
        plan.set_parallelism(map, 16);
        plan.add_sink("out", map);

        let graph = OptimizerGraph::build(&plan, &NoStatistics, 4, 4).unwrap();
        let map_node = graph.nodes.iter().find(|n| n.kind == NodeKind::Map).unwrap();
        assert_eq!(map_node.parallelism, 16);
        assert_eq!(map_node.subtasks_per_instance, 4);
        let src_node = graph
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Source)
            .unwrap();
        assert_eq!(src_node.parallelism, 4);
        assert_eq!(src_node.subtasks_per_instance, 1);
    }

    #[test]
    fn test_source_estimates_from_statistics() {
        let stats = StaticStatistics::new().register(
            "text",
            TableStats {
                cardinality: 1_000,
                avg_record_width: 100,
                num_bytes: 100_000,
            },
        );
        let graph = OptimizerGraph::build(&word_count(), &stats, 4, 2).unwrap();
        let source = graph
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Source)
            .unwrap();
        assert_eq!(source.estimates.unwrap().num_bytes, 100_000);
        // Map and Reduce conservatively keep the input volume.
        let reduce = graph
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Reduce)
            .unwrap();
        assert_eq!(reduce.estimates.unwrap().num_bytes, 100_000);
    }

    #[test]
    fn test_keyless_reduce_is_rejected() {
        let mut plan = Plan::new("bad");
        let src = plan.add_source("events");
        let reduce = plan.add_reduce("sum", src, vec![]);
        plan.add_sink("out", reduce);
        let err = OptimizerGraph::build(&plan, &NoStatistics, 2, 2).unwrap_err();
        assert!(format!("{}", err).contains("key fields"));
    }

    #[test]
    fn test_mismatched_join_keys_are_rejected() {
        let mut plan = Plan::new("bad join");
        let left = plan.add_source("left");
        let right = plan.add_source("right");
        let join = plan.add_match("join", left, right, vec![0, 1], vec![0]);
        plan.add_sink("out", join);
        let err = OptimizerGraph::build(&plan, &NoStatistics, 2, 2).unwrap_err();
        assert!(format!("{}", err).contains("matching key fields"));
    }
}
