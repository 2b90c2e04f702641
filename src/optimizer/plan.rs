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

//! Physical plan candidates and the finalized plan. Candidates and channels
//! live in a [`PlanArena`]; the enumeration phase fills the arena, the
//! winning subgraph survives into the [`OptimizedPlan`] and everything else
//! is dropped with it.

use std::fmt::Write as _;

use fixedbitset::FixedBitSet;

use crate::cost::Cost;
use crate::optimizer::graph::{NodeHandle, NodeKind};
use crate::optimizer::property::{GlobalProps, LocalProps, Ordering};
use crate::optimizer::strategy::{LocalStrategy, ShipStrategy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

/// A data channel between two candidates: the producer, the shipping
/// strategy and the properties the channel delivers at its receiving end.
/// The target is wired during finalization.
#[derive(Clone, Debug)]
pub struct Channel {
    pub source: CandidateId,
    pub target: Option<CandidateId>,
    pub ship: ShipStrategy,
    pub global: GlobalProps,
    pub local: LocalProps,
    /// Partitioning keys for the repartitioning strategies.
    pub key_fields: Vec<usize>,
    pub sort_order: Option<Ordering>,
}

/// One physical realization of an optimizer node: concrete input channels, a
/// concrete local strategy and the accumulated cost of the subplan below it.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub node: NodeHandle,
    pub kind: NodeKind,
    pub name: String,
    pub local_strategy: LocalStrategy,
    pub inputs: Vec<ChannelId>,
    pub global: GlobalProps,
    pub local: LocalProps,
    /// Cumulative cost of this candidate and everything below it.
    pub cost: Cost,
    /// Cumulative number of repartitioning channels, the first tie-breaker.
    pub partition_ops: u32,
    /// The candidate chosen for every open branch below this plan, sorted by
    /// branch handle. Reconverging nodes only combine agreeing inputs.
    pub branch_choices: Vec<(NodeHandle, CandidateId)>,
    pub parallelism: usize,
    pub subtasks_per_instance: usize,
    /// Memory budget per subtask in bytes, assigned during finalization.
    pub memory_per_subtask: u64,
    pub outgoing: Vec<ChannelId>,
}

#[derive(Debug, Default)]
pub struct PlanArena {
    candidates: Vec<Candidate>,
    channels: Vec<Channel>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_candidate(&mut self, candidate: Candidate) -> CandidateId {
        let id = CandidateId(self.candidates.len());
        self.candidates.push(candidate);
        id
    }

    pub fn add_channel(&mut self, channel: Channel) -> ChannelId {
        let id = ChannelId(self.channels.len());
        self.channels.push(channel);
        id
    }

    pub fn candidate(&self, id: CandidateId) -> &Candidate {
        &self.candidates[id.0]
    }

    pub fn candidate_mut(&mut self, id: CandidateId) -> &mut Candidate {
        &mut self.candidates[id.0]
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0]
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidates_of(&self, node: NodeHandle) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(move |c| c.node == node)
    }
}

/// Final walk over a finished plan, attaching serialization and comparator
/// descriptors. Opaque to the optimizer core.
pub trait PostPass {
    fn apply(&self, plan: &mut OptimizedPlan);
}

/// The default post-pass attaches nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPostPass;

impl PostPass for DefaultPostPass {
    fn apply(&self, _plan: &mut OptimizedPlan) {}
}

/// The chosen plan: the winning candidate subgraph plus the compile-time
/// context (instance type, per-instance memory).
#[derive(Debug)]
pub struct OptimizedPlan {
    job_name: String,
    arena: PlanArena,
    root: CandidateId,
    /// Reachable candidates in visit order, sink joiners excluded.
    nodes: Vec<CandidateId>,
    sources: Vec<CandidateId>,
    sinks: Vec<CandidateId>,
    instance_type: String,
    memory_per_instance: u64,
    finalized: bool,
}

impl OptimizedPlan {
    pub fn new(
        job_name: String,
        arena: PlanArena,
        root: CandidateId,
        instance_type: String,
        memory_per_instance: u64,
    ) -> Self {
        Self {
            job_name,
            arena,
            root,
            nodes: vec![],
            sources: vec![],
            sinks: vec![],
            instance_type,
            memory_per_instance,
            finalized: false,
        }
    }

    /// Collect the reachable candidates, wire channel targets and outgoing
    /// lists, and split the per-instance memory among the memory consumers.
    /// Finalizing twice is a no-op.
    pub fn finalize(&mut self, temp_task_memory: u64) {
        if self.finalized {
            return;
        }

        let mut visited = FixedBitSet::with_capacity(self.arena.num_candidates());
        self.collect(self.root, &mut visited);

        let total_weight: u64 = self
            .nodes
            .iter()
            .map(|&id| {
                let c = self.arena.candidate(id);
                c.local_strategy.memory_consumer_weight() as u64 * c.subtasks_per_instance as u64
            })
            .sum();
        for &id in &self.nodes {
            let weight = self
                .arena
                .candidate(id)
                .local_strategy
                .memory_consumer_weight() as u64;
            if weight == 0 {
                continue;
            }
            let memory = if self.memory_per_instance == 0 {
                temp_task_memory
            } else {
                self.memory_per_instance * weight / total_weight
            };
            self.arena.candidate_mut(id).memory_per_subtask = memory;
        }
        self.finalized = true;
    }

    /// Depth-first collection from the root. Sink joiners are virtual; the
    /// walk looks through them without registering channels, so the real
    /// sinks end up with no outgoing edges.
    fn collect(&mut self, id: CandidateId, visited: &mut FixedBitSet) {
        if visited.contains(id.0) {
            return;
        }
        visited.insert(id.0);

        let candidate = self.arena.candidate(id);
        let channels = candidate.inputs.clone();
        let is_joiner = candidate.kind == NodeKind::SinkJoiner;
        if !is_joiner {
            self.nodes.push(id);
            match candidate.kind {
                NodeKind::Source => self.sources.push(id),
                NodeKind::Sink => self.sinks.push(id),
                _ => {}
            }
        }

        for channel_id in channels {
            let source = self.arena.channel(channel_id).source;
            if !is_joiner {
                self.arena.channel_mut(channel_id).target = Some(id);
                self.arena.candidate_mut(source).outgoing.push(channel_id);
            }
            self.collect(source, visited);
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn instance_type(&self) -> &str {
        &self.instance_type
    }

    pub fn memory_per_instance(&self) -> u64 {
        self.memory_per_instance
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Candidate> {
        self.nodes.iter().map(move |&id| self.arena.candidate(id))
    }

    pub fn sources(&self) -> impl Iterator<Item = &Candidate> {
        self.sources.iter().map(move |&id| self.arena.candidate(id))
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Candidate> {
        self.sinks.iter().map(move |&id| self.arena.candidate(id))
    }

    pub fn arena(&self) -> &PlanArena {
        &self.arena
    }

    pub fn root(&self) -> CandidateId {
        self.root
    }

    /// Render the plan tree for inspection; shared subplans print once per
    /// consumer.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_rec(self.root, None, 0, &mut out);
        out
    }

    fn explain_rec(
        &self,
        id: CandidateId,
        ship: Option<ShipStrategy>,
        level: usize,
        out: &mut String,
    ) {
        let candidate = self.arena.candidate(id);
        write!(out, "{}{:?} \"{}\"", " ".repeat(level * 2), candidate.kind, candidate.name)
            .unwrap();
        if candidate.local_strategy != LocalStrategy::None {
            write!(out, " [{:?}]", candidate.local_strategy).unwrap();
        }
        if let Some(ship) = ship {
            write!(out, " <- {:?}", ship).unwrap();
        }
        out.push('\n');
        for &channel_id in &candidate.inputs {
            let channel = self.arena.channel(channel_id);
            self.explain_rec(channel.source, Some(channel.ship), level + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::optimizer::property::{GlobalProps, LocalProps};

    use super::*;

    fn candidate(node: usize, kind: NodeKind, local: LocalStrategy) -> Candidate {
        Candidate {
            node: NodeHandle(node),
            kind,
            name: format!("n{}", node),
            local_strategy: local,
            inputs: vec![],
            global: GlobalProps::Random,
            local: LocalProps::Any,
            cost: Cost::ZERO,
            partition_ops: 0,
            branch_choices: vec![],
            parallelism: 2,
            subtasks_per_instance: 1,
            memory_per_subtask: 0,
            outgoing: vec![],
        }
    }

    fn two_node_plan() -> OptimizedPlan {
        // Source -> Reduce(Sort) -> Sink
        let mut arena = PlanArena::new();
        let source = arena.add_candidate(candidate(0, NodeKind::Source, LocalStrategy::None));
        let ch1 = arena.add_channel(Channel {
            source,
            target: None,
            ship: ShipStrategy::PartitionHash,
            global: GlobalProps::HashPartitioned(vec![0]),
            local: LocalProps::Any,
            key_fields: vec![0],
            sort_order: None,
        });
        let mut reduce = candidate(1, NodeKind::Reduce, LocalStrategy::Sort);
        reduce.inputs = vec![ch1];
        let reduce = arena.add_candidate(reduce);
        let ch2 = arena.add_channel(Channel {
            source: reduce,
            target: None,
            ship: ShipStrategy::Forward,
            global: GlobalProps::HashPartitioned(vec![0]),
            local: LocalProps::Any,
            key_fields: vec![],
            sort_order: None,
        });
        let mut sink = candidate(2, NodeKind::Sink, LocalStrategy::None);
        sink.inputs = vec![ch2];
        let sink = arena.add_candidate(sink);
        OptimizedPlan::new("test".to_string(), arena, sink, "m1".to_string(), 1 << 30)
    }

    #[test]
    fn test_finalize_wires_and_budgets() {
        let mut plan = two_node_plan();
        plan.finalize(4 << 20);

        assert_eq!(plan.nodes().count(), 3);
        assert_eq!(plan.sources().count(), 1);
        assert_eq!(plan.sinks().count(), 1);

        let reduce = plan.nodes().find(|c| c.kind == NodeKind::Reduce).unwrap();
        // The only memory consumer receives the full instance budget.
        assert_eq!(reduce.memory_per_subtask, 1 << 30);
        assert_eq!(reduce.outgoing.len(), 1);
        let source = plan.sources().next().unwrap();
        assert_eq!(source.outgoing.len(), 1);
        assert_eq!(source.memory_per_subtask, 0);
        let channel = plan.arena().channel(source.outgoing[0]);
        assert_eq!(channel.target, Some(plan.nodes.iter().copied().find(|&id| {
            plan.arena().candidate(id).kind == NodeKind::Reduce
        }).unwrap()));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut plan = two_node_plan();
        plan.finalize(4 << 20);
        let outgoing_before: Vec<usize> = plan.nodes().map(|c| c.outgoing.len()).collect();
        let memory_before: Vec<u64> = plan.nodes().map(|c| c.memory_per_subtask).collect();

        plan.finalize(4 << 20);
        let outgoing_after: Vec<usize> = plan.nodes().map(|c| c.outgoing.len()).collect();
        let memory_after: Vec<u64> = plan.nodes().map(|c| c.memory_per_subtask).collect();
        assert_eq!(outgoing_before, outgoing_after);
        assert_eq!(memory_before, memory_after);
    }

    #[test]
    fn test_unknown_instance_memory_falls_back_to_temp_budget() {
        let mut arena = PlanArena::new();
        let source = arena.add_candidate(candidate(0, NodeKind::Source, LocalStrategy::None));
        let ch = arena.add_channel(Channel {
            source,
            target: None,
            ship: ShipStrategy::PartitionHash,
            global: GlobalProps::HashPartitioned(vec![0]),
            local: LocalProps::Any,
            key_fields: vec![0],
            sort_order: None,
        });
        let mut reduce = candidate(1, NodeKind::Reduce, LocalStrategy::Sort);
        reduce.inputs = vec![ch];
        let reduce = arena.add_candidate(reduce);
        let mut plan = OptimizedPlan::new("test".to_string(), arena, reduce, "m1".to_string(), 0);
        plan.finalize(4 << 20);
        let reduce = plan.nodes().find(|c| c.kind == NodeKind::Reduce).unwrap();
        assert_eq!(reduce.memory_per_subtask, 4 << 20);
    }
}
