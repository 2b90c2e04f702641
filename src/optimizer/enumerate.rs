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

//! Bottom-up enumeration of plan alternatives. For every optimizer node the
//! enumerator combines the alternatives of its inputs with the admissible
//! shipping and local strategies, costs each candidate and prunes the list
//! down to the Pareto frontier over cost and interesting properties. The
//! alternatives of a node are computed once and memoized, so shared nodes of
//! the DAG are enumerated a single time.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;

use crate::cost::{Cost, CostEstimator, CostingContext, CostingInput};
use crate::error::ErrorCode::CompilerInconsistency;
use crate::error::Result;
use crate::optimizer::graph::{NodeHandle, NodeKind, OptimizerGraph, OptimizerNode};
use crate::optimizer::plan::{Candidate, CandidateId, Channel, PlanArena};
use crate::optimizer::property::{
    GlobalProps, LocalProps, Ordering, RequestedGlobalProps, RequestedLocalProps,
};
use crate::optimizer::strategy::{
    local_strategies, ship_strategy_pairs, unary_ship_strategies, LocalStrategy, ShipStrategy,
};

pub struct Enumerator<'a> {
    graph: &'a OptimizerGraph,
    estimator: &'a dyn CostEstimator,
    arena: PlanArena,
    memo: Vec<Option<Vec<CandidateId>>>,
}

impl<'a> Enumerator<'a> {
    pub fn new(graph: &'a OptimizerGraph, estimator: &'a dyn CostEstimator) -> Self {
        Self {
            graph,
            estimator,
            arena: PlanArena::new(),
            memo: vec![None; graph.nodes.len()],
        }
    }

    /// Enumerate from the root and return the arena together with the single
    /// winning root candidate.
    pub fn run(mut self) -> Result<(PlanArena, CandidateId)> {
        let root_alternatives = self.alternatives(self.graph.root)?;
        match root_alternatives.as_slice() {
            [winner] => Ok((self.arena, *winner)),
            other => Err(CompilerInconsistency(format!(
                "enumeration produced {} root candidates instead of one",
                other.len()
            ))
            .into()),
        }
    }

    fn alternatives(&mut self, handle: NodeHandle) -> Result<Vec<CandidateId>> {
        if let Some(cached) = &self.memo[handle.0] {
            return Ok(cached.clone());
        }
        let candidates = match self.graph.node(handle).inputs.len() {
            0 => self.enumerate_source(handle),
            1 => self.enumerate_unary(handle)?,
            _ => self.enumerate_binary(handle)?,
        };
        let pruned = self.prune(handle, candidates);
        self.memo[handle.0] = Some(pruned.clone());
        Ok(pruned)
    }

    fn enumerate_source(&mut self, handle: NodeHandle) -> Vec<CandidateId> {
        let node = self.graph.node(handle);
        let global = if node.parallelism == 1 {
            GlobalProps::Singleton
        } else {
            GlobalProps::Random
        };
        let candidate = self.make_candidate(
            handle,
            LocalStrategy::None,
            vec![],
            (global, LocalProps::Any),
            vec![],
        );
        vec![candidate]
    }

    fn enumerate_unary(&mut self, handle: NodeHandle) -> Result<Vec<CandidateId>> {
        let input_alternatives = self.alternatives(self.graph.node(handle).inputs[0])?;
        let node = self.graph.node(handle);
        let ships = self.allowed_unary_ships(node);
        let locals = self.allowed_locals(node);

        let mut out = vec![];
        for &input in &input_alternatives {
            let pinnings = match self.combine_pinnings(handle, &[input]) {
                Some(pinnings) => pinnings,
                None => continue,
            };
            for &ship in &ships {
                let spec = self.channel_spec(input, ship, &node.keys, node.parallelism);
                for &local in &locals {
                    if !inputs_ok(node, local, &[&spec]) {
                        continue;
                    }
                    let props = node_props(node, local, &[&spec]);
                    let channel = self.arena.add_channel(spec.clone());
                    out.push(self.make_candidate(
                        handle,
                        local,
                        vec![channel],
                        props,
                        pinnings.clone(),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn enumerate_binary(&mut self, handle: NodeHandle) -> Result<Vec<CandidateId>> {
        let left_alternatives = self.alternatives(self.graph.node(handle).inputs[0])?;
        let right_alternatives = self.alternatives(self.graph.node(handle).inputs[1])?;
        let node = self.graph.node(handle);
        let pairs = self.allowed_ship_pairs(node);
        let locals = self.allowed_locals(node);

        let mut out = vec![];
        for &left in &left_alternatives {
            for &right in &right_alternatives {
                let pinnings = match self.combine_pinnings(handle, &[left, right]) {
                    Some(pinnings) => pinnings,
                    None => continue,
                };
                for &(left_ship, right_ship) in &pairs {
                    let left_spec =
                        self.channel_spec(left, left_ship, &node.keys, node.parallelism);
                    let right_spec =
                        self.channel_spec(right, right_ship, &node.second_keys, node.parallelism);
                    for &local in &locals {
                        if !inputs_ok(node, local, &[&left_spec, &right_spec]) {
                            continue;
                        }
                        let props = node_props(node, local, &[&left_spec, &right_spec]);
                        let left_channel = self.arena.add_channel(left_spec.clone());
                        let right_channel = self.arena.add_channel(right_spec.clone());
                        out.push(self.make_candidate(
                            handle,
                            local,
                            vec![left_channel, right_channel],
                            props,
                            pinnings.clone(),
                        ));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Build a channel for one input alternative without registering it; the
    /// channel enters the arena only when a candidate accepts it. A forward
    /// channel between differing degrees of parallelism redistributes
    /// records, so it keeps no properties.
    fn channel_spec(
        &self,
        source: CandidateId,
        ship: ShipStrategy,
        keys: &[usize],
        consumer_parallelism: usize,
    ) -> Channel {
        let producer = self.arena.candidate(source);
        let (global, local, key_fields, sort_order) = match ship {
            ShipStrategy::Forward if producer.parallelism == consumer_parallelism => {
                (producer.global.clone(), producer.local.clone(), vec![], None)
            }
            ShipStrategy::Forward => (GlobalProps::Random, LocalProps::Any, vec![], None),
            ShipStrategy::PartitionHash => (
                GlobalProps::HashPartitioned(keys.to_vec()),
                LocalProps::Any,
                keys.to_vec(),
                None,
            ),
            ShipStrategy::PartitionRange => {
                let order = Ordering::ascending(keys);
                (
                    GlobalProps::RangePartitioned(keys.to_vec(), order.clone()),
                    LocalProps::Any,
                    keys.to_vec(),
                    Some(order),
                )
            }
            ShipStrategy::Broadcast => (GlobalProps::FullReplication, LocalProps::Any, vec![], None),
        };
        Channel {
            source,
            target: None,
            ship,
            global,
            local,
            key_fields,
            sort_order,
        }
    }

    fn make_candidate(
        &mut self,
        handle: NodeHandle,
        local_strategy: LocalStrategy,
        inputs: Vec<crate::optimizer::plan::ChannelId>,
        (global, local): (GlobalProps, LocalProps),
        branch_choices: Vec<(NodeHandle, CandidateId)>,
    ) -> CandidateId {
        let node = self.graph.node(handle);
        let mut cost = self.own_cost(node, local_strategy, &inputs);
        let mut partition_ops = 0u32;
        for &channel_id in &inputs {
            let channel = self.arena.channel(channel_id);
            if channel.ship != ShipStrategy::Forward {
                partition_ops += 1;
            }
            let producer = self.arena.candidate(channel.source);
            cost = cost + producer.cost;
            partition_ops += producer.partition_ops;
        }
        self.arena.add_candidate(Candidate {
            node: handle,
            kind: node.kind,
            name: node.name.clone(),
            local_strategy,
            inputs,
            global,
            local,
            cost,
            partition_ops,
            branch_choices,
            parallelism: node.parallelism,
            subtasks_per_instance: node.subtasks_per_instance,
            memory_per_subtask: 0,
            outgoing: vec![],
        })
    }

    fn own_cost(
        &self,
        node: &OptimizerNode,
        local: LocalStrategy,
        inputs: &[crate::optimizer::plan::ChannelId],
    ) -> Cost {
        let costing_inputs = inputs
            .iter()
            .map(|&channel_id| {
                let channel = self.arena.channel(channel_id);
                let producer_node = self.arena.candidate(channel.source).node;
                CostingInput {
                    ship: channel.ship,
                    estimates: self.graph.node(producer_node).estimates.as_ref(),
                }
            })
            .collect();
        self.estimator.cost(&CostingContext {
            kind: node.kind,
            local,
            parallelism: node.parallelism,
            inputs: costing_inputs,
        })
    }

    /// Merge the branch pinnings of the chosen input alternatives. Returns
    /// `None` when the inputs disagree on a shared branch; branches closing
    /// at this node are dropped from the result.
    fn combine_pinnings(
        &self,
        handle: NodeHandle,
        input_candidates: &[CandidateId],
    ) -> Option<Vec<(NodeHandle, CandidateId)>> {
        fn add(
            merged: &mut Vec<(NodeHandle, CandidateId)>,
            branch: NodeHandle,
            choice: CandidateId,
        ) -> bool {
            match merged.iter().find(|(b, _)| *b == branch) {
                Some((_, existing)) => *existing == choice,
                None => {
                    merged.push((branch, choice));
                    true
                }
            }
        }

        let node = self.graph.node(handle);
        let mut merged = vec![];
        for (slot, &input_candidate) in input_candidates.iter().enumerate() {
            for &(branch, choice) in &self.arena.candidate(input_candidate).branch_choices {
                if !add(&mut merged, branch, choice) {
                    return None;
                }
            }
            let input_node = node.inputs[slot];
            if self.graph.node(input_node).outputs.len() > 1
                && !add(&mut merged, input_node, input_candidate)
            {
                return None;
            }
        }
        merged.retain(|(branch, _)| !node.closed_branches.contains(branch));
        merged.sort_by_key(|(branch, _)| *branch);
        Some(merged)
    }

    /// Keep the Pareto frontier: among candidates with identical branch
    /// pinnings and identical interesting-property coverage only the cheapest
    /// survives, and a candidate dominated by one with broader coverage at no
    /// extra cost is dropped.
    fn prune(&mut self, handle: NodeHandle, candidates: Vec<CandidateId>) -> Vec<CandidateId> {
        let node = self.graph.node(handle);

        let mut groups: BTreeMap<(Vec<(NodeHandle, CandidateId)>, u64), CandidateId> =
            BTreeMap::new();
        for id in candidates {
            let fingerprint = self.fingerprint(node, id);
            let key = (self.arena.candidate(id).branch_choices.clone(), fingerprint);
            match groups.get_mut(&key) {
                Some(best) => {
                    if self.cmp_candidates(id, *best) == CmpOrdering::Less {
                        *best = id;
                    }
                }
                None => {
                    groups.insert(key, id);
                }
            }
        }

        let survivors: Vec<((Vec<(NodeHandle, CandidateId)>, u64), CandidateId)> =
            groups.into_iter().collect();
        let mut result = vec![];
        for (i, ((pins, fingerprint), id)) in survivors.iter().enumerate() {
            let dominated = survivors.iter().enumerate().any(|(j, ((p, f), other))| {
                i != j
                    && p == pins
                    && f & fingerprint == *fingerprint
                    && f != fingerprint
                    && self.cmp_candidates(*other, *id) != CmpOrdering::Greater
            });
            if !dominated {
                result.push(*id);
            }
        }
        result
    }

    /// Which of the node's interesting properties the candidate delivers,
    /// one bit per property.
    fn fingerprint(&self, node: &OptimizerNode, id: CandidateId) -> u64 {
        let candidate = self.arena.candidate(id);
        let mut bits = 0u64;
        let mut bit = 0usize;
        for (prop, _) in node.interesting.global.iter().take(64) {
            if candidate.global.satisfies(prop) {
                bits |= 1 << bit;
            }
            bit += 1;
        }
        for (prop, _) in node.interesting.local.iter().take(64 - bit.min(64)) {
            if candidate.local.satisfies(prop, &candidate.global) {
                bits |= 1 << bit;
            }
            bit += 1;
        }
        bits
    }

    /// Deterministic candidate order: cheaper first, then fewer
    /// repartitioning steps, then strategy enum order, then arena order.
    fn cmp_candidates(&self, a: CandidateId, b: CandidateId) -> CmpOrdering {
        let ca = self.arena.candidate(a);
        let cb = self.arena.candidate(b);
        ca.cost
            .scalar()
            .partial_cmp(&cb.cost.scalar())
            .unwrap_or(CmpOrdering::Equal)
            .then(ca.partition_ops.cmp(&cb.partition_ops))
            .then_with(|| {
                let ships_a: Vec<ShipStrategy> =
                    ca.inputs.iter().map(|&c| self.arena.channel(c).ship).collect();
                let ships_b: Vec<ShipStrategy> =
                    cb.inputs.iter().map(|&c| self.arena.channel(c).ship).collect();
                ships_a.cmp(&ships_b)
            })
            .then(ca.local_strategy.cmp(&cb.local_strategy))
            .then(a.cmp(&b))
    }

    fn allowed_unary_ships(&self, node: &OptimizerNode) -> Vec<ShipStrategy> {
        let table = unary_ship_strategies(node.kind);
        match node.hints.ship_restriction(0, 1) {
            Some(ship) if table.contains(&ship) => vec![ship],
            Some(ship) => {
                log::warn!(
                    "ship strategy hint {:?} is inadmissible for {:?}, ignoring",
                    ship,
                    node.kind
                );
                table.to_vec()
            }
            None => table.to_vec(),
        }
    }

    fn allowed_ship_pairs(&self, node: &OptimizerNode) -> Vec<(ShipStrategy, ShipStrategy)> {
        let table = ship_strategy_pairs(node.kind);
        let mut pairs = table.to_vec();
        if let Some(ship) = node.hints.ship_restriction(0, 2) {
            pairs.retain(|(left, _)| *left == ship);
        }
        if let Some(ship) = node.hints.ship_restriction(1, 2) {
            pairs.retain(|(_, right)| *right == ship);
        }
        if pairs.is_empty() {
            log::warn!(
                "ship strategy hints leave no admissible pair for {:?}, ignoring",
                node.kind
            );
            pairs = table.to_vec();
        }
        pairs
    }

    fn allowed_locals(&self, node: &OptimizerNode) -> Vec<LocalStrategy> {
        let table = local_strategies(node.kind);
        match node.hints.local_strategy {
            Some(local) if table.contains(&local) => vec![local],
            Some(local) => {
                log::warn!(
                    "local strategy hint {:?} is inadmissible for {:?}, ignoring",
                    local,
                    node.kind
                );
                table.to_vec()
            }
            None => table.to_vec(),
        }
    }
}

/// Whether the channels deliver what the node needs under the given local
/// strategy. This is the property-consistency check of the compiler: a
/// combination that fails here never becomes a candidate.
fn inputs_ok(node: &OptimizerNode, local: LocalStrategy, channels: &[&Channel]) -> bool {
    let hash_on = |channel: &Channel, keys: &[usize]| {
        channel
            .global
            .satisfies(&RequestedGlobalProps::HashPartitioned(keys.to_vec()))
    };
    let range_on = |channel: &Channel, keys: &[usize]| {
        channel
            .global
            .satisfies(&RequestedGlobalProps::RangePartitioned(keys.to_vec()))
    };
    let sorted_on = |channel: &Channel, keys: &[usize]| {
        channel.local.satisfies(
            &RequestedLocalProps::Ordered(Ordering::ascending(keys)),
            &channel.global,
        )
    };

    match node.kind {
        NodeKind::Source | NodeKind::Map | NodeKind::Sink | NodeKind::SinkJoiner => true,
        NodeKind::Reduce => {
            hash_on(channels[0], &node.keys) || range_on(channels[0], &node.keys)
        }
        NodeKind::Match | NodeKind::CoGroup => {
            let (left, right) = (channels[0], channels[1]);
            let left_replicated = left.global == GlobalProps::FullReplication;
            let right_replicated = right.global == GlobalProps::FullReplication;
            if left_replicated && right_replicated {
                return false;
            }
            // Co-partitioning requires the same scheme on both sides; a
            // hash-partitioned and a range-partitioned input do not align.
            let partition_ok = left_replicated
                || right_replicated
                || (hash_on(left, &node.keys) && hash_on(right, &node.second_keys))
                || (range_on(left, &node.keys) && range_on(right, &node.second_keys));
            if !partition_ok {
                return false;
            }
            match local {
                LocalStrategy::SortBothMerge
                | LocalStrategy::HashBuildFirst
                | LocalStrategy::HashBuildSecond => true,
                LocalStrategy::SortFirstMerge => sorted_on(right, &node.second_keys),
                LocalStrategy::SortSecondMerge => sorted_on(left, &node.keys),
                LocalStrategy::Merge => {
                    sorted_on(left, &node.keys) && sorted_on(right, &node.second_keys)
                }
                _ => false,
            }
        }
        NodeKind::Cross => {
            let (left, right) = (channels[0], channels[1]);
            match local {
                // The inner side must be fully available at every subtask.
                LocalStrategy::NestedLoopStreamedOuterFirst
                | LocalStrategy::NestedLoopBlockedOuterFirst => {
                    right.global == GlobalProps::FullReplication
                }
                LocalStrategy::NestedLoopStreamedOuterSecond
                | LocalStrategy::NestedLoopBlockedOuterSecond => {
                    left.global == GlobalProps::FullReplication
                }
                _ => false,
            }
        }
    }
}

/// The properties a candidate delivers at its output.
fn node_props(
    node: &OptimizerNode,
    local: LocalStrategy,
    channels: &[&Channel],
) -> (GlobalProps, LocalProps) {
    match node.kind {
        NodeKind::Source => unreachable!("sources are enumerated directly"),
        NodeKind::Sink => (channels[0].global.clone(), channels[0].local.clone()),
        NodeKind::SinkJoiner => (GlobalProps::Random, LocalProps::Any),
        NodeKind::Map => {
            let preserved = &node.keys;
            let global = if channels[0].global.survives(preserved) {
                channels[0].global.clone()
            } else {
                GlobalProps::Random
            };
            let local_props = match &channels[0].local {
                LocalProps::Ordered(order)
                    if order.fields().iter().all(|f| preserved.contains(f)) =>
                {
                    channels[0].local.clone()
                }
                LocalProps::Grouped(fields) if fields.iter().all(|f| preserved.contains(f)) => {
                    channels[0].local.clone()
                }
                _ => LocalProps::Any,
            };
            (global, local_props)
        }
        NodeKind::Reduce => (
            channels[0].global.clone(),
            LocalProps::Ordered(Ordering::ascending(&node.keys)),
        ),
        NodeKind::Match | NodeKind::CoGroup => {
            let replicated = channels[0].global == GlobalProps::FullReplication
                || channels[1].global == GlobalProps::FullReplication;
            let global = if replicated {
                GlobalProps::Random
            } else {
                channels[0].global.clone()
            };
            let local_props = match local {
                LocalStrategy::SortBothMerge
                | LocalStrategy::SortFirstMerge
                | LocalStrategy::SortSecondMerge
                | LocalStrategy::Merge => LocalProps::Ordered(Ordering::ascending(&node.keys)),
                _ => LocalProps::Any,
            };
            (global, local_props)
        }
        NodeKind::Cross => (GlobalProps::Random, LocalProps::Any),
    }
}
