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

//! The compiler driver. [`PactCompiler`] turns a logical [`Plan`] into an
//! [`OptimizedPlan`] by resolving the target cluster, building the optimizer
//! graph, propagating interesting properties, tracking DAG branches,
//! enumerating alternatives and finalizing the winner.

pub mod branch;
pub mod enumerate;
pub mod graph;
pub mod interesting;
pub mod plan;
pub mod property;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{
    fetch_instance_types, pick_instance_type, ClusterInfoProvider, InstanceTypeDescription,
};
use crate::config::CompilerConfig;
use crate::contract::Plan;
use crate::cost::CostEstimator;
use crate::error::Result;
use crate::statistics::DataStatistics;

use self::branch::compute_branch_stacks;
use self::enumerate::Enumerator;
use self::graph::OptimizerGraph;
use self::interesting::propagate_interesting_properties;
use self::plan::{DefaultPostPass, OptimizedPlan, PostPass};

/// The cost-based compiler. All configured fields are read-only after
/// construction; every compilation runs on the calling thread with its own
/// visitor state, so one compiler may serve concurrent compilations.
pub struct PactCompiler {
    config: CompilerConfig,
    statistics: Arc<dyn DataStatistics>,
    cost_estimator: Arc<dyn CostEstimator>,
    cluster_info: Arc<dyn ClusterInfoProvider>,
}

impl PactCompiler {
    pub fn new(
        config: CompilerConfig,
        statistics: Arc<dyn DataStatistics>,
        cost_estimator: Arc<dyn CostEstimator>,
        cluster_info: Arc<dyn ClusterInfoProvider>,
    ) -> Result<Self> {
        Ok(Self {
            config: config.validate()?,
            statistics,
            cost_estimator,
            cluster_info,
        })
    }

    /// Compile with the default post-pass, resolving the target instance
    /// type through the cluster-info provider.
    pub fn compile(&self, plan: &Plan) -> Result<OptimizedPlan> {
        self.compile_with_post_pass(plan, &DefaultPostPass)
    }

    pub fn compile_with_post_pass(
        &self,
        plan: &Plan,
        post_pass: &dyn PostPass,
    ) -> Result<OptimizedPlan> {
        let types = fetch_instance_types(
            Arc::clone(&self.cluster_info),
            Duration::from_millis(self.config.cluster_info_timeout_ms),
        )?;
        let (type_name, instance) = pick_instance_type(&types)?;
        self.compile_for_instance(plan, &type_name, instance, post_pass)
    }

    /// Compile against a known instance type, skipping the cluster lookup.
    pub fn compile_with_instance(
        &self,
        plan: &Plan,
        instance_type: &str,
        instance: InstanceTypeDescription,
        post_pass: &dyn PostPass,
    ) -> Result<OptimizedPlan> {
        self.compile_for_instance(plan, instance_type, instance, post_pass)
    }

    fn compile_for_instance(
        &self,
        plan: &Plan,
        instance_type: &str,
        instance: InstanceTypeDescription,
        post_pass: &dyn PostPass,
    ) -> Result<OptimizedPlan> {
        let max_machines = self.reconcile_max_machines(plan, &instance);
        let parallelism = self.reconcile_parallelism(plan, max_machines);
        let memory_per_instance = instance
            .hardware
            .map(|hw| (hw.free_memory as f64 * self.config.memory_reserve_fraction) as u64)
            .unwrap_or(0);
        log::debug!(
            "compiling '{}' for {} machines of type {}, parallelism {}",
            plan.job_name,
            max_machines,
            instance_type,
            parallelism
        );

        let mut graph =
            OptimizerGraph::build(plan, self.statistics.as_ref(), parallelism, max_machines)?;
        propagate_interesting_properties(&mut graph, self.cost_estimator.as_ref());
        compute_branch_stacks(&mut graph)?;
        let (arena, root) = Enumerator::new(&graph, self.cost_estimator.as_ref()).run()?;

        let mut optimized = OptimizedPlan::new(
            plan.job_name.clone(),
            arena,
            root,
            instance_type.to_string(),
            memory_per_instance,
        );
        optimized.finalize(self.config.temp_task_memory_mib << 20);
        post_pass.apply(&mut optimized);
        Ok(optimized)
    }

    /// Per-job limit, clamped by the global config, clamped by the number of
    /// actually available instances.
    fn reconcile_max_machines(&self, plan: &Plan, instance: &InstanceTypeDescription) -> usize {
        let mut limit = plan.max_machines.unwrap_or(0);
        if self.config.max_machines > 0 {
            limit = if limit > 0 {
                limit.min(self.config.max_machines)
            } else {
                self.config.max_machines
            };
        }
        let available = instance.max_instances.max(1);
        if limit > 0 {
            limit.min(available)
        } else {
            available
        }
    }

    fn reconcile_parallelism(&self, plan: &Plan, max_machines: usize) -> usize {
        let intra = self.config.max_intra_node_parallelism;
        let mut parallelism = plan
            .default_parallelism
            .filter(|dop| *dop > 0)
            .unwrap_or(self.config.default_parallelism);
        if intra > 0 && parallelism > max_machines * intra as usize {
            log::warn!(
                "parallelism {} exceeds {} machines x {} subtasks, clamping",
                parallelism,
                max_machines,
                intra
            );
            parallelism = max_machines * intra as usize;
        }
        if parallelism == 0 {
            parallelism = if intra > 0 {
                max_machines * intra as usize
            } else {
                max_machines
            };
        }
        parallelism.max(1)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::time::Instant;

    use assert_matches::assert_matches;
    use maplit::hashmap;

    use crate::cluster::HardwareDescription;
    use crate::cost::DefaultCostEstimator;
    use crate::error::Result;
    use crate::hints::{HINT_LOCAL_STRATEGY, HINT_INPUT_RIGHT_SHIP_STRATEGY};
    use crate::optimizer::graph::NodeKind;
    use crate::optimizer::plan::Candidate;
    use crate::optimizer::property::GlobalProps;
    use crate::optimizer::strategy::{LocalStrategy, ShipStrategy};
    use crate::statistics::{StaticStatistics, TableStats};

    use super::*;

    struct StaticCluster(HashMap<String, InstanceTypeDescription>);

    impl ClusterInfoProvider for StaticCluster {
        fn list_instance_types(&self) -> Result<HashMap<String, InstanceTypeDescription>> {
            Ok(self.0.clone())
        }
    }

    struct UnresponsiveCluster;

    impl ClusterInfoProvider for UnresponsiveCluster {
        fn list_instance_types(&self) -> Result<HashMap<String, InstanceTypeDescription>> {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(HashMap::new())
        }
    }

    fn four_machine_cluster() -> Arc<StaticCluster> {
        Arc::new(StaticCluster(hashmap! {
            "m1.large".to_string() => InstanceTypeDescription {
                hardware: Some(HardwareDescription {
                    free_memory: 4 << 30,
                    num_cores: 4,
                }),
                max_instances: 4,
            },
        }))
    }

    fn compiler(statistics: StaticStatistics) -> PactCompiler {
        PactCompiler::new(
            CompilerConfig::default(),
            Arc::new(statistics),
            Arc::new(DefaultCostEstimator),
            four_machine_cluster(),
        )
        .unwrap()
    }

    fn stats(entries: &[(&str, u64)]) -> StaticStatistics {
        let mut statistics = StaticStatistics::new();
        for (name, num_bytes) in entries {
            statistics = statistics.register(
                *name,
                TableStats {
                    cardinality: num_bytes / 100,
                    avg_record_width: 100,
                    num_bytes: *num_bytes,
                },
            );
        }
        statistics
    }

    fn find<'a>(plan: &'a OptimizedPlan, name: &str) -> &'a Candidate {
        plan.nodes()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("no node named {}", name))
    }

    fn input_ship(plan: &OptimizedPlan, candidate: &Candidate, slot: usize) -> ShipStrategy {
        plan.arena().channel(candidate.inputs[slot]).ship
    }

    /// S1: word count.
    #[test]
    fn test_word_count_plan() {
        let mut plan = Plan::new("word count");
        let src = plan.add_source("text");
        let map = plan.add_map("tokenize", src);
        let reduce = plan.add_reduce("sum", map, vec![0]);
        plan.add_sink("out", reduce);

        let compiled = compiler(stats(&[("text", 100_000_000)]))
            .compile(&plan)
            .unwrap();

        assert_eq!(compiled.nodes().count(), 4);
        assert_eq!(compiled.sinks().count(), 1);
        let map = find(&compiled, "tokenize");
        assert_eq!(map.local_strategy, LocalStrategy::None);
        assert_eq!(input_ship(&compiled, map, 0), ShipStrategy::Forward);
        let reduce = find(&compiled, "sum");
        assert_eq!(reduce.local_strategy, LocalStrategy::CombiningSort);
        assert_eq!(input_ship(&compiled, reduce, 0), ShipStrategy::PartitionHash);
        let channel = compiled.arena().channel(reduce.inputs[0]);
        assert_eq!(channel.key_fields, vec![0]);
        let sink = find(&compiled, "out");
        assert_eq!(input_ship(&compiled, sink, 0), ShipStrategy::Forward);
    }

    /// S2: the small side of a join is broadcast and hash-built.
    #[test]
    fn test_broadcast_join_of_small_side() {
        let mut plan = Plan::new("broadcast join");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let join = plan.add_match("join", left, right, vec![0], vec![0]);
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("big", 1_000_000_000), ("tiny", 100_000)]))
            .compile(&plan)
            .unwrap();

        let join = find(&compiled, "join");
        assert_eq!(input_ship(&compiled, join, 0), ShipStrategy::Forward);
        assert_eq!(input_ship(&compiled, join, 1), ShipStrategy::Broadcast);
        assert_eq!(join.local_strategy, LocalStrategy::HashBuildSecond);
        assert_eq!(
            compiled.arena().channel(join.inputs[1]).global,
            GlobalProps::FullReplication
        );
    }

    /// S3: inputs arriving co-partitioned from upstream reduces are joined
    /// with forward channels and a merge.
    #[test]
    fn test_co_partitioned_join() {
        let mut plan = Plan::new("co-partitioned join");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let left_agg = plan.add_reduce("agg-left", left, vec![0]);
        let right_agg = plan.add_reduce("agg-right", right, vec![0]);
        let join = plan.add_match("join", left_agg, right_agg, vec![0], vec![0]);
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("big", 100_000_000), ("tiny", 100_000)]))
            .compile(&plan)
            .unwrap();

        let join = find(&compiled, "join");
        assert_eq!(input_ship(&compiled, join, 0), ShipStrategy::Forward);
        assert_eq!(input_ship(&compiled, join, 1), ShipStrategy::Forward);
        assert_eq!(join.local_strategy, LocalStrategy::Merge);
        // The channels still deliver the upstream hash partitioning.
        assert_eq!(
            compiled.arena().channel(join.inputs[0]).global,
            GlobalProps::HashPartitioned(vec![0])
        );
    }

    /// S4: a local-strategy hint wins regardless of cost.
    #[test]
    fn test_local_strategy_hint_override() {
        let mut plan = Plan::new("hinted join");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let join = plan.add_match("join", left, right, vec![0], vec![0]);
        plan.set_hint(join, HINT_LOCAL_STRATEGY, "LOCAL_STRATEGY_SORT_BOTH_MERGE");
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("big", 1_000_000_000), ("tiny", 100_000)]))
            .compile(&plan)
            .unwrap();

        let join = find(&compiled, "join");
        assert_eq!(join.local_strategy, LocalStrategy::SortBothMerge);
    }

    /// A ship-strategy hint restricts the channel the same way.
    #[test]
    fn test_ship_strategy_hint_override() {
        let mut plan = Plan::new("hinted ship");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let join = plan.add_match("join", left, right, vec![0], vec![0]);
        plan.set_hint(
            join,
            HINT_INPUT_RIGHT_SHIP_STRATEGY,
            "SHIP_REPARTITION_HASH",
        );
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("big", 1_000_000_000), ("tiny", 100_000)]))
            .compile(&plan)
            .unwrap();

        let join = find(&compiled, "join");
        assert_eq!(input_ship(&compiled, join, 1), ShipStrategy::PartitionHash);
    }

    /// S5: multiple sinks are unified under a virtual root; the shared map
    /// is planned once and the joiner never appears in the output.
    #[test]
    fn test_multiple_sinks() {
        let mut plan = Plan::new("two sinks");
        let src = plan.add_source("events");
        let map = plan.add_map("clean", src);
        plan.add_sink("a", map);
        plan.add_sink("b", map);

        let compiled = compiler(stats(&[("events", 1_000_000)]))
            .compile(&plan)
            .unwrap();

        let sink_names: Vec<&str> = compiled.sinks().map(|c| c.name.as_str()).collect();
        assert_eq!(sink_names, vec!["a", "b"]);
        assert!(compiled.nodes().all(|c| c.kind != NodeKind::SinkJoiner));
        assert_eq!(compiled.nodes().filter(|c| c.name == "clean").count(), 1);
        // Both sinks read from the same map candidate.
        let a = find(&compiled, "a");
        let b = find(&compiled, "b");
        assert_eq!(
            compiled.arena().channel(a.inputs[0]).source,
            compiled.arena().channel(b.inputs[0]).source
        );
        let map = find(&compiled, "clean");
        assert_eq!(map.outgoing.len(), 2);
    }

    /// S6: an unresponsive cluster provider fails the compile with a timeout
    /// error within the configured bound.
    #[test]
    fn test_cluster_timeout() {
        let mut config = CompilerConfig::default();
        config.cluster_info_timeout_ms = 150;
        let compiler = PactCompiler::new(
            config,
            Arc::new(StaticStatistics::new()),
            Arc::new(DefaultCostEstimator),
            Arc::new(UnresponsiveCluster),
        )
        .unwrap();

        let mut plan = Plan::new("never compiled");
        let src = plan.add_source("events");
        plan.add_sink("out", src);

        let started = Instant::now();
        let err = compiler.compile(&plan).unwrap_err();
        assert_matches!(err.code, crate::error::ErrorCode::ClusterInfoError(_));
        assert!(format!("{}", err).contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// A node consumed through two paths from a common ancestor appears in
    /// the winning plan with a single physical realization.
    #[test]
    fn test_dag_reconvergence_pins_one_candidate() {
        let mut plan = Plan::new("diamond");
        let src = plan.add_source("events");
        let shared = plan.add_reduce("shared-agg", src, vec![0]);
        let a = plan.add_map("a", shared);
        plan.set_key_fields(a, vec![0]);
        let b = plan.add_map("b", shared);
        plan.set_key_fields(b, vec![0]);
        let join = plan.add_match("join", a, b, vec![0], vec![0]);
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("events", 10_000_000)]))
            .compile(&plan)
            .unwrap();

        assert_eq!(
            compiled.nodes().filter(|c| c.name == "shared-agg").count(),
            1
        );
        let join = find(&compiled, "join");
        let map_a = compiled
            .arena()
            .candidate(compiled.arena().channel(join.inputs[0]).source);
        let map_b = compiled
            .arena()
            .candidate(compiled.arena().channel(join.inputs[1]).source);
        assert_eq!(
            compiled.arena().channel(map_a.inputs[0]).source,
            compiled.arena().channel(map_b.inputs[0]).source
        );
        let shared = find(&compiled, "shared-agg");
        assert_eq!(shared.outgoing.len(), 2);
    }

    /// Compiling the same plan twice yields identical output.
    #[test]
    fn test_determinism() {
        let build = || {
            let mut plan = Plan::new("repeat");
            let left = plan.add_source("big");
            let right = plan.add_source("tiny");
            let join = plan.add_match("join", left, right, vec![0], vec![0]);
            plan.add_sink("out", join);
            compiler(stats(&[("big", 1_000_000_000), ("tiny", 100_000)]))
                .compile(&plan)
                .unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.explain(), second.explain());
        let strategies = |p: &OptimizedPlan| -> Vec<(String, LocalStrategy, u64)> {
            p.nodes()
                .map(|c| (c.name.clone(), c.local_strategy, c.memory_per_subtask))
                .collect()
        };
        assert_eq!(strategies(&first), strategies(&second));
    }

    /// Memory assigned per instance never exceeds the instance budget, and
    /// every memory consumer receives a share.
    #[test]
    fn test_memory_budget_conservation() {
        let mut plan = Plan::new("memory");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let left_agg = plan.add_reduce("agg-left", left, vec![0]);
        let join = plan.add_match("join", left_agg, right, vec![0], vec![0]);
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("big", 100_000_000), ("tiny", 100_000)]))
            .compile(&plan)
            .unwrap();

        let total: u64 = compiled
            .nodes()
            .map(|c| c.memory_per_subtask * c.subtasks_per_instance as u64)
            .sum();
        assert!(total <= compiled.memory_per_instance());
        for candidate in compiled.nodes() {
            if candidate.local_strategy.memory_consumer_weight() > 0 {
                assert!(candidate.memory_per_subtask > 0);
            } else {
                assert_eq!(candidate.memory_per_subtask, 0);
            }
        }
    }

    /// Every channel of the winning plan delivers what its consumer asked
    /// for, and every non-trivial node carries a local strategy.
    #[test]
    fn test_strategy_coverage_and_property_consistency() {
        let mut plan = Plan::new("coverage");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let left_agg = plan.add_reduce("agg-left", left, vec![0]);
        let join = plan.add_match("join", left_agg, right, vec![0], vec![0]);
        plan.add_sink("out", join);

        let compiled = compiler(stats(&[("big", 100_000_000), ("tiny", 100_000)]))
            .compile(&plan)
            .unwrap();

        use crate::optimizer::property::RequestedGlobalProps;
        for candidate in compiled.nodes() {
            match candidate.kind {
                NodeKind::Reduce => {
                    assert_ne!(candidate.local_strategy, LocalStrategy::None);
                    let channel = compiled.arena().channel(candidate.inputs[0]);
                    assert!(
                        channel
                            .global
                            .satisfies(&RequestedGlobalProps::HashPartitioned(vec![0]))
                            || channel
                                .global
                                .satisfies(&RequestedGlobalProps::RangePartitioned(vec![0]))
                    );
                }
                NodeKind::Match | NodeKind::CoGroup | NodeKind::Cross => {
                    assert_ne!(candidate.local_strategy, LocalStrategy::None);
                }
                _ => assert_eq!(candidate.local_strategy, LocalStrategy::None),
            }
        }
    }

    /// A cartesian product broadcasts one side and nests the loops around
    /// the replicated input.
    #[test]
    fn test_cross_broadcasts_one_side() {
        let mut plan = Plan::new("cross");
        let left = plan.add_source("big");
        let right = plan.add_source("tiny");
        let cross = plan.add_cross("product", left, right);
        plan.add_sink("out", cross);

        let compiled = compiler(stats(&[("big", 10_000_000), ("tiny", 10_000)]))
            .compile(&plan)
            .unwrap();

        let cross = find(&compiled, "product");
        assert_eq!(input_ship(&compiled, cross, 0), ShipStrategy::Forward);
        assert_eq!(input_ship(&compiled, cross, 1), ShipStrategy::Broadcast);
        assert_eq!(
            cross.local_strategy,
            LocalStrategy::NestedLoopBlockedOuterFirst
        );
    }

    #[test]
    fn test_post_pass_is_invoked() {
        struct Probe(AtomicBool);
        impl PostPass for Probe {
            fn apply(&self, _plan: &mut OptimizedPlan) {
                self.0.store(true, AtomicOrdering::SeqCst);
            }
        }

        let mut plan = Plan::new("probe");
        let src = plan.add_source("events");
        plan.add_sink("out", src);

        let probe = Probe(AtomicBool::new(false));
        compiler(stats(&[("events", 1_000)]))
            .compile_with_post_pass(&plan, &probe)
            .unwrap();
        assert!(probe.0.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn test_compile_with_instance_skips_cluster_lookup() {
        let compiler = PactCompiler::new(
            CompilerConfig::default(),
            Arc::new(StaticStatistics::new()),
            Arc::new(DefaultCostEstimator),
            Arc::new(UnresponsiveCluster),
        )
        .unwrap();

        let mut plan = Plan::new("direct instance");
        let src = plan.add_source("events");
        plan.add_sink("out", src);

        let compiled = compiler
            .compile_with_instance(
                &plan,
                "m2.xlarge",
                InstanceTypeDescription {
                    hardware: Some(HardwareDescription {
                        free_memory: 8 << 30,
                        num_cores: 8,
                    }),
                    max_instances: 2,
                },
                &DefaultPostPass,
            )
            .unwrap();
        assert_eq!(compiled.instance_type(), "m2.xlarge");
        for candidate in compiled.nodes() {
            assert_eq!(candidate.parallelism, 2);
        }
    }
}
