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

use std::ops::Add;

use crate::optimizer::graph::{NodeKind, SizeEstimates};
use crate::optimizer::strategy::{LocalStrategy, ShipStrategy};

/// Cost vector of a candidate, reduced to a scalar through a fixed weighting
/// for comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Cost {
    pub network: f64,
    pub disk: f64,
    pub cpu: f64,
}

const NETWORK_WEIGHT: f64 = 1.0;
const DISK_WEIGHT: f64 = 0.5;
const CPU_WEIGHT: f64 = 0.1;

impl Cost {
    pub const ZERO: Cost = Cost {
        network: 0.0,
        disk: 0.0,
        cpu: 0.0,
    };

    pub fn scalar(&self) -> f64 {
        self.network * NETWORK_WEIGHT + self.disk * DISK_WEIGHT + self.cpu * CPU_WEIGHT
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost {
            network: self.network + rhs.network,
            disk: self.disk + rhs.disk,
            cpu: self.cpu + rhs.cpu,
        }
    }
}

/// One input channel of the candidate under costing.
pub struct CostingInput<'a> {
    pub ship: ShipStrategy,
    /// Size estimates of the producer, `None` when unknown.
    pub estimates: Option<&'a SizeEstimates>,
}

/// The candidate plan node handed to the cost estimator: the node kind, the
/// chosen local strategy and the input channels with their ship strategies.
pub struct CostingContext<'a> {
    pub kind: NodeKind,
    pub local: LocalStrategy,
    pub parallelism: usize,
    pub inputs: Vec<CostingInput<'a>>,
}

/// Pluggable cost model. Returns the cost of running the candidate itself,
/// excluding its inputs; the enumerator accumulates along the plan.
pub trait CostEstimator: Send + Sync {
    fn cost(&self, ctx: &CostingContext<'_>) -> Cost;
}

/// Size-based deterministic cost model. Bytes shipped drive the network
/// component, sort and materialization drive disk, per-record work drives
/// cpu. Unknown sizes are penalized so that broadcasting or hash-building an
/// input of unknown size never wins against a sort-based plan.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCostEstimator;

/// Stand-in volume for an input of unknown size.
const UNKNOWN_BYTES: f64 = 1.0e9;
/// Penalty volume when a strategy gambles on an unknown input fitting in
/// memory (broadcast, hash build).
const UNKNOWN_GAMBLE_BYTES: f64 = 4.0e9;
/// Relative overhead of range partitioning over hash partitioning, for the
/// sampling pass that establishes the range boundaries.
const RANGE_PARTITION_FACTOR: f64 = 1.1;
/// Share of the input a combiner is assumed to remove ahead of shipping.
const COMBINER_REDUCTION: f64 = 0.5;

fn bytes_or(est: Option<&SizeEstimates>, fallback: f64) -> f64 {
    est.map(|e| e.num_bytes as f64).unwrap_or(fallback)
}

impl CostEstimator for DefaultCostEstimator {
    fn cost(&self, ctx: &CostingContext<'_>) -> Cost {
        let mut cost = Cost::ZERO;

        for input in &ctx.inputs {
            match input.ship {
                ShipStrategy::Forward => {}
                ShipStrategy::PartitionHash => {
                    cost.network += bytes_or(input.estimates, UNKNOWN_BYTES);
                }
                ShipStrategy::PartitionRange => {
                    cost.network +=
                        bytes_or(input.estimates, UNKNOWN_BYTES) * RANGE_PARTITION_FACTOR;
                }
                ShipStrategy::Broadcast => {
                    cost.network += bytes_or(input.estimates, UNKNOWN_GAMBLE_BYTES)
                        * ctx.parallelism as f64;
                }
            }
        }

        // The combiner shrinks the data before it is shipped.
        if ctx.kind == NodeKind::Reduce && ctx.local == LocalStrategy::CombiningSort {
            cost.network *= COMBINER_REDUCTION;
        }

        let sort = |est: Option<&SizeEstimates>| {
            let bytes = bytes_or(est, UNKNOWN_BYTES);
            Cost {
                network: 0.0,
                disk: 2.0 * bytes,
                cpu: bytes,
            }
        };
        let hash_build = |build: Option<&SizeEstimates>, probe: Option<&SizeEstimates>| Cost {
            network: 0.0,
            disk: 0.0,
            cpu: 2.0 * bytes_or(build, UNKNOWN_GAMBLE_BYTES) + 0.5 * bytes_or(probe, UNKNOWN_BYTES),
        };
        let first = ctx.inputs.first().and_then(|i| i.estimates);
        let second = ctx.inputs.get(1).and_then(|i| i.estimates);

        cost = cost
            + match ctx.local {
                LocalStrategy::None | LocalStrategy::Merge => Cost::ZERO,
                LocalStrategy::Sort | LocalStrategy::CombiningSort => sort(first),
                LocalStrategy::SortBothMerge => sort(first) + sort(second),
                LocalStrategy::SortFirstMerge => sort(first),
                LocalStrategy::SortSecondMerge => sort(second),
                LocalStrategy::HashBuildFirst => hash_build(first, second),
                LocalStrategy::HashBuildSecond => hash_build(second, first),
                LocalStrategy::NestedLoopStreamedOuterFirst => {
                    nested_loop(first, second, 2.0)
                }
                LocalStrategy::NestedLoopStreamedOuterSecond => {
                    nested_loop(second, first, 2.0)
                }
                LocalStrategy::NestedLoopBlockedOuterFirst => nested_loop(first, second, 1.0),
                LocalStrategy::NestedLoopBlockedOuterSecond => nested_loop(second, first, 1.0),
            };

        cost
    }
}

fn nested_loop(
    outer: Option<&SizeEstimates>,
    inner: Option<&SizeEstimates>,
    inner_passes: f64,
) -> Cost {
    let outer_bytes = bytes_or(outer, UNKNOWN_BYTES);
    let inner_bytes = bytes_or(inner, UNKNOWN_BYTES);
    Cost {
        network: 0.0,
        disk: inner_bytes * inner_passes,
        cpu: (outer_bytes / 1.0e3) * (inner_bytes / 1.0e3),
    }
}
