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

//! Top-down propagation of interesting properties: the physical properties a
//! node's downstream consumers would benefit from. They steer the pruning in
//! the enumeration phase — a more expensive candidate survives only if it
//! delivers an interesting property the cheaper ones do not.

use crate::cost::{CostEstimator, CostingContext, CostingInput};
use crate::optimizer::graph::{NodeHandle, NodeKind, OptimizerGraph};
use crate::optimizer::property::{RequestedGlobalProps, RequestedLocalProps, RequestedProps};
use crate::optimizer::strategy::{LocalStrategy, ShipStrategy};

/// The set of properties downstream consumers of a node care about, each with
/// the largest cost establishing it early could save.
#[derive(Clone, Debug, Default)]
pub struct InterestingProperties {
    pub global: Vec<(RequestedGlobalProps, f64)>,
    pub local: Vec<(RequestedLocalProps, f64)>,
}

impl InterestingProperties {
    pub fn len(&self) -> usize {
        self.global.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.local.is_empty()
    }

    fn add_global(&mut self, prop: RequestedGlobalProps, savings: f64) {
        if savings > 0.0 && !self.global.iter().any(|(p, _)| *p == prop) {
            self.global.push((prop, savings));
        }
    }

    fn add_local(&mut self, prop: RequestedLocalProps, savings: f64) {
        if savings > 0.0 && !self.local.iter().any(|(p, _)| *p == prop) {
            self.local.push((prop, savings));
        }
    }
}

/// Walk the graph from the root towards the sources. A node is processed only
/// once every one of its output edges has delivered its requests — premature
/// descent through a reconverging DAG would propagate incomplete sets.
pub fn propagate_interesting_properties(
    graph: &mut OptimizerGraph,
    estimator: &dyn CostEstimator,
) {
    let n = graph.nodes.len();
    let mut pending: Vec<usize> = graph.nodes.iter().map(|node| node.outputs.len()).collect();
    let mut arrived: Vec<Vec<RequestedProps>> = vec![vec![]; n];

    let mut ready: Vec<NodeHandle> = (0..n)
        .filter(|&i| pending[i] == 0)
        .map(NodeHandle)
        .collect();

    while let Some(handle) = ready.pop() {
        record_interesting(graph, handle, &arrived[handle.0], estimator);

        let node = graph.node(handle);
        let inputs = node.inputs.clone();
        let per_input = requests_on_inputs(graph, handle, &arrived[handle.0]);
        for (slot, input) in inputs.into_iter().enumerate() {
            arrived[input.0].extend(per_input[slot].iter().cloned());
            pending[input.0] -= 1;
            if pending[input.0] == 0 {
                ready.push(input);
            }
        }
    }
}

fn record_interesting(
    graph: &mut OptimizerGraph,
    handle: NodeHandle,
    arrived: &[RequestedProps],
    estimator: &dyn CostEstimator,
) {
    let node = &graph.nodes[handle.0];
    let estimates = node.estimates;
    let parallelism = node.parallelism;
    let kind = node.kind;

    let mut interesting = InterestingProperties::default();
    for request in arrived {
        if request.global != RequestedGlobalProps::Any {
            let ship = match request.global {
                RequestedGlobalProps::RangePartitioned(_) => ShipStrategy::PartitionRange,
                RequestedGlobalProps::FullReplication => ShipStrategy::Broadcast,
                _ => ShipStrategy::PartitionHash,
            };
            let savings = estimator
                .cost(&CostingContext {
                    kind,
                    local: LocalStrategy::None,
                    parallelism,
                    inputs: vec![CostingInput {
                        ship,
                        estimates: estimates.as_ref(),
                    }],
                })
                .scalar();
            interesting.add_global(request.global.clone(), savings);
        }
        if request.local != RequestedLocalProps::Any {
            let savings = estimator
                .cost(&CostingContext {
                    kind: NodeKind::Match,
                    local: LocalStrategy::Sort,
                    parallelism,
                    inputs: vec![CostingInput {
                        ship: ShipStrategy::Forward,
                        estimates: estimates.as_ref(),
                    }],
                })
                .scalar();
            interesting.add_local(request.local.clone(), savings);
        }
    }
    graph.nodes[handle.0].interesting = interesting;
}

/// The requests a node places on each of its inputs: its own requirements
/// derived from its kind, plus whatever arrived from downstream and survives
/// the node.
fn requests_on_inputs(
    graph: &OptimizerGraph,
    handle: NodeHandle,
    arrived: &[RequestedProps],
) -> Vec<Vec<RequestedProps>> {
    let node = graph.node(handle);
    match node.kind {
        NodeKind::Source => vec![],
        NodeKind::Sink => vec![arrived.to_vec()],
        NodeKind::SinkJoiner => vec![vec![], vec![]],
        NodeKind::Map => {
            // Requests travel through a Map only on its declared preserved
            // fields.
            let preserved = &node.keys;
            let survives = |fields: &[usize]| fields.iter().all(|f| preserved.contains(f));
            let passed = arrived
                .iter()
                .filter(|request| {
                    let global_ok = match &request.global {
                        RequestedGlobalProps::HashPartitioned(f)
                        | RequestedGlobalProps::RangePartitioned(f) => survives(f),
                        _ => true,
                    };
                    let local_ok = match &request.local {
                        RequestedLocalProps::Grouped(f) => survives(f),
                        RequestedLocalProps::Ordered(o) => survives(&o.fields()),
                        RequestedLocalProps::Any => true,
                    };
                    global_ok && local_ok
                })
                .cloned()
                .collect();
            vec![passed]
        }
        NodeKind::Reduce => vec![keyed_requests(&node.keys)],
        NodeKind::Match | NodeKind::CoGroup => vec![
            keyed_requests(&node.keys),
            keyed_requests(&node.second_keys),
        ],
        NodeKind::Cross => {
            // Either input may be replicated; both alternatives are tracked.
            let replicated = vec![RequestedProps {
                global: RequestedGlobalProps::FullReplication,
                local: RequestedLocalProps::Any,
            }];
            vec![replicated.clone(), replicated]
        }
    }
}

fn keyed_requests(keys: &[usize]) -> Vec<RequestedProps> {
    vec![
        RequestedProps {
            global: RequestedGlobalProps::HashPartitioned(keys.to_vec()),
            local: RequestedLocalProps::Grouped(keys.to_vec()),
        },
        RequestedProps {
            global: RequestedGlobalProps::RangePartitioned(keys.to_vec()),
            local: RequestedLocalProps::Grouped(keys.to_vec()),
        },
    ]
}
