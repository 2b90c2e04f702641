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

use crate::optimizer::graph::NodeKind;

/// How records travel between producer and consumer subtasks. The enum order
/// is the deterministic tie-break order of the enumerator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShipStrategy {
    Forward,
    PartitionHash,
    PartitionRange,
    Broadcast,
}

/// How a consumer processes data within one partition. `None` is the absence
/// of a local strategy (Map, Source, Sink). The enum order is the
/// deterministic tie-break order of the enumerator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalStrategy {
    None,
    Sort,
    CombiningSort,
    SortBothMerge,
    SortFirstMerge,
    SortSecondMerge,
    Merge,
    HashBuildFirst,
    HashBuildSecond,
    NestedLoopStreamedOuterFirst,
    NestedLoopStreamedOuterSecond,
    NestedLoopBlockedOuterFirst,
    NestedLoopBlockedOuterSecond,
}

impl LocalStrategy {
    /// Memory consumption weight of the strategy: one unit per sort buffer,
    /// hash table or materialized nested-loop side.
    pub fn memory_consumer_weight(&self) -> u32 {
        match self {
            LocalStrategy::None | LocalStrategy::Merge => 0,
            LocalStrategy::Sort
            | LocalStrategy::CombiningSort
            | LocalStrategy::SortFirstMerge
            | LocalStrategy::SortSecondMerge
            | LocalStrategy::HashBuildFirst
            | LocalStrategy::HashBuildSecond
            | LocalStrategy::NestedLoopStreamedOuterFirst
            | LocalStrategy::NestedLoopStreamedOuterSecond
            | LocalStrategy::NestedLoopBlockedOuterFirst
            | LocalStrategy::NestedLoopBlockedOuterSecond => 1,
            LocalStrategy::SortBothMerge => 2,
        }
    }
}

/// Shipping strategies admissible per input of a node kind, before hint
/// filtering. Binary kinds pair the strategies across both inputs, see
/// [`ship_strategy_pairs`].
pub fn unary_ship_strategies(kind: NodeKind) -> &'static [ShipStrategy] {
    match kind {
        NodeKind::Map | NodeKind::Sink | NodeKind::SinkJoiner => &[ShipStrategy::Forward],
        NodeKind::Reduce => &[
            ShipStrategy::Forward,
            ShipStrategy::PartitionHash,
            ShipStrategy::PartitionRange,
        ],
        NodeKind::Source | NodeKind::Match | NodeKind::CoGroup | NodeKind::Cross => {
            unreachable!("not a unary node kind: {:?}", kind)
        }
    }
}

/// Shipping strategy pairs admissible for a binary node kind. The
/// `Forward`/`Forward` pairs additionally require already co-partitioned
/// inputs, which the enumerator checks against the delivered properties.
pub fn ship_strategy_pairs(kind: NodeKind) -> &'static [(ShipStrategy, ShipStrategy)] {
    match kind {
        NodeKind::Match => &[
            (ShipStrategy::Forward, ShipStrategy::Forward),
            (ShipStrategy::PartitionHash, ShipStrategy::PartitionHash),
            (ShipStrategy::PartitionRange, ShipStrategy::PartitionRange),
            (ShipStrategy::Broadcast, ShipStrategy::Forward),
            (ShipStrategy::Forward, ShipStrategy::Broadcast),
        ],
        NodeKind::CoGroup => &[
            (ShipStrategy::Forward, ShipStrategy::Forward),
            (ShipStrategy::PartitionHash, ShipStrategy::PartitionHash),
            (ShipStrategy::PartitionRange, ShipStrategy::PartitionRange),
        ],
        NodeKind::Cross => &[
            (ShipStrategy::Broadcast, ShipStrategy::Forward),
            (ShipStrategy::Forward, ShipStrategy::Broadcast),
        ],
        NodeKind::SinkJoiner => &[(ShipStrategy::Forward, ShipStrategy::Forward)],
        _ => unreachable!("not a binary node kind: {:?}", kind),
    }
}

/// Local strategies admissible for a node kind, before hint filtering.
pub fn local_strategies(kind: NodeKind) -> &'static [LocalStrategy] {
    match kind {
        NodeKind::Source | NodeKind::Map | NodeKind::Sink | NodeKind::SinkJoiner => {
            &[LocalStrategy::None]
        }
        NodeKind::Reduce => &[LocalStrategy::Sort, LocalStrategy::CombiningSort],
        NodeKind::Match => &[
            LocalStrategy::SortBothMerge,
            LocalStrategy::SortFirstMerge,
            LocalStrategy::SortSecondMerge,
            LocalStrategy::Merge,
            LocalStrategy::HashBuildFirst,
            LocalStrategy::HashBuildSecond,
        ],
        NodeKind::CoGroup => &[
            LocalStrategy::SortBothMerge,
            LocalStrategy::SortFirstMerge,
            LocalStrategy::SortSecondMerge,
            LocalStrategy::Merge,
        ],
        NodeKind::Cross => &[
            LocalStrategy::NestedLoopStreamedOuterFirst,
            LocalStrategy::NestedLoopStreamedOuterSecond,
            LocalStrategy::NestedLoopBlockedOuterFirst,
            LocalStrategy::NestedLoopBlockedOuterSecond,
        ],
    }
}
