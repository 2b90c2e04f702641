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

use std::collections::HashSet;
use std::fmt;

use super::partitioning::GlobalProps;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

/// One field of a sort order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldOrder {
    pub index: usize,
    pub direct: Direction,
}

impl FieldOrder {
    pub fn ascending(index: usize) -> Self {
        Self {
            index,
            direct: Direction::Asc,
        }
    }
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dir = match self.direct {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        };
        write!(f, "${} {}", self.index, dir)
    }
}

/// A sort order over record fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Ordering {
    pub field_order: Vec<FieldOrder>,
}

impl Ordering {
    pub fn ascending(fields: &[usize]) -> Self {
        Self {
            field_order: fields.iter().map(|i| FieldOrder::ascending(*i)).collect(),
        }
    }

    pub fn fields(&self) -> Vec<usize> {
        self.field_order.iter().map(|f| f.index).collect()
    }

    /// Whether `prefix` is a prefix of this ordering, fields and directions.
    pub fn starts_with(&self, prefix: &Ordering) -> bool {
        self.field_order.len() >= prefix.field_order.len()
            && self.field_order[..prefix.field_order.len()] == prefix.field_order[..]
    }

    /// Whether the leading fields of this ordering are exactly the given set,
    /// in any sequence. Such an ordering groups equal keys contiguously.
    pub fn prefix_covers(&self, fields: &[usize]) -> bool {
        if self.field_order.len() < fields.len() {
            return false;
        }
        let prefix: HashSet<usize> = self.field_order[..fields.len()]
            .iter()
            .map(|f| f.index)
            .collect();
        fields.len() == prefix.len() && fields.iter().all(|f| prefix.contains(f))
    }
}

/// What a channel actually provides within each partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LocalProps {
    /// No particular per-partition arrangement.
    Any,
    /// Records with equal values on the fields are contiguous.
    Grouped(Vec<usize>),
    /// Records are sorted. Ordering implies grouping on every prefix.
    Ordered(Ordering),
}

/// A per-partition arrangement constraint placed on an input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestedLocalProps {
    Any,
    Grouped(Vec<usize>),
    Ordered(Ordering),
}

impl LocalProps {
    /// `delivered.satisfies(requested)`. A grouping request is also met by a
    /// range-partitioned channel whose partition fields cover the group set,
    /// which is why the delivered global properties participate.
    pub fn satisfies(&self, requested: &RequestedLocalProps, global: &GlobalProps) -> bool {
        match requested {
            RequestedLocalProps::Any => true,
            RequestedLocalProps::Grouped(fields) => {
                let locally = match self {
                    LocalProps::Any => false,
                    LocalProps::Grouped(have) => {
                        have.len() == fields.len()
                            && fields.iter().all(|f| have.contains(f))
                    }
                    LocalProps::Ordered(ordering) => ordering.prefix_covers(fields),
                };
                locally
                    || matches!(global, GlobalProps::RangePartitioned(part, _)
                        if part.len() >= fields.len()
                            && part[..fields.len()].iter().all(|f| fields.contains(f)))
            }
            RequestedLocalProps::Ordered(ordering) => match self {
                LocalProps::Ordered(have) => have.starts_with(ordering),
                _ => false,
            },
        }
    }
}
