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

use super::ordering::Ordering;

/// How tuples are distributed across parallel subtasks — the fact side.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GlobalProps {
    /// No particular distribution.
    Random,
    /// Equal key values live in the same partition.
    HashPartitioned(Vec<usize>),
    /// Partitions hold contiguous key ranges under the given sort order.
    RangePartitioned(Vec<usize>, Ordering),
    /// Every partition holds the full data set.
    FullReplication,
    /// Exactly one subtask holds all data.
    Singleton,
}

/// A distribution constraint placed on an input — the request side.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestedGlobalProps {
    Any,
    HashPartitioned(Vec<usize>),
    RangePartitioned(Vec<usize>),
    FullReplication,
    Singleton,
}

// "A -> B" represents A satisfies B
//
//                    +---+
//                    |Any|
//                    +---+
//                      ^
//        +-------------+--------------+----------------+
//        |             |              |                |
//  +-----+-----+  +----+----+  +------+------+  +------+--------+
//  |  hash(F)  |  |range(F) |  |  singleton  |  |full replication|
//  +-----------+  +---------+  +-------------+  +----------------+
//        ^             ^
//        +------+------+
//               |
//          +----+----+
//          |singleton|
//          +---------+
//
// Full replication satisfies no partitioning request other than itself and
// Any. A singleton trivially co-locates every key, so it satisfies both
// partitioning requests.
impl GlobalProps {
    pub fn satisfies(&self, requested: &RequestedGlobalProps) -> bool {
        match requested {
            RequestedGlobalProps::Any => true,
            RequestedGlobalProps::HashPartitioned(fields) => match self {
                GlobalProps::HashPartitioned(have) => {
                    have.len() == fields.len() && fields.iter().all(|f| have.contains(f))
                }
                GlobalProps::Singleton => true,
                _ => false,
            },
            RequestedGlobalProps::RangePartitioned(fields) => match self {
                GlobalProps::RangePartitioned(have, _) => have == fields,
                GlobalProps::Singleton => true,
                _ => false,
            },
            RequestedGlobalProps::FullReplication => {
                matches!(self, GlobalProps::FullReplication)
            }
            RequestedGlobalProps::Singleton => matches!(self, GlobalProps::Singleton),
        }
    }

    /// Whether the distribution still holds when only `preserved` fields
    /// survive the operator.
    pub fn survives(&self, preserved: &[usize]) -> bool {
        match self {
            GlobalProps::Random | GlobalProps::FullReplication | GlobalProps::Singleton => true,
            GlobalProps::HashPartitioned(fields) => fields.iter().all(|f| preserved.contains(f)),
            GlobalProps::RangePartitioned(fields, _) => {
                fields.iter().all(|f| preserved.contains(f))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_satisfies_exact_set() {
        let delivered = GlobalProps::HashPartitioned(vec![0, 2]);
        assert!(delivered.satisfies(&RequestedGlobalProps::HashPartitioned(vec![2, 0])));
        assert!(delivered.satisfies(&RequestedGlobalProps::Any));
        assert!(!delivered.satisfies(&RequestedGlobalProps::HashPartitioned(vec![0])));
        assert!(!delivered.satisfies(&RequestedGlobalProps::HashPartitioned(vec![0, 1, 2])));
        assert!(!delivered.satisfies(&RequestedGlobalProps::FullReplication));
    }

    #[test]
    fn test_full_replication_satisfies_only_itself_and_any() {
        let delivered = GlobalProps::FullReplication;
        assert!(delivered.satisfies(&RequestedGlobalProps::Any));
        assert!(delivered.satisfies(&RequestedGlobalProps::FullReplication));
        assert!(!delivered.satisfies(&RequestedGlobalProps::HashPartitioned(vec![0])));
        assert!(!delivered.satisfies(&RequestedGlobalProps::RangePartitioned(vec![0])));
        assert!(!delivered.satisfies(&RequestedGlobalProps::Singleton));
    }

    #[test]
    fn test_singleton_colocates_all_keys() {
        let delivered = GlobalProps::Singleton;
        assert!(delivered.satisfies(&RequestedGlobalProps::HashPartitioned(vec![0, 1])));
        assert!(delivered.satisfies(&RequestedGlobalProps::RangePartitioned(vec![3])));
        assert!(delivered.satisfies(&RequestedGlobalProps::Singleton));
        assert!(!delivered.satisfies(&RequestedGlobalProps::FullReplication));
    }

    #[test]
    fn test_random_satisfies_only_any() {
        let delivered = GlobalProps::Random;
        assert!(delivered.satisfies(&RequestedGlobalProps::Any));
        assert!(!delivered.satisfies(&RequestedGlobalProps::HashPartitioned(vec![0])));
        assert!(!delivered.satisfies(&RequestedGlobalProps::Singleton));
    }

    #[test]
    fn test_survives_field_projection() {
        let delivered = GlobalProps::HashPartitioned(vec![0, 2]);
        assert!(delivered.survives(&[0, 1, 2]));
        assert!(!delivered.survives(&[0, 1]));
        assert!(GlobalProps::Random.survives(&[]));
    }
}
