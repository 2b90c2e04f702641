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

//! Compiler hints attached to logical contracts as string key/value pairs.
//! The string keys are the public boundary; graph creation parses them once
//! into [`ContractHints`] and the enumerator only sees the typed form.
//! Unknown values are ignored with a warning.

use std::collections::HashMap;

use crate::optimizer::strategy::{LocalStrategy, ShipStrategy};

pub const HINT_INPUT_SHIP_STRATEGY: &str = "INPUT_SHIP_STRATEGY";
pub const HINT_INPUT_LEFT_SHIP_STRATEGY: &str = "INPUT_LEFT_SHIP_STRATEGY";
pub const HINT_INPUT_RIGHT_SHIP_STRATEGY: &str = "INPUT_RIGHT_SHIP_STRATEGY";
pub const HINT_LOCAL_STRATEGY: &str = "LOCAL_STRATEGY";

/// Typed form of the hint bag of one contract. A `Some` entry restricts the
/// admissible strategy set of the corresponding channel or node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContractHints {
    pub ship_strategy: Option<ShipStrategy>,
    pub left_ship_strategy: Option<ShipStrategy>,
    pub right_ship_strategy: Option<ShipStrategy>,
    pub local_strategy: Option<LocalStrategy>,
}

impl ContractHints {
    pub fn parse(hints: &HashMap<String, String>) -> Self {
        let mut parsed = Self::default();
        for (key, value) in hints {
            match key.as_str() {
                HINT_INPUT_SHIP_STRATEGY => parsed.ship_strategy = parse_ship(key, value),
                HINT_INPUT_LEFT_SHIP_STRATEGY => parsed.left_ship_strategy = parse_ship(key, value),
                HINT_INPUT_RIGHT_SHIP_STRATEGY => {
                    parsed.right_ship_strategy = parse_ship(key, value)
                }
                HINT_LOCAL_STRATEGY => parsed.local_strategy = parse_local(key, value),
                _ => log::warn!("unknown compiler hint '{}', ignoring", key),
            }
        }
        parsed
    }

    /// Restriction for the ship strategy of input `index` of a node with
    /// `num_inputs` inputs.
    pub fn ship_restriction(&self, index: usize, num_inputs: usize) -> Option<ShipStrategy> {
        if num_inputs <= 1 {
            self.ship_strategy
        } else if index == 0 {
            self.left_ship_strategy.or(self.ship_strategy)
        } else {
            self.right_ship_strategy.or(self.ship_strategy)
        }
    }
}

fn parse_ship(key: &str, value: &str) -> Option<ShipStrategy> {
    match value {
        "SHIP_FORWARD" => Some(ShipStrategy::Forward),
        "SHIP_REPARTITION_HASH" => Some(ShipStrategy::PartitionHash),
        "SHIP_REPARTITION_RANGE" => Some(ShipStrategy::PartitionRange),
        "SHIP_BROADCAST" => Some(ShipStrategy::Broadcast),
        _ => {
            log::warn!("invalid value '{}' for hint '{}', ignoring", value, key);
            None
        }
    }
}

fn parse_local(key: &str, value: &str) -> Option<LocalStrategy> {
    match value {
        "LOCAL_STRATEGY_SORT" => Some(LocalStrategy::Sort),
        "LOCAL_STRATEGY_COMBINING_SORT" => Some(LocalStrategy::CombiningSort),
        "LOCAL_STRATEGY_SORT_BOTH_MERGE" => Some(LocalStrategy::SortBothMerge),
        "LOCAL_STRATEGY_SORT_FIRST_MERGE" => Some(LocalStrategy::SortFirstMerge),
        "LOCAL_STRATEGY_SORT_SECOND_MERGE" => Some(LocalStrategy::SortSecondMerge),
        "LOCAL_STRATEGY_MERGE" => Some(LocalStrategy::Merge),
        "LOCAL_STRATEGY_HASH_BUILD_FIRST" => Some(LocalStrategy::HashBuildFirst),
        "LOCAL_STRATEGY_HASH_BUILD_SECOND" => Some(LocalStrategy::HashBuildSecond),
        "LOCAL_STRATEGY_NESTEDLOOP_STREAMED_OUTER_FIRST" => {
            Some(LocalStrategy::NestedLoopStreamedOuterFirst)
        }
        "LOCAL_STRATEGY_NESTEDLOOP_STREAMED_OUTER_SECOND" => {
            Some(LocalStrategy::NestedLoopStreamedOuterSecond)
        }
        "LOCAL_STRATEGY_NESTEDLOOP_BLOCKED_OUTER_FIRST" => {
            Some(LocalStrategy::NestedLoopBlockedOuterFirst)
        }
        "LOCAL_STRATEGY_NESTEDLOOP_BLOCKED_OUTER_SECOND" => {
            Some(LocalStrategy::NestedLoopBlockedOuterSecond)
        }
        _ => {
            log::warn!("invalid value '{}' for hint '{}', ignoring", value, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;

    use super::*;

    #[test]
    fn test_parse_ship_and_local() {
        let hints = hashmap! {
            HINT_INPUT_LEFT_SHIP_STRATEGY.to_string() => "SHIP_BROADCAST".to_string(),
            HINT_LOCAL_STRATEGY.to_string() => "LOCAL_STRATEGY_SORT_BOTH_MERGE".to_string(),
        };
        let parsed = ContractHints::parse(&hints);
        assert_eq!(parsed.left_ship_strategy, Some(ShipStrategy::Broadcast));
        assert_eq!(parsed.local_strategy, Some(LocalStrategy::SortBothMerge));
        assert_eq!(parsed.ship_strategy, None);
        assert_eq!(
            parsed.ship_restriction(0, 2),
            Some(ShipStrategy::Broadcast)
        );
        assert_eq!(parsed.ship_restriction(1, 2), None);
    }

    #[test]
    fn test_invalid_value_ignored() {
        let hints = hashmap! {
            HINT_INPUT_SHIP_STRATEGY.to_string() => "SHIP_TELEPORT".to_string(),
            "SOME_FUTURE_HINT".to_string() => "1".to_string(),
        };
        let parsed = ContractHints::parse(&hints);
        assert_eq!(parsed, ContractHints::default());
    }
}
