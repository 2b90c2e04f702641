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

use std::collections::HashMap;

/// Base statistics of one data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableStats {
    pub cardinality: u64,
    pub avg_record_width: u64,
    pub num_bytes: u64,
}

/// Provider of source statistics. `None` means unknown, in which case the
/// compiler works without size estimates and the cost model conservatively
/// prefers sort-based strategies.
pub trait DataStatistics: Send + Sync {
    fn table_stats(&self, source_id: &str) -> Option<TableStats>;
}

/// A provider that knows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStatistics;

impl DataStatistics for NoStatistics {
    fn table_stats(&self, _source_id: &str) -> Option<TableStats> {
        None
    }
}

/// In-memory statistics registry, keyed by source id.
#[derive(Clone, Debug, Default)]
pub struct StaticStatistics {
    stats: HashMap<String, TableStats>,
}

impl StaticStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, source_id: impl Into<String>, stats: TableStats) -> Self {
        self.stats.insert(source_id.into(), stats);
        self
    }
}

impl DataStatistics for StaticStatistics {
    fn table_stats(&self, source_id: &str) -> Option<TableStats> {
        self.stats.get(source_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_statistics() {
        let stats = StaticStatistics::new().register(
            "orders",
            TableStats {
                cardinality: 1_000,
                avg_record_width: 64,
                num_bytes: 64_000,
            },
        );
        assert_eq!(stats.table_stats("orders").unwrap().num_bytes, 64_000);
        assert_eq!(stats.table_stats("lineitem"), None);
        assert_eq!(NoStatistics.table_stats("orders"), None);
    }
}
