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

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode::ConfigurationError;
use crate::error::{CompileError, Result};

/// Global compiler configuration. All fields are read-only after the compiler
/// is constructed; per-plan values (declared parallelism, per-job machine
/// limits) override them where noted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Global cap on the number of machines a job may use. `0` means no cap.
    #[serde(default = "default::max_machines")]
    pub max_machines: usize,

    /// Degree of parallelism used when the plan does not declare one.
    /// `0` means derive from the cluster size.
    #[serde(default = "default::default_parallelism")]
    pub default_parallelism: usize,

    /// Cap on the number of subtasks per machine. `-1` means unlimited;
    /// `0` and values below `-1` are rejected and replaced by the default.
    #[serde(default = "default::max_intra_node_parallelism")]
    pub max_intra_node_parallelism: i32,

    /// RPC endpoint of the job manager, used by the cluster-info fetch.
    #[serde(default = "default::job_manager_address")]
    pub job_manager_address: String,

    #[serde(default = "default::job_manager_port")]
    pub job_manager_port: u16,

    /// Memory in MiB assigned to auxiliary tasks, and the fallback assignment
    /// when the instance memory is unknown.
    #[serde(default = "default::temp_task_memory_mib")]
    pub temp_task_memory_mib: u64,

    /// Share of the reported free memory the compiler may budget.
    #[serde(default = "default::memory_reserve_fraction")]
    pub memory_reserve_fraction: f64,

    /// Bounded wait for the cluster-info lookup.
    #[serde(default = "default::cluster_info_timeout_ms")]
    pub cluster_info_timeout_ms: u64,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

impl CompilerConfig {
    pub fn init(path: PathBuf) -> Result<Self> {
        let config_str = fs::read_to_string(path.clone()).map_err(|e| {
            CompileError::from(ConfigurationError(format!(
                "failed to open config file '{}': {}",
                path.to_string_lossy(),
                e
            )))
        })?;
        let config: CompilerConfig = toml::from_str(config_str.as_str())
            .map_err(|e| CompileError::from(ConfigurationError(format!("parse error {}", e))))?;
        Ok(config)
    }

    /// Validate the knobs, replacing invalid values by their defaults with a
    /// warning. A missing job-manager address is fatal because the compiler
    /// cannot resolve cluster info without it.
    pub fn validate(mut self) -> Result<Self> {
        if self.job_manager_address.is_empty() {
            return Err(ConfigurationError("job manager address is not set".to_string()).into());
        }
        if self.job_manager_port == 0 {
            return Err(ConfigurationError("job manager port is not set".to_string()).into());
        }
        if self.max_intra_node_parallelism == 0 || self.max_intra_node_parallelism < -1 {
            log::warn!(
                "invalid max_intra_node_parallelism {}, falling back to {}",
                self.max_intra_node_parallelism,
                default::max_intra_node_parallelism()
            );
            self.max_intra_node_parallelism = default::max_intra_node_parallelism();
        }
        if !(0.0..=1.0).contains(&self.memory_reserve_fraction) {
            return Err(ConfigurationError(format!(
                "memory reserve fraction {} is not within [0, 1]",
                self.memory_reserve_fraction
            ))
            .into());
        }
        Ok(self)
    }
}

mod default {
    pub fn max_machines() -> usize {
        0
    }

    pub fn default_parallelism() -> usize {
        0
    }

    pub fn max_intra_node_parallelism() -> i32 {
        -1
    }

    pub fn job_manager_address() -> String {
        "127.0.0.1".to_string()
    }

    pub fn job_manager_port() -> u16 {
        6123
    }

    pub fn temp_task_memory_mib() -> u64 {
        4
    }

    pub fn memory_reserve_fraction() -> f64 {
        0.96
    }

    pub fn cluster_info_timeout_ms() -> u64 {
        10_000
    }
}
