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

//! Cost-based optimizer for PACT-style parallel dataflow plans. A logical
//! plan of generalized Map/Reduce/Match/CoGroup/Cross operators is turned
//! into a physical plan where every operator carries a concrete local
//! strategy, every channel a shipping strategy, and every memory-consuming
//! task a budget, at a chosen degree of parallelism.

pub mod cluster;
pub mod config;
pub mod contract;
pub mod cost;
pub mod error;
pub mod hints;
pub mod optimizer;
pub mod statistics;

pub use crate::cluster::{ClusterInfoProvider, HardwareDescription, InstanceTypeDescription};
pub use crate::config::CompilerConfig;
pub use crate::contract::{Contract, ContractId, ContractKind, Plan};
pub use crate::cost::{Cost, CostEstimator, DefaultCostEstimator};
pub use crate::error::{CompileError, ErrorCode, Result};
pub use crate::optimizer::plan::{DefaultPostPass, OptimizedPlan, PostPass};
pub use crate::optimizer::PactCompiler;
pub use crate::statistics::{DataStatistics, TableStats};
