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
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use itertools::Itertools;
use parking_lot::{Condvar, Mutex};

use crate::error::ErrorCode::ClusterInfoError;
use crate::error::Result;

/// Hardware reported for one instance of a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareDescription {
    /// Free memory per instance in bytes.
    pub free_memory: u64,
    pub num_cores: u32,
}

/// One instance type the cluster offers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceTypeDescription {
    pub hardware: Option<HardwareDescription>,
    pub max_instances: usize,
}

/// Provider of the cluster's instance-type map, typically backed by an RPC
/// to the job manager. The call may block; the compiler invokes it from a
/// worker thread and bounds the wait.
pub trait ClusterInfoProvider: Send + Sync {
    fn list_instance_types(&self) -> Result<HashMap<String, InstanceTypeDescription>>;
}

type FetchResult = Result<HashMap<String, InstanceTypeDescription>>;

struct FetchSlot {
    result: Mutex<Option<FetchResult>>,
    cond: Condvar,
}

/// Fetch the instance-type map with a bounded wait. A worker thread performs
/// the provider call and publishes the result exactly once; if the deadline
/// passes first, the caller gives up and any later write goes to a slot
/// nobody reads.
pub fn fetch_instance_types(
    provider: Arc<dyn ClusterInfoProvider>,
    timeout: Duration,
) -> Result<HashMap<String, InstanceTypeDescription>> {
    let slot = Arc::new(FetchSlot {
        result: Mutex::new(None),
        cond: Condvar::new(),
    });

    let worker_slot = Arc::clone(&slot);
    thread::spawn(move || {
        let result = provider.list_instance_types();
        let mut guard = worker_slot.result.lock();
        if guard.is_none() {
            *guard = Some(result);
            worker_slot.cond.notify_all();
        }
    });

    let mut guard = slot.result.lock();
    if guard.is_none() {
        wait_for(&slot.cond, &mut guard, timeout);
    }
    match guard.take() {
        Some(Ok(map)) => Ok(map),
        Some(Err(e)) => Err(ClusterInfoError(format!("lookup failed: {}", e)).into()),
        None => Err(ClusterInfoError(format!(
            "lookup timed out after {} ms",
            timeout.as_millis()
        ))
        .into()),
    }
}

fn wait_for(
    cond: &Condvar,
    guard: &mut parking_lot::MutexGuard<'_, Option<FetchResult>>,
    timeout: Duration,
) {
    let deadline = std::time::Instant::now() + timeout;
    while guard.is_none() {
        if cond.wait_until(guard, deadline).timed_out() {
            break;
        }
    }
}

/// Select the instance type to compile for. Among the types reporting
/// hardware, a candidate displaces the current best when it offers more
/// instances without losing much memory, or clearly more memory at a
/// comparable total core count. Iteration is by sorted type name, so the
/// choice is deterministic for any provider.
pub fn pick_instance_type(
    types: &HashMap<String, InstanceTypeDescription>,
) -> Result<(String, InstanceTypeDescription)> {
    if types.is_empty() {
        return Err(ClusterInfoError("no instances registered at the job manager".to_string()).into());
    }

    let mut best: Option<(&String, &InstanceTypeDescription, HardwareDescription)> = None;
    for (name, desc) in types.iter().sorted_by_key(|(name, _)| name.as_str()) {
        let hardware = match desc.hardware {
            Some(hw) => hw,
            None => continue,
        };
        best = match best {
            None => Some((name, desc, hardware)),
            Some((_, best_desc, best_hw)) => {
                let more_instances = desc.max_instances > best_desc.max_instances
                    && hardware.free_memory as f64 * 1.2 > best_hw.free_memory as f64;
                let more_memory = desc.max_instances * hardware.num_cores as usize
                    >= best_desc.max_instances * best_hw.num_cores as usize
                    && hardware.free_memory as f64 > best_hw.free_memory as f64 * 1.5;
                if more_instances || more_memory {
                    Some((name, desc, hardware))
                } else {
                    best
                }
            }
        };
    }

    match best {
        Some((name, desc, _)) => Ok((name.clone(), desc.clone())),
        None => Err(ClusterInfoError(
            "no instance type reported hardware information".to_string(),
        )
        .into()),
    }
}
