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

/// Handle of a [`Contract`] inside a [`Plan`]. Contracts reference each other
/// through handles, so one contract can feed multiple consumers and the plan
/// forms a DAG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractId(pub usize);

/// The operator kinds of the dataflow language.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractKind {
    Source,
    Sink,
    Map,
    /// Binary equi-join on keys.
    Match,
    Reduce,
    /// Binary group-by on keys.
    CoGroup,
    /// Binary cartesian product.
    Cross,
}

impl ContractKind {
    pub fn num_inputs(&self) -> usize {
        match self {
            ContractKind::Source => 0,
            ContractKind::Sink | ContractKind::Map | ContractKind::Reduce => 1,
            ContractKind::Match | ContractKind::CoGroup | ContractKind::Cross => 2,
        }
    }
}

/// An abstract logical operator as built by the front-end. For sources the
/// name doubles as the identifier handed to the statistics provider.
#[derive(Clone, Debug)]
pub struct Contract {
    pub name: String,
    pub kind: ContractKind,
    pub inputs: Vec<ContractId>,
    /// Key fields of the first (or only) input. For a `Map` these are the
    /// fields the user function declares it preserves.
    pub key_fields: Vec<usize>,
    /// Key fields of the second input of a binary contract.
    pub second_key_fields: Vec<usize>,
    /// Declared degree of parallelism. Values below 1 mean "use the default".
    pub parallelism: Option<usize>,
    /// String-keyed compiler hints, parsed once during graph creation.
    pub hints: HashMap<String, String>,
}

impl Contract {
    fn new(name: impl Into<String>, kind: ContractKind, inputs: Vec<ContractId>) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs,
            key_fields: vec![],
            second_key_fields: vec![],
            parallelism: None,
            hints: HashMap::new(),
        }
    }
}

/// A logical plan: an arena of contracts rooted at a set of sinks.
#[derive(Clone, Debug)]
pub struct Plan {
    pub job_name: String,
    contracts: Vec<Contract>,
    sinks: Vec<ContractId>,
    /// Per-job parallelism, overriding the global default when > 0.
    pub default_parallelism: Option<usize>,
    /// Per-job machine limit, clamped by the global config and the cluster.
    pub max_machines: Option<usize>,
}

impl Plan {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            contracts: vec![],
            sinks: vec![],
            default_parallelism: None,
            max_machines: None,
        }
    }

    pub fn with_default_parallelism(mut self, dop: usize) -> Self {
        self.default_parallelism = Some(dop);
        self
    }

    pub fn with_max_machines(mut self, max_machines: usize) -> Self {
        self.max_machines = Some(max_machines);
        self
    }

    fn add(&mut self, contract: Contract) -> ContractId {
        let id = ContractId(self.contracts.len());
        self.contracts.push(contract);
        id
    }

    pub fn add_source(&mut self, name: impl Into<String>) -> ContractId {
        self.add(Contract::new(name, ContractKind::Source, vec![]))
    }

    pub fn add_map(&mut self, name: impl Into<String>, input: ContractId) -> ContractId {
        self.add(Contract::new(name, ContractKind::Map, vec![input]))
    }

    pub fn add_reduce(
        &mut self,
        name: impl Into<String>,
        input: ContractId,
        key_fields: Vec<usize>,
    ) -> ContractId {
        let mut contract = Contract::new(name, ContractKind::Reduce, vec![input]);
        contract.key_fields = key_fields;
        self.add(contract)
    }

    pub fn add_match(
        &mut self,
        name: impl Into<String>,
        left: ContractId,
        right: ContractId,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
    ) -> ContractId {
        let mut contract = Contract::new(name, ContractKind::Match, vec![left, right]);
        contract.key_fields = left_keys;
        contract.second_key_fields = right_keys;
        self.add(contract)
    }

    pub fn add_co_group(
        &mut self,
        name: impl Into<String>,
        left: ContractId,
        right: ContractId,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
    ) -> ContractId {
        let mut contract = Contract::new(name, ContractKind::CoGroup, vec![left, right]);
        contract.key_fields = left_keys;
        contract.second_key_fields = right_keys;
        self.add(contract)
    }

    pub fn add_cross(
        &mut self,
        name: impl Into<String>,
        left: ContractId,
        right: ContractId,
    ) -> ContractId {
        self.add(Contract::new(name, ContractKind::Cross, vec![left, right]))
    }

    pub fn add_sink(&mut self, name: impl Into<String>, input: ContractId) -> ContractId {
        let id = self.add(Contract::new(name, ContractKind::Sink, vec![input]));
        self.sinks.push(id);
        id
    }

    /// Declare the fields a `Map` preserves, which lets downstream property
    /// requests travel through it.
    pub fn set_key_fields(&mut self, id: ContractId, key_fields: Vec<usize>) {
        self.contracts[id.0].key_fields = key_fields;
    }

    pub fn set_parallelism(&mut self, id: ContractId, dop: usize) {
        self.contracts[id.0].parallelism = Some(dop);
    }

    pub fn set_hint(&mut self, id: ContractId, key: impl Into<String>, value: impl Into<String>) {
        self.contracts[id.0].hints.insert(key.into(), value.into());
    }

    pub fn contract(&self, id: ContractId) -> &Contract {
        &self.contracts[id.0]
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn sinks(&self) -> &[ContractId] {
        &self.sinks
    }
}
