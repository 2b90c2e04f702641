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

//! Physical properties of data channels. Global properties describe how
//! tuples are distributed across parallel subtasks, local properties the
//! arrangement within one partition. A *requested* property is a constraint
//! placed by a consumer; a *delivered* property is a fact about a channel.

mod ordering;
mod partitioning;

pub use ordering::{Direction, FieldOrder, LocalProps, Ordering, RequestedLocalProps};
pub use partitioning::{GlobalProps, RequestedGlobalProps};

/// The pair of constraints a consumer places on one input channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestedProps {
    pub global: RequestedGlobalProps,
    pub local: RequestedLocalProps,
}
