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

use std::fmt;

use thiserror::Error;

/// The kinds of errors the compiler can surface. Everything fatal ends up
/// wrapped in a [`CompileError`], the single error type of the crate.
#[derive(Error, Debug)]
pub enum ErrorCode {
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("the plan has no sinks")]
    EmptyPlanError,

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("cluster info error: {0}")]
    ClusterInfoError(String),

    /// An optimizer bug: unknown contract kind, id collision, enumeration
    /// producing a root candidate count other than one.
    #[error("compiler inconsistency: {0}")]
    CompilerInconsistency(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// The compiler's error type, a thin wrapper around [`ErrorCode`] so that
/// callers match on one type while the code constructs the specific kind.
#[derive(Error)]
#[error("{code}")]
pub struct CompileError {
    #[source]
    pub code: ErrorCode,
}

impl fmt::Debug for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompileError({})", self.code)
    }
}

impl From<ErrorCode> for CompileError {
    fn from(code: ErrorCode) -> Self {
        Self { code }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
