// Copyright 2026 Mvocc Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the engine
//!
//! Construction and catalog failures are reported through [`Error`].
//! Per-operation failures inside a running transaction are reported as
//! boolean returns or [`crate::CommitResult`] values, never as errors.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for engine construction and catalog operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid engine configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Page pool could not reserve its backing region
    #[error("failed to reserve {0} bytes of page pool memory")]
    PoolReservation(u64),

    /// Page pool ran out of pages while building a slab
    #[error("page pool exhausted while carving version slabs")]
    PoolExhausted,

    /// Requested payload size exceeds the largest version size class
    #[error("data size {size} exceeds the largest version class of {max} bytes")]
    DataSizeTooLarge { size: u64, max: u64 },

    /// Table not found in the catalog
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// Table already exists when trying to create
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// Table definition is unusable
    #[error("invalid table definition: {0}")]
    InvalidTable(String),
}
