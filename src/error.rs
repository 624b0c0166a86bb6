// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Error types for the query engine.

use thiserror::Error;

/// Result type for query-engine operations.
pub type Result<T, E = QueryError> = std::result::Result<T, E>;

/// Error returned by any stage of the query pipeline.
///
/// Every failure inside `ExecPlan::execute` is captured into one of these
/// variants and surfaced as an error response carrying the query stats
/// accumulated so far; nothing at this layer is retried.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query or one of its parameters is invalid, including a result
    /// that exceeds the configured sample limit.
    #[error("Bad query: {0}")]
    BadQuery(String),

    /// The query exceeded its configured timeout at a step boundary.
    #[error("Query timed out at {stage} after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    Timeout {
        stage: &'static str,
        elapsed_ms: u64,
        timeout_ms: u64,
    },

    /// Child plans returned result schemas that cannot be unified.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A row stream could not be materialized into a byte payload.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invariant violation inside the engine.
    #[error("Internal error: {0}")]
    Internal(String),
}
