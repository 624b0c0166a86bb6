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

//! TimeFusion is a streaming query-engine fragment for Prometheus-compatible
//! metric stores. It evaluates grouped aggregations (sum, avg, count, min,
//! max, stddev, stdvar, quantile, group, topk, bottomk, count_values) over
//! many time-aligned series in a single streaming pass, orchestrated by a
//! tree of execution-plan nodes whose leaves read raw series and whose inner
//! nodes dispatch, reduce and re-compose child results.
//!
//! The three layers, bottom up:
//!
//! * [`aggr`] is the row-aggregator algebra. Every operator is a set of
//!   row-level operations (`map`, `reduce`, `present`) over a small typed
//!   accumulator, plus the streaming two-phase map/reduce driver
//!   [`aggr::RangeVectorAggregator`].
//! * [`range_vector`], [`row`] and [`serialize`] form the data model:
//!   labeled range vectors of timestamped rows, and their materialization
//!   into bounded byte payloads.
//! * [`exec`] is the plan runtime: [`exec::ExecPlan`] nodes, the ordered
//!   transformer chain, child dispatch, schema unification, and sample-limit
//!   enforcement.
//!
//! Absent samples are `NaN` rather than omitted; all aggregations are
//! NaN-aware, so a gap in one input series never poisons the aggregate
//! unless every input is absent at that instant.

pub mod aggr;
pub mod error;
pub mod exec;
pub mod histogram;
pub mod query;
pub mod range_vector;
pub mod row;
pub mod scheduler;
pub mod schema;
pub mod serialize;
pub mod tdigest;

pub use error::{QueryError, Result};
