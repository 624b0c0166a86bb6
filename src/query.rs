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

//! Per-query context, configuration, stats and the response model.
//!
//! A query flows through the plan tree with one [`QueryContext`] (identity,
//! limits, submit time) and one [`QuerySession`] per executing process. The
//! session owns the shared stat counters and the partial-result flags, which
//! are a union over all shards rather than a separate result type, so a slow
//! or failed shard never masks the data that did arrive.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::QueryError;
use crate::range_vector::RvRange;
use crate::schema::ResultSchema;
use crate::serialize::SerializedRangeVector;

/// Wall-clock milliseconds since the unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Limits chosen by the planner for one query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannerParams {
    /// Hard cap on the number of materialized result samples. Exceeding it
    /// fails the query; results are never truncated.
    pub sample_limit: usize,
    pub query_timeout_ms: u64,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            sample_limit: 1_000_000,
            query_timeout_ms: 30_000,
        }
    }
}

/// Identity and limits of one query, shared by every plan node in its tree.
#[derive(Clone, Debug)]
pub struct QueryContext {
    pub query_id: String,
    pub submit_time_ms: u64,
    pub planner_params: PlannerParams,
}

impl QueryContext {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            submit_time_ms: now_ms(),
            planner_params: PlannerParams::default(),
        }
    }

    pub fn with_planner_params(mut self, planner_params: PlannerParams) -> Self {
        self.planner_params = planner_params;
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        now_ms().saturating_sub(self.submit_time_ms)
    }
}

/// The start/step/end of a range query, in seconds as submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeParams {
    pub start_secs: i64,
    pub step_secs: i64,
    pub end_secs: i64,
}

impl RangeParams {
    pub fn new(start_secs: i64, step_secs: i64, end_secs: i64) -> Self {
        Self {
            start_secs,
            step_secs,
            end_secs,
        }
    }

    pub fn as_range_ms(&self) -> RvRange {
        RvRange {
            start_ms: self.start_secs * 1000,
            step_ms: self.step_secs.max(1) * 1000,
            end_ms: self.end_secs * 1000,
        }
    }
}

/// Engine configuration consumed by the query path. Parsing the
/// configuration file lives outside this crate; embedders fill this struct.
#[derive(Clone, Debug)]
pub struct QueryConfig {
    pub ask_timeout: Duration,
    /// A sample older than this is considered stale for lookups.
    pub stale_sample_after: Duration,
    pub min_step: Duration,
    /// Window count above which the fast-reduce path is disabled.
    pub fastreduce_max_windows: usize,
    pub routing: HashMap<String, String>,
    pub parser: String,
    pub translate_prom_histograms: bool,
    pub feature_flags: HashMap<String, bool>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(10),
            stale_sample_after: Duration::from_secs(5 * 60),
            min_step: Duration::from_secs(1),
            fastreduce_max_windows: 50,
            routing: HashMap::new(),
            parser: "promql".to_owned(),
            translate_prom_histograms: false,
            feature_flags: HashMap::new(),
        }
    }
}

impl QueryConfig {
    /// Feature-flag lookup; unknown flags are off.
    pub fn has(&self, name: &str) -> bool {
        self.feature_flags.get(name).copied().unwrap_or(false)
    }
}

/// Shared per-query counters, advanced from whichever task holds the
/// relevant stage and merged upward from child responses.
#[derive(Clone, Debug, Default)]
pub struct QueryStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    result_bytes: AtomicU64,
    result_samples: AtomicU64,
    series_scanned: AtomicU64,
    cpu_nanos: AtomicU64,
}

impl QueryStats {
    pub fn add_result_bytes(&self, n: u64) {
        self.inner.result_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_result_samples(&self, n: u64) {
        self.inner.result_samples.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_series_scanned(&self, n: u64) {
        self.inner.series_scanned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_cpu_nanos(&self, n: u64) {
        self.inner.cpu_nanos.fetch_add(n, Ordering::Relaxed);
    }

    pub fn result_bytes(&self) -> u64 {
        self.inner.result_bytes.load(Ordering::Relaxed)
    }

    pub fn result_samples(&self) -> u64 {
        self.inner.result_samples.load(Ordering::Relaxed)
    }

    pub fn series_scanned(&self) -> u64 {
        self.inner.series_scanned.load(Ordering::Relaxed)
    }

    pub fn cpu_nanos(&self) -> u64 {
        self.inner.cpu_nanos.load(Ordering::Relaxed)
    }

    /// Folds another query's counters into this one.
    pub fn merge(&self, other: &QueryStats) {
        self.add_result_bytes(other.result_bytes());
        self.add_result_samples(other.result_samples());
        self.add_series_scanned(other.series_scanned());
        self.add_cpu_nanos(other.cpu_nanos());
    }
}

#[derive(Debug, Default)]
struct PartialResultState {
    could_be_partial: bool,
    reason: Option<String>,
}

/// Mutable per-process query state: stats plus the partial-result union.
#[derive(Clone, Debug)]
pub struct QuerySession {
    pub query_config: Arc<QueryConfig>,
    pub stats: QueryStats,
    partial: Arc<Mutex<PartialResultState>>,
}

impl QuerySession {
    pub fn new(query_config: Arc<QueryConfig>) -> Self {
        Self {
            query_config,
            stats: QueryStats::default(),
            partial: Arc::new(Mutex::new(PartialResultState::default())),
        }
    }

    pub fn for_test() -> Self {
        Self::new(Arc::new(QueryConfig::default()))
    }

    /// Marks the result as possibly partial; the first reason wins.
    pub fn set_partial(&self, reason: impl Into<String>) {
        let mut state = self.partial.lock();
        state.could_be_partial = true;
        if state.reason.is_none() {
            state.reason = Some(reason.into());
        }
    }

    pub fn partial(&self) -> (bool, Option<String>) {
        let state = self.partial.lock();
        (state.could_be_partial, state.reason.clone())
    }
}

/// Successful query outcome: the unified schema and the materialized,
/// bounded range vectors.
#[derive(Debug)]
pub struct QueryResult {
    pub query_id: String,
    pub result_schema: ResultSchema,
    pub result: Vec<SerializedRangeVector>,
    pub query_stats: QueryStats,
    pub may_be_partial: bool,
    pub partial_result_reason: Option<String>,
}

/// Failed query outcome; stats reflect the work done before the failure.
#[derive(Debug)]
pub struct QueryFailure {
    pub query_id: String,
    pub query_stats: QueryStats,
    pub error: QueryError,
}

/// Every execution produces exactly one response, success or not.
#[derive(Debug)]
pub enum QueryResponse {
    Result(QueryResult),
    Error(QueryFailure),
}

impl QueryResponse {
    pub fn query_id(&self) -> &str {
        match self {
            Self::Result(r) => &r.query_id,
            Self::Error(e) => &e.query_id,
        }
    }

    /// Unwraps into the success payload, surfacing the carried error.
    pub fn into_result(self) -> Result<QueryResult, QueryError> {
        match self {
            Self::Result(r) => Ok(r),
            Self::Error(e) => Err(e.error),
        }
    }
}

impl fmt::Display for QueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result(r) => write!(
                f,
                "QueryResult[{}]: {} range vectors, partial={}",
                r.query_id,
                r.result.len(),
                r.may_be_partial
            ),
            Self::Error(e) => write!(f, "QueryError[{}]: {}", e.query_id, e.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_merge_adds_counters() {
        let a = QueryStats::default();
        a.add_result_bytes(10);
        a.add_result_samples(3);
        let b = QueryStats::default();
        b.add_result_bytes(5);
        b.add_series_scanned(2);
        a.merge(&b);
        assert_eq!(a.result_bytes(), 15);
        assert_eq!(a.result_samples(), 3);
        assert_eq!(a.series_scanned(), 2);
    }

    #[test]
    fn partial_flag_keeps_first_reason() {
        let session = QuerySession::for_test();
        assert_eq!(session.partial(), (false, None));
        session.set_partial("shard 3 timed out");
        session.set_partial("shard 5 timed out");
        let (partial, reason) = session.partial();
        assert!(partial);
        assert_eq!(reason.as_deref(), Some("shard 3 timed out"));
    }

    #[test]
    fn feature_flags_default_off() {
        let config = QueryConfig::default();
        assert!(!config.has("faster-rate"));
        let mut config = QueryConfig::default();
        config.feature_flags.insert("faster-rate".to_owned(), true);
        assert!(config.has("faster-rate"));
    }
}
