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

//! The execution-plan runtime.
//!
//! A query is a tree of [`ExecPlan`] nodes. Leaves produce raw row streams
//! from a [`ChunkSource`]; inner nodes dispatch their children (locally or
//! remotely) and compose the responses. Every node runs the same two-step
//! pipeline around its `do_execute`:
//!
//! 1. produce an [`ExecResult`] (lazy range-vector stream plus pending
//!    schema) on the query scheduler, failing fast if the query has already
//!    outlived its timeout;
//! 2. fold the ordered [`RangeVectorTransformer`] chain over the stream and
//!    schema, then materialize the surviving vectors into serialized byte
//!    payloads under the sample limit.
//!
//! Any error along the way is converted into an error response carrying the
//! stats accumulated so far, so callers always receive exactly one
//! [`QueryResponse`].

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt};
use futures::FutureExt;

use crate::error::{QueryError, Result};
use crate::query::{QueryContext, QueryFailure, QueryResponse, QueryResult, QuerySession};
use crate::range_vector::{RangeVector, RangeVectorRef};
use crate::scheduler::check_query_scheduler;
use crate::schema::ResultSchema;
use crate::serialize::{RecordBuilder, SerializedRangeVector};

pub mod dispatcher;
pub mod metrics;
pub mod non_leaf;
pub mod select;
pub mod transformer;

pub use dispatcher::{InProcessPlanDispatcher, PlanDispatcher};
pub use metrics::{ExecPlanMetrics, MetricsRegistry};
pub use non_leaf::{DistConcatExec, ReduceAggregateExec};
pub use select::{ChunkSource, ColumnFilter, InMemoryChunkSource, ScanResult, SelectRawSeriesExec};
pub use transformer::{
    AggregateMapReduce, AggregatePresenter, FuncArgs, RangeVectorTransformer,
};

/// The stream of range vectors flowing between plan stages.
pub type SendableRangeVectorStream =
    Pin<Box<dyn Stream<Item = Result<RangeVectorRef>> + Send>>;

/// The result schema of a stage, pending until the stage has seen enough of
/// its inputs to know it.
pub type SchemaFuture = BoxFuture<'static, Result<ResultSchema>>;

/// What `do_execute` hands to the shared pipeline: the lazy stream and the
/// pending schema describing its rows.
pub struct ExecResult {
    pub stream: SendableRangeVectorStream,
    pub schema: SchemaFuture,
}

impl ExecResult {
    pub fn new(stream: SendableRangeVectorStream, schema: SchemaFuture) -> Self {
        Self { stream, schema }
    }

    pub fn with_schema(stream: SendableRangeVectorStream, schema: ResultSchema) -> Self {
        Self {
            stream,
            schema: futures::future::ready(Ok(schema)).boxed(),
        }
    }

    pub fn empty() -> Self {
        Self::with_schema(Box::pin(futures::stream::empty()), ResultSchema::empty())
    }
}

/// Identifies the dataset a plan reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetRef {
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dataset)
    }
}

/// One node of the execution-plan tree.
#[async_trait]
pub trait ExecPlan: fmt::Debug + Send + Sync {
    fn query_context(&self) -> &QueryContext;

    fn dataset(&self) -> &DatasetRef;

    /// How this node is reached by its parent: in-process or remote.
    fn dispatcher(&self) -> Arc<dyn PlanDispatcher>;

    fn children(&self) -> Vec<Arc<dyn ExecPlan>> {
        Vec::new()
    }

    /// Ordered chain applied to this node's output, innermost first.
    fn transformers(&self) -> &[Arc<dyn RangeVectorTransformer>];

    /// Whether materialization enforces the sample limit at this node.
    fn enforce_limit(&self) -> bool {
        true
    }

    /// Class name shown in plan trees and metric tags.
    fn plan_name(&self) -> &'static str;

    /// Human-readable argument summary for `print_tree`.
    fn args_string(&self) -> String;

    /// Produces this node's raw output; inner nodes dispatch children here.
    async fn do_execute(
        &self,
        source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> Result<ExecResult>;
}

impl dyn ExecPlan {
    /// Runs the full two-step pipeline. Never fails: errors become an error
    /// response with the stats gathered so far.
    pub async fn execute(
        &self,
        source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> QueryResponse {
        let query_id = self.query_context().query_id.clone();
        match self.execute_streamed(source, session).await {
            Ok(result) => QueryResponse::Result(result),
            Err(error) => {
                log::warn!("query {query_id} failed in {}: {error}", self.plan_name());
                MetricsRegistry::global()
                    .for_plan(self.plan_name())
                    .queries_failed
                    .add(1);
                QueryResponse::Error(QueryFailure {
                    query_id,
                    query_stats: session.stats.clone(),
                    error,
                })
            }
        }
    }

    async fn execute_streamed(
        &self,
        source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> Result<QueryResult> {
        let plan_metrics = MetricsRegistry::global().for_plan(self.plan_name());
        let started = Instant::now();

        // Step 1: produce the raw stream.
        check_query_scheduler("do_execute");
        self.check_timeout("step 1")?;
        log::debug!(
            "query {}: executing {} on {}",
            self.query_context().query_id,
            self.plan_name(),
            self.dataset()
        );
        let exec_result = self.do_execute(Arc::clone(&source), session).await?;

        // Step 2: transformer chain, then materialization.
        self.check_timeout("step 2")?;
        check_query_scheduler("transform");
        let mut schema = exec_result.schema.await?;
        let mut stream = exec_result.stream;
        let sample_limit = self.query_context().planner_params.sample_limit;
        for t in self.transformers() {
            if schema.is_empty() && !t.can_handle_empty_schemas() {
                continue;
            }
            let params = transformer::eval_func_args(t.func_args(), &source).await?;
            stream = t.apply(stream, session, sample_limit, &schema, params)?;
            schema = t.output_schema(&schema)?;
        }

        let result = if schema.is_empty() {
            Vec::new()
        } else {
            self.make_result(stream, &schema, session, &plan_metrics)
                .await?
        };

        plan_metrics.execute_time.add_elapsed(started);
        session
            .stats
            .add_cpu_nanos(started.elapsed().as_nanos() as u64);
        let (may_be_partial, partial_result_reason) = session.partial();
        Ok(QueryResult {
            query_id: self.query_context().query_id.clone(),
            result_schema: schema,
            result,
            query_stats: session.stats.clone(),
            may_be_partial,
            partial_result_reason,
        })
    }

    /// Drains the final stream into serialized vectors, enforcing the
    /// sample limit and dropping empty vectors.
    async fn make_result(
        &self,
        mut stream: SendableRangeVectorStream,
        schema: &ResultSchema,
        session: &QuerySession,
        plan_metrics: &ExecPlanMetrics,
    ) -> Result<Vec<SerializedRangeVector>> {
        let mut builder = RecordBuilder::new();
        let mut result = Vec::new();
        let mut total_samples = 0usize;
        let sample_limit = self.query_context().planner_params.sample_limit;
        while let Some(rv) = stream.next().await {
            let rv = rv?;
            let srv = SerializedRangeVector::materialize(
                rv.as_ref(),
                &mut builder,
                schema,
                self.plan_name(),
            )?;
            total_samples += srv.num_rows_serialized();
            if self.enforce_limit() && total_samples > sample_limit {
                return Err(QueryError::BadQuery(format!(
                    "query result would contain at least {total_samples} samples, \
                     exceeding the limit of {sample_limit}"
                )));
            }
            if srv.num_rows_serialized() > 0 {
                result.push(srv);
            }
        }
        let result_bytes: usize = result
            .iter()
            .map(|srv| srv.data_bytes() + srv.key().size_bytes())
            .sum();
        session.stats.add_result_bytes(result_bytes as u64);
        session.stats.add_result_samples(total_samples as u64);
        plan_metrics.rows_serialized.add(total_samples as u64);
        Ok(result)
    }

    fn check_timeout(&self, stage: &'static str) -> Result<()> {
        let ctx = self.query_context();
        let elapsed_ms = ctx.elapsed_ms();
        let timeout_ms = ctx.planner_params.query_timeout_ms;
        if elapsed_ms >= timeout_ms {
            Err(QueryError::Timeout {
                stage,
                elapsed_ms,
                timeout_ms,
            })
        } else {
            Ok(())
        }
    }

    /// Renders the plan tree with `E~Plan(args) on dispatcher` nodes and
    /// `T~Transformer(args)` stages, indented by depth.
    pub fn print_tree(&self) -> String {
        self.print_tree_lines(0).join("\n")
    }

    fn print_tree_lines(&self, level: usize) -> Vec<String> {
        let transformers = self.transformers();
        let mut lines: Vec<String> = transformers
            .iter()
            .rev()
            .enumerate()
            .map(|(i, t)| {
                format!(
                    "{}T~{}({})",
                    "-".repeat(level + i),
                    t.name(),
                    t.args_string()
                )
            })
            .collect();
        let cur_level = level + transformers.len();
        lines.push(format!(
            "{}E~{}({}) on {:?}",
            "-".repeat(cur_level),
            self.plan_name(),
            self.args_string(),
            self.dispatcher()
        ));
        for child in self.children() {
            lines.extend(child.print_tree_lines(cur_level + 1));
        }
        lines
    }
}
