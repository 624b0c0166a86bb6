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

//! Non-leaf plans: child dispatch and stream composition.
//!
//! A non-leaf dispatches every child through the child's own dispatcher,
//! tags each response with the child's position (arrival order is not
//! meaningful across children), folds stats and partial-result flags from
//! every completed child, unifies the non-empty child schemas, and then
//! composes the merged stream its own way: concatenation for sharded
//! reads, a reduce-only aggregation pass for distributed aggregations.
//! Child failures surface after sibling stats are folded in; siblings are
//! not cancelled.

use std::sync::Arc;

use async_trait::async_trait;

use crate::aggr::{row_aggregator, AggregationOperator, RangeVectorAggregator};
use crate::error::Result;
use crate::query::{QueryContext, QueryResponse, QueryResult, QuerySession};
use crate::range_vector::{RangeVector, RangeVectorRef};
use crate::schema::{ResultSchema, SchemaReducer};

use super::{
    ChunkSource, DatasetRef, ExecPlan, ExecResult, PlanDispatcher, RangeVectorTransformer,
    SendableRangeVectorStream,
};

fn dispatch_one_child(
    index: usize,
    child: Arc<dyn ExecPlan>,
    source: Arc<dyn ChunkSource>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (usize, Result<QueryResponse>)> + Send>> {
    Box::pin(async move {
        let response = child.dispatcher().dispatch(Arc::clone(&child), source).await;
        (index, response)
    })
}

/// Dispatches all children, preserving positional indexes. Stats and
/// partial flags of every completed child are folded into `session` before
/// the first child failure (in child order) is surfaced.
pub(crate) async fn dispatch_children(
    children: Vec<Arc<dyn ExecPlan>>,
    source: &Arc<dyn ChunkSource>,
    session: &QuerySession,
    parallel_child_tasks: bool,
) -> Result<Vec<(QueryResult, usize)>> {
    let futures: Vec<_> = children
        .into_iter()
        .enumerate()
        .map(|(index, child)| dispatch_one_child(index, child, Arc::clone(source)))
        .collect();
    let responses: Vec<(usize, Result<QueryResponse>)> = if parallel_child_tasks {
        futures::future::join_all(futures).await
    } else {
        let mut out = Vec::with_capacity(futures.len());
        for fut in futures {
            out.push(fut.await);
        }
        out
    };

    let mut results = Vec::with_capacity(responses.len());
    let mut first_error = None;
    for (index, response) in responses {
        match response {
            Err(e) => first_error = first_error.or(Some(e)),
            Ok(QueryResponse::Error(failure)) => {
                session.stats.merge(&failure.query_stats);
                log::debug!(
                    "child {index} of query {} failed: {}",
                    failure.query_id,
                    failure.error
                );
                first_error = first_error.or(Some(failure.error));
            }
            Ok(QueryResponse::Result(result)) => {
                session.stats.merge(&result.query_stats);
                if result.may_be_partial {
                    session.set_partial(
                        result
                            .partial_result_reason
                            .clone()
                            .unwrap_or_else(|| format!("child {index} returned partial data")),
                    );
                }
                results.push((result, index));
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Unifies the non-empty child schemas under `reducer`.
pub(crate) fn reduce_child_schemas(
    responses: &[(QueryResult, usize)],
    reducer: SchemaReducer,
) -> Result<ResultSchema> {
    responses
        .iter()
        .filter(|(result, _)| !result.result_schema.is_empty())
        .try_fold(ResultSchema::empty(), |acc, (result, _)| {
            reducer.reduce(acc, &result.result_schema)
        })
}

/// Concatenates the serialized vectors of all non-empty children in child
/// order.
fn concat_child_vectors(responses: Vec<(QueryResult, usize)>) -> SendableRangeVectorStream {
    let rvs: Vec<Result<RangeVectorRef>> = responses
        .into_iter()
        .filter(|(result, _)| !result.result_schema.is_empty())
        .flat_map(|(result, _)| result.result)
        .map(|srv| Ok(Box::new(srv) as RangeVectorRef))
        .collect();
    Box::pin(futures::stream::iter(rvs))
}

/// Reduces the already-mapped outputs of its children per group key.
///
/// The map phase ran on the leaves via `AggregateMapReduce`; this node
/// feeds child intermediates straight into the reduce phase, grouped by
/// the keys the leaves emitted. A presenting transformer typically sits on
/// this node to produce the final form.
#[derive(Debug)]
pub struct ReduceAggregateExec {
    query_context: QueryContext,
    dataset: DatasetRef,
    dispatcher: Arc<dyn PlanDispatcher>,
    children: Vec<Arc<dyn ExecPlan>>,
    operator: AggregationOperator,
    parallel_child_tasks: bool,
    transformers: Vec<Arc<dyn RangeVectorTransformer>>,
}

impl ReduceAggregateExec {
    pub fn new(
        query_context: QueryContext,
        dataset: DatasetRef,
        dispatcher: Arc<dyn PlanDispatcher>,
        children: Vec<Arc<dyn ExecPlan>>,
        operator: AggregationOperator,
    ) -> Self {
        Self {
            query_context,
            dataset,
            dispatcher,
            children,
            operator,
            parallel_child_tasks: true,
            transformers: Vec::new(),
        }
    }

    /// Sequential child dispatch, used to split long-range queries.
    pub fn with_sequential_children(mut self) -> Self {
        self.parallel_child_tasks = false;
        self
    }

    pub fn add_range_vector_transformer(&mut self, t: Arc<dyn RangeVectorTransformer>) {
        self.transformers.push(t);
    }
}

#[async_trait]
impl ExecPlan for ReduceAggregateExec {
    fn query_context(&self) -> &QueryContext {
        &self.query_context
    }

    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn dispatcher(&self) -> Arc<dyn PlanDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn children(&self) -> Vec<Arc<dyn ExecPlan>> {
        self.children.clone()
    }

    fn transformers(&self) -> &[Arc<dyn RangeVectorTransformer>] {
        &self.transformers
    }

    fn plan_name(&self) -> &'static str {
        "ReduceAggregateExec"
    }

    fn args_string(&self) -> String {
        format!(
            "operator={}, parallel={}",
            self.operator, self.parallel_child_tasks
        )
    }

    async fn do_execute(
        &self,
        source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> Result<ExecResult> {
        let responses =
            dispatch_children(self.children.clone(), &source, session, self.parallel_child_tasks)
                .await?;
        let schema = reduce_child_schemas(&responses, SchemaReducer::default())?;
        if schema.is_empty() {
            return Ok(ExecResult::empty());
        }
        let agg = row_aggregator(&self.operator, &schema)?;
        let reduced = RangeVectorAggregator::map_reduce(
            agg,
            true,
            concat_child_vectors(responses),
            // leaves already emit group keys, so reduce by key identity
            Arc::new(|rv: &dyn RangeVector| rv.key().clone()),
        );
        Ok(ExecResult::with_schema(reduced, schema))
    }
}

/// Concatenates shard results into one stream.
///
/// Shards may disagree on column names and per-shard vector lengths, so
/// schema unification only requires matching column types.
#[derive(Debug)]
pub struct DistConcatExec {
    query_context: QueryContext,
    dataset: DatasetRef,
    dispatcher: Arc<dyn PlanDispatcher>,
    children: Vec<Arc<dyn ExecPlan>>,
    transformers: Vec<Arc<dyn RangeVectorTransformer>>,
}

impl DistConcatExec {
    pub fn new(
        query_context: QueryContext,
        dataset: DatasetRef,
        dispatcher: Arc<dyn PlanDispatcher>,
        children: Vec<Arc<dyn ExecPlan>>,
    ) -> Self {
        Self {
            query_context,
            dataset,
            dispatcher,
            children,
            transformers: Vec::new(),
        }
    }

    pub fn add_range_vector_transformer(&mut self, t: Arc<dyn RangeVectorTransformer>) {
        self.transformers.push(t);
    }
}

#[async_trait]
impl ExecPlan for DistConcatExec {
    fn query_context(&self) -> &QueryContext {
        &self.query_context
    }

    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn dispatcher(&self) -> Arc<dyn PlanDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn children(&self) -> Vec<Arc<dyn ExecPlan>> {
        self.children.clone()
    }

    fn transformers(&self) -> &[Arc<dyn RangeVectorTransformer>] {
        &self.transformers
    }

    fn plan_name(&self) -> &'static str {
        "DistConcatExec"
    }

    fn args_string(&self) -> String {
        format!("children={}", self.children.len())
    }

    async fn do_execute(
        &self,
        source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> Result<ExecResult> {
        let responses = dispatch_children(self.children.clone(), &source, session, true).await?;
        let schema = reduce_child_schemas(
            &responses,
            SchemaReducer::IgnoreFixedVectorLenAndColumnNames,
        )?;
        if schema.is_empty() {
            return Ok(ExecResult::empty());
        }
        Ok(ExecResult::with_schema(
            concat_child_vectors(responses),
            schema,
        ))
    }
}
