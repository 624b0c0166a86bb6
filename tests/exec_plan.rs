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

//! Plan-runtime behavior: limits, timeouts, schema unification, partial
//! results, child failures, parameter sub-plans and plan-tree rendering.

use std::sync::Arc;

use async_trait::async_trait;

use timefusion::aggr::{AggregateClause, AggregationOperator};
use timefusion::exec::{
    AggregateMapReduce, AggregatePresenter, ChunkSource, DatasetRef, DistConcatExec, ExecPlan,
    ExecResult, FuncArgs, InMemoryChunkSource, InProcessPlanDispatcher, PlanDispatcher,
    RangeVectorTransformer, ReduceAggregateExec, SelectRawSeriesExec,
};
use timefusion::query::{
    now_ms, PlannerParams, QueryConfig, QueryContext, QuerySession, RangeParams,
};
use timefusion::range_vector::{ListRangeVector, RangeVector, RangeVectorKey, RangeVectorRef};
use timefusion::schema::ResultSchema;
use timefusion::{QueryError, Result};

fn dispatcher() -> Arc<dyn PlanDispatcher> {
    Arc::new(InProcessPlanDispatcher::new(Arc::new(QueryConfig::default())))
}

fn sample_source() -> Arc<dyn ChunkSource> {
    Arc::new(InMemoryChunkSource::from_samples(vec![
        (
            RangeVectorKey::from_pairs([("instance", "a")]),
            vec![(1000, 1.0), (2000, 2.0), (3000, 3.0)],
        ),
        (
            RangeVectorKey::from_pairs([("instance", "b")]),
            vec![(1000, 4.0), (2000, 5.0), (3000, 6.0)],
        ),
    ]))
}

/// A canned plan: fixed vectors under a fixed schema, or a canned failure.
#[derive(Debug)]
struct StaticPlan {
    ctx: QueryContext,
    dataset: DatasetRef,
    dispatcher: Arc<dyn PlanDispatcher>,
    transformers: Vec<Arc<dyn RangeVectorTransformer>>,
    schema: ResultSchema,
    series: Vec<ListRangeVector>,
    fail_with: Option<String>,
    mark_partial: Option<String>,
}

impl StaticPlan {
    fn new(ctx: QueryContext, schema: ResultSchema, series: Vec<ListRangeVector>) -> Self {
        Self {
            ctx,
            dataset: DatasetRef::new("prometheus"),
            dispatcher: dispatcher(),
            transformers: Vec::new(),
            schema,
            series,
            fail_with: None,
            mark_partial: None,
        }
    }

    fn failing(ctx: QueryContext, message: &str) -> Self {
        let mut plan = Self::new(ctx, ResultSchema::timestamp_value(), Vec::new());
        plan.fail_with = Some(message.to_owned());
        plan
    }

    fn partial(mut self, reason: &str) -> Self {
        self.mark_partial = Some(reason.to_owned());
        self
    }
}

#[async_trait]
impl ExecPlan for StaticPlan {
    fn query_context(&self) -> &QueryContext {
        &self.ctx
    }

    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn dispatcher(&self) -> Arc<dyn PlanDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn transformers(&self) -> &[Arc<dyn RangeVectorTransformer>] {
        &self.transformers
    }

    fn plan_name(&self) -> &'static str {
        "StaticPlan"
    }

    fn args_string(&self) -> String {
        format!("series={}", self.series.len())
    }

    async fn do_execute(
        &self,
        _source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> Result<ExecResult> {
        if let Some(message) = &self.fail_with {
            return Err(QueryError::BadQuery(message.clone()));
        }
        if let Some(reason) = &self.mark_partial {
            session.set_partial(reason.clone());
        }
        session.stats.add_series_scanned(self.series.len() as u64);
        let rvs: Vec<Result<RangeVectorRef>> = self
            .series
            .iter()
            .map(|rv| Ok(Box::new(rv.clone()) as RangeVectorRef))
            .collect();
        Ok(ExecResult::with_schema(
            Box::pin(futures::stream::iter(rvs)),
            self.schema.clone(),
        ))
    }
}

fn static_series(name: &str, samples: Vec<(i64, f64)>) -> ListRangeVector {
    ListRangeVector::from_samples(
        RangeVectorKey::from_pairs([("instance", name)]),
        None,
        samples,
    )
}

#[tokio::test]
async fn sample_limit_violation_fails_the_query() {
    let mut ctx = QueryContext::new("limited");
    ctx.planner_params = PlannerParams {
        sample_limit: 5,
        query_timeout_ms: 30_000,
    };
    let plan: Arc<dyn ExecPlan> = Arc::new(SelectRawSeriesExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![],
    ));
    let session = QuerySession::for_test();
    let err = plan
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap_err();
    match err {
        QueryError::BadQuery(message) => assert!(message.contains("limit of 5")),
        other => panic!("expected BadQuery, got {other}"),
    }
}

#[tokio::test]
async fn within_limit_query_reports_stats() {
    let plan: Arc<dyn ExecPlan> = Arc::new(SelectRawSeriesExec::new(
        QueryContext::new("stats"),
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![],
    ));
    let session = QuerySession::for_test();
    let result = plan
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap();
    assert_eq!(result.result.len(), 2);
    assert_eq!(result.query_stats.result_samples(), 6);
    assert_eq!(result.query_stats.series_scanned(), 2);
    assert!(result.query_stats.result_bytes() > 0);
}

#[tokio::test]
async fn expired_timeout_is_reported_before_execution() {
    let mut ctx = QueryContext::new("late");
    ctx.submit_time_ms = now_ms().saturating_sub(60_000);
    ctx.planner_params = PlannerParams {
        sample_limit: 1_000_000,
        query_timeout_ms: 1_000,
    };
    let plan: Arc<dyn ExecPlan> = Arc::new(SelectRawSeriesExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![],
    ));
    let session = QuerySession::for_test();
    let err = plan
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap_err();
    assert!(matches!(err, QueryError::Timeout { stage: "step 1", .. }));
}

#[tokio::test]
async fn mismatched_child_schemas_fail_the_parent() {
    let ctx = QueryContext::new("mismatch");
    let double_child = StaticPlan::new(
        ctx.clone(),
        ResultSchema::timestamp_value(),
        vec![static_series("a", vec![(1000, 1.0)])],
    );
    let hist_child = StaticPlan::new(
        ctx.clone(),
        ResultSchema::timestamp_histogram(),
        Vec::new(),
    );
    let parent: Arc<dyn ExecPlan> = Arc::new(ReduceAggregateExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(double_child), Arc::new(hist_child)],
        AggregationOperator::Sum,
    ));
    let session = QuerySession::for_test();
    let err = parent
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap_err();
    assert!(matches!(err, QueryError::SchemaMismatch(_)));
}

#[tokio::test]
async fn empty_children_reduce_to_an_empty_result() {
    let ctx = QueryContext::new("empty");
    let child = StaticPlan::new(ctx.clone(), ResultSchema::empty(), Vec::new());
    let parent: Arc<dyn ExecPlan> = Arc::new(DistConcatExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(child)],
    ));
    let session = QuerySession::for_test();
    let result = parent
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap();
    assert!(result.result_schema.is_empty());
    assert!(result.result.is_empty());
}

#[tokio::test]
async fn partial_flags_propagate_upward() {
    let ctx = QueryContext::new("partial");
    let healthy = StaticPlan::new(
        ctx.clone(),
        ResultSchema::timestamp_value(),
        vec![static_series("a", vec![(1000, 1.0)])],
    );
    let degraded = StaticPlan::new(
        ctx.clone(),
        ResultSchema::timestamp_value(),
        vec![static_series("b", vec![(1000, 2.0)])],
    )
    .partial("shard 7 timed out");
    let parent: Arc<dyn ExecPlan> = Arc::new(DistConcatExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(healthy), Arc::new(degraded)],
    ));
    let session = QuerySession::for_test();
    let result = parent
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap();
    assert_eq!(result.result.len(), 2);
    assert!(result.may_be_partial);
    assert_eq!(result.partial_result_reason.as_deref(), Some("shard 7 timed out"));
}

#[tokio::test]
async fn child_failure_surfaces_with_sibling_stats_accumulated() {
    let ctx = QueryContext::new("child-fail");
    let failing = StaticPlan::failing(ctx.clone(), "boom");
    let healthy = StaticPlan::new(
        ctx.clone(),
        ResultSchema::timestamp_value(),
        vec![static_series("a", vec![(1000, 1.0), (2000, 2.0)])],
    );
    let parent: Arc<dyn ExecPlan> = Arc::new(DistConcatExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(failing), Arc::new(healthy)],
    ));
    let session = QuerySession::for_test();
    let response = parent.execute(sample_source(), &session).await;
    // healthy sibling completed; its stats must survive the failure
    assert!(session.stats.series_scanned() >= 1);
    match response.into_result() {
        Err(QueryError::BadQuery(message)) => assert!(message.contains("boom")),
        other => panic!("expected the child failure, got {other:?}"),
    }
}

#[tokio::test]
async fn quantile_parameter_from_a_sub_plan() {
    let ctx = QueryContext::new("func-arg");
    let range_params = RangeParams::new(1, 1, 1);
    let param_plan: Arc<dyn ExecPlan> = Arc::new(StaticPlan::new(
        ctx.clone(),
        ResultSchema::timestamp_value(),
        vec![static_series("q", vec![(1000, 1.0)])],
    ));

    let mut leaf = SelectRawSeriesExec::new(
        ctx.clone(),
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![],
    );
    leaf.add_range_vector_transformer(Arc::new(AggregateMapReduce::new(
        AggregationOperator::Quantile(0.0),
        AggregateClause::Entire,
    )));
    let mut reduce = ReduceAggregateExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(leaf)],
        AggregationOperator::Quantile(0.0),
    );
    reduce.add_range_vector_transformer(Arc::new(
        AggregatePresenter::new(AggregationOperator::Quantile(0.0), range_params)
            .with_func_params(vec![FuncArgs::ExecPlan {
                plan: param_plan,
                range_params,
            }]),
    ));
    let plan: Arc<dyn ExecPlan> = Arc::new(reduce);
    let session = QuerySession::for_test();
    let result = plan
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap();
    // q resolved to 1.0, so the presented value is the per-instant maximum
    assert_eq!(result.result.len(), 1);
    let row = result.result[0].rows().next().unwrap();
    use timefusion::row::RowReader;
    assert!((row.get_double(1) - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn empty_parameter_sub_plan_degrades_to_nan_and_fails_validation() {
    let ctx = QueryContext::new("func-arg-empty");
    let range_params = RangeParams::new(1, 1, 1);
    let empty_param: Arc<dyn ExecPlan> = Arc::new(StaticPlan::new(
        ctx.clone(),
        ResultSchema::empty(),
        Vec::new(),
    ));

    let mut leaf = SelectRawSeriesExec::new(
        ctx.clone(),
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![],
    );
    leaf.add_range_vector_transformer(Arc::new(AggregateMapReduce::new(
        AggregationOperator::Quantile(0.0),
        AggregateClause::Entire,
    )));
    let mut reduce = ReduceAggregateExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(leaf)],
        AggregationOperator::Quantile(0.0),
    );
    reduce.add_range_vector_transformer(Arc::new(
        AggregatePresenter::new(AggregationOperator::Quantile(0.0), range_params)
            .with_func_params(vec![FuncArgs::ExecPlan {
                plan: empty_param,
                range_params,
            }]),
    ));
    let plan: Arc<dyn ExecPlan> = Arc::new(reduce);
    let session = QuerySession::for_test();
    let err = plan
        .execute(sample_source(), &session)
        .await
        .into_result()
        .unwrap_err();
    assert!(matches!(err, QueryError::BadQuery(_)));
}

#[tokio::test]
async fn print_tree_renders_plans_and_transformers() {
    let ctx = QueryContext::new("tree");
    let mut leaf = SelectRawSeriesExec::new(
        ctx.clone(),
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![],
    );
    leaf.add_range_vector_transformer(Arc::new(AggregateMapReduce::new(
        AggregationOperator::Sum,
        AggregateClause::Entire,
    )));
    let mut reduce = ReduceAggregateExec::new(
        ctx,
        DatasetRef::new("prometheus"),
        dispatcher(),
        vec![Arc::new(leaf)],
        AggregationOperator::Sum,
    );
    reduce.add_range_vector_transformer(Arc::new(AggregatePresenter::new(
        AggregationOperator::Sum,
        RangeParams::new(1, 1, 2),
    )));
    let plan: Arc<dyn ExecPlan> = Arc::new(reduce);
    let rendered = plan.print_tree();
    let expected = "\
T~AggregatePresenter(operator=sum)
-E~ReduceAggregateExec(operator=sum, parallel=true) on InProcessPlanDispatcher
--T~AggregateMapReduce(operator=sum)
---E~SelectRawSeriesExec(dataset=prometheus, filters=[]) on InProcessPlanDispatcher";
    assert_eq!(rendered, expected);
}
