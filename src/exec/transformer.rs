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

//! Stages applied to a plan node's output stream.
//!
//! A transformer rewrites both the range-vector stream and its schema. The
//! two aggregation transformers split the grouped aggregation across the
//! plan tree: `AggregateMapReduce` runs map+reduce next to the data on leaf
//! nodes, and `AggregatePresenter` converts fully reduced intermediates
//! into their user-visible form at the composing node.
//!
//! Transformer parameters may themselves be sub-plans; each one is
//! dispatched before the transformer runs and reduced to a scalar range
//! vector, with an empty sub-result degrading to a fixed NaN scalar.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::aggr::{
    row_aggregator, AggregateClause, AggregationOperator, RangeVectorAggregator,
};
use crate::error::{QueryError, Result};
use crate::query::{QuerySession, RangeParams};
use crate::range_vector::{RangeVector, ScalarRangeVector};
use crate::row::RowReader;
use crate::schema::{ColumnType, ResultSchema};

use super::{ChunkSource, ExecPlan, SendableRangeVectorStream};

/// One parameter of a transformer: a literal, or a sub-plan evaluated to a
/// scalar at transform time.
#[derive(Clone, Debug)]
pub enum FuncArgs {
    Static {
        value: f64,
        range_params: RangeParams,
    },
    ExecPlan {
        plan: Arc<dyn ExecPlan>,
        range_params: RangeParams,
    },
}

/// Evaluates transformer parameters, dispatching parameter sub-plans
/// through their own dispatchers.
pub(crate) async fn eval_func_args(
    args: &[FuncArgs],
    source: &Arc<dyn ChunkSource>,
) -> Result<Vec<ScalarRangeVector>> {
    let mut params = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            FuncArgs::Static {
                value,
                range_params,
            } => params.push(ScalarRangeVector::fixed(range_params.as_range_ms(), *value)),
            FuncArgs::ExecPlan { plan, range_params } => {
                let response = plan
                    .dispatcher()
                    .dispatch(Arc::clone(plan), Arc::clone(source))
                    .await?;
                let result = response.into_result()?;
                let range = range_params.as_range_ms();
                match result.result.first() {
                    None => params.push(ScalarRangeVector::fixed(range, f64::NAN)),
                    Some(srv) => {
                        if srv.record_schema().value_column_type() != Some(ColumnType::Double)
                        {
                            return Err(QueryError::BadQuery(
                                "parameter sub-plan must produce double values".to_owned(),
                            ));
                        }
                        let values: BTreeMap<i64, f64> = srv
                            .rows()
                            .map(|row| (row.get_long(0), row.get_double(1)))
                            .collect();
                        params.push(ScalarRangeVector::varying(range, values));
                    }
                }
            }
        }
    }
    Ok(params)
}

/// A stage after `do_execute` that rewrites the stream and its schema.
pub trait RangeVectorTransformer: Send + Sync + fmt::Debug {
    /// Stage name shown in plan trees.
    fn name(&self) -> &'static str;

    fn args_string(&self) -> String;

    /// Whether the stage still applies when the incoming schema is empty;
    /// stages answering `false` are skipped for empty inputs.
    fn can_handle_empty_schemas(&self) -> bool {
        false
    }

    /// Parameter sub-plans to evaluate before `apply`.
    fn func_args(&self) -> &[FuncArgs] {
        &[]
    }

    fn apply(
        &self,
        stream: SendableRangeVectorStream,
        session: &QuerySession,
        sample_limit: usize,
        source_schema: &ResultSchema,
        params: Vec<ScalarRangeVector>,
    ) -> Result<SendableRangeVectorStream>;

    fn output_schema(&self, source: &ResultSchema) -> Result<ResultSchema>;
}

/// Leaf-side half of a grouped aggregation: maps raw rows into operator
/// intermediates and reduces them per group key.
#[derive(Debug)]
pub struct AggregateMapReduce {
    operator: AggregationOperator,
    clause: AggregateClause,
    func_params: Vec<FuncArgs>,
}

impl AggregateMapReduce {
    pub fn new(operator: AggregationOperator, clause: AggregateClause) -> Self {
        Self {
            operator,
            clause,
            func_params: Vec::new(),
        }
    }

    pub fn with_func_params(mut self, func_params: Vec<FuncArgs>) -> Self {
        self.func_params = func_params;
        self
    }

    fn resolved_operator(&self, params: &[ScalarRangeVector]) -> Result<AggregationOperator> {
        resolve_operator(&self.operator, &self.func_params, params)
    }
}

fn resolve_operator(
    operator: &AggregationOperator,
    func_params: &[FuncArgs],
    params: &[ScalarRangeVector],
) -> Result<AggregationOperator> {
    if func_params.is_empty() {
        return Ok(operator.clone());
    }
    let scalar = params.first().ok_or_else(|| {
        QueryError::Internal("parameter sub-plan results were not supplied".to_owned())
    })?;
    operator.with_scalar_param(scalar.single_value())
}

fn operator_args(operator: &AggregationOperator, clause: &AggregateClause) -> String {
    match clause {
        AggregateClause::Entire => format!("operator={operator}"),
        clause => format!("operator={operator}, clause={clause}"),
    }
}

impl RangeVectorTransformer for AggregateMapReduce {
    fn name(&self) -> &'static str {
        "AggregateMapReduce"
    }

    fn args_string(&self) -> String {
        operator_args(&self.operator, &self.clause)
    }

    fn func_args(&self) -> &[FuncArgs] {
        &self.func_params
    }

    fn apply(
        &self,
        stream: SendableRangeVectorStream,
        _session: &QuerySession,
        _sample_limit: usize,
        source_schema: &ResultSchema,
        params: Vec<ScalarRangeVector>,
    ) -> Result<SendableRangeVectorStream> {
        let operator = self.resolved_operator(&params)?;
        let agg = row_aggregator(&operator, source_schema)?;
        Ok(RangeVectorAggregator::map_reduce(
            agg,
            false,
            stream,
            self.clause.grouping_fn(),
        ))
    }

    fn output_schema(&self, source: &ResultSchema) -> Result<ResultSchema> {
        let agg = row_aggregator(&self.operator, source)?;
        Ok(agg.reduction_schema(source))
    }
}

/// Top-of-tree half of a grouped aggregation: turns reduced intermediates
/// into presented range vectors on the query grid.
#[derive(Debug)]
pub struct AggregatePresenter {
    operator: AggregationOperator,
    range_params: RangeParams,
    func_params: Vec<FuncArgs>,
}

impl AggregatePresenter {
    pub fn new(operator: AggregationOperator, range_params: RangeParams) -> Self {
        Self {
            operator,
            range_params,
            func_params: Vec::new(),
        }
    }

    pub fn with_func_params(mut self, func_params: Vec<FuncArgs>) -> Self {
        self.func_params = func_params;
        self
    }
}

impl RangeVectorTransformer for AggregatePresenter {
    fn name(&self) -> &'static str {
        "AggregatePresenter"
    }

    fn args_string(&self) -> String {
        format!("operator={}", self.operator)
    }

    fn func_args(&self) -> &[FuncArgs] {
        &self.func_params
    }

    fn apply(
        &self,
        stream: SendableRangeVectorStream,
        _session: &QuerySession,
        sample_limit: usize,
        source_schema: &ResultSchema,
        params: Vec<ScalarRangeVector>,
    ) -> Result<SendableRangeVectorStream> {
        let operator = resolve_operator(&self.operator, &self.func_params, &params)?;
        let agg = row_aggregator(&operator, source_schema)?;
        Ok(RangeVectorAggregator::present(
            agg,
            stream,
            sample_limit,
            self.range_params,
        ))
    }

    fn output_schema(&self, source: &ResultSchema) -> Result<ResultSchema> {
        let agg = row_aggregator(&self.operator, source)?;
        Ok(agg.presentation_schema(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QuerySession;
    use crate::range_vector::{ListRangeVector, RangeVectorKey, RangeVectorRef};
    use futures::StreamExt;

    fn stream_of(rvs: Vec<RangeVectorRef>) -> SendableRangeVectorStream {
        Box::pin(futures::stream::iter(rvs.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn map_reduce_then_present_round_trip() {
        let session = QuerySession::for_test();
        let source_schema = ResultSchema::timestamp_value();
        let inputs: Vec<RangeVectorRef> = vec![
            Box::new(ListRangeVector::from_samples(
                RangeVectorKey::from_pairs([("instance", "a")]),
                None,
                vec![(1000, 2.0), (2000, 4.0)],
            )),
            Box::new(ListRangeVector::from_samples(
                RangeVectorKey::from_pairs([("instance", "b")]),
                None,
                vec![(1000, 3.0), (2000, f64::NAN)],
            )),
        ];

        let map_reduce =
            AggregateMapReduce::new(AggregationOperator::Sum, AggregateClause::Entire);
        let reduced = map_reduce
            .apply(stream_of(inputs), &session, 1000, &source_schema, vec![])
            .unwrap();
        let reduction_schema = map_reduce.output_schema(&source_schema).unwrap();
        assert_eq!(reduction_schema, source_schema);

        let presenter =
            AggregatePresenter::new(AggregationOperator::Sum, RangeParams::new(1, 1, 2));
        let presented = presenter
            .apply(reduced, &session, 1000, &reduction_schema, vec![])
            .unwrap();
        let out: Vec<_> = presented
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(out.len(), 1);
        let values: Vec<f64> = out[0].rows().map(|r| r.get_double(1)).collect();
        assert_eq!(values, vec![5.0, 4.0]);
    }

    #[test]
    fn quantile_schema_is_stable_across_params() {
        let t = AggregateMapReduce::new(
            AggregationOperator::Quantile(0.5),
            AggregateClause::Entire,
        );
        let schema = t.output_schema(&ResultSchema::timestamp_value()).unwrap();
        assert_eq!(schema.columns[1].column_type, ColumnType::Blob);
    }

    #[test]
    fn static_func_param_rebinds_quantile() {
        let params = vec![ScalarRangeVector::fixed(
            RangeParams::new(1, 1, 1).as_range_ms(),
            0.9,
        )];
        let resolved = resolve_operator(
            &AggregationOperator::Quantile(0.0),
            &[FuncArgs::Static {
                value: 0.9,
                range_params: RangeParams::new(1, 1, 1),
            }],
            &params,
        )
        .unwrap();
        assert_eq!(resolved, AggregationOperator::Quantile(0.9));
    }
}
