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

//! The row-aggregator algebra.
//!
//! Every aggregation operator is expressed as three row-level operations
//! over a small typed accumulator:
//!
//! * `map`: leaf-side projection of one input row into the operator's
//!   intermediate row shape,
//! * `reduce`: combination of two intermediate rows at the same timestamp,
//!   via [`AggAccumulator::add`],
//! * `present`: translation of reduced intermediates into the user-visible
//!   form, possibly fanning one group out into several range vectors.
//!
//! Intermediates travel as ordinary rows under a per-operator reduction
//! schema, so they can be serialized at one plan layer and re-reduced at
//! another without the downstream node knowing which operator produced them.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::error::{QueryError, Result};
use crate::query::RangeParams;
use crate::range_vector::{ListRangeVector, RangeVector, RangeVectorKey, RangeVectorRef};
use crate::row::{MutableRow, RowReader};
use crate::schema::{ColumnType, ResultSchema};

pub mod avg;
pub mod basic;
pub mod count_values;
pub mod hist;
pub mod quantile;
mod range_vector_agg;
pub mod topk;

pub use range_vector_agg::{GroupingFn, RangeVectorAggregator};

/// An aggregation operator together with its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum AggregationOperator {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Stddev,
    Stdvar,
    Group,
    TopK(usize),
    BottomK(usize),
    Quantile(f64),
    CountValues(String),
}

impl AggregationOperator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Stddev => "stddev",
            Self::Stdvar => "stdvar",
            Self::Group => "group",
            Self::TopK(_) => "topk",
            Self::BottomK(_) => "bottomk",
            Self::Quantile(_) => "quantile",
            Self::CountValues(_) => "count_values",
        }
    }

    /// Rejects out-of-range parameters before any row is touched.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::TopK(k) | Self::BottomK(k) if *k == 0 => Err(QueryError::BadQuery(format!(
                "{}: k must be a positive integer",
                self.name()
            ))),
            Self::Quantile(q) if !(0.0..=1.0).contains(q) => Err(QueryError::BadQuery(
                format!("quantile {q} must be within [0, 1]"),
            )),
            Self::CountValues(label) if label.is_empty() => Err(QueryError::BadQuery(
                "count_values requires a non-empty label name".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Rebinds the operator's scalar parameter from a parameter sub-plan.
    /// Only the quantile takes a runtime scalar; a runtime `k` would change
    /// the intermediate row shape after schemas were negotiated.
    pub fn with_scalar_param(&self, value: f64) -> Result<Self> {
        match self {
            Self::Quantile(_) => Ok(Self::Quantile(value)),
            Self::TopK(_) | Self::BottomK(_) => Err(QueryError::BadQuery(format!(
                "{}: k must be a literal",
                self.name()
            ))),
            other => Err(QueryError::BadQuery(format!(
                "{} takes no scalar parameter",
                other.name()
            ))),
        }
    }
}

impl fmt::Display for AggregationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopK(k) | Self::BottomK(k) => write!(f, "{}({k})", self.name()),
            Self::Quantile(q) => write!(f, "quantile({q})"),
            Self::CountValues(label) => write!(f, "count_values({label})"),
            other => f.write_str(other.name()),
        }
    }
}

/// The grouping half of an aggregation expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum AggregateClause {
    /// Collapse every input into a single group.
    #[default]
    Entire,
    By(Vec<String>),
    Without(Vec<String>),
}

impl AggregateClause {
    pub fn grouping_key(&self, key: &RangeVectorKey) -> RangeVectorKey {
        match self {
            Self::Entire => RangeVectorKey::empty(),
            Self::By(labels) => key.retain_labels(labels),
            Self::Without(labels) => key.without_labels(labels),
        }
    }

    pub fn grouping_fn(&self) -> GroupingFn {
        let clause = self.clone();
        Arc::new(move |rv: &dyn RangeVector| clause.grouping_key(rv.key()))
    }
}

impl fmt::Display for AggregateClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entire => Ok(()),
            Self::By(labels) => write!(f, "by ({})", labels.iter().join(", ")),
            Self::Without(labels) => write!(f, "without ({})", labels.iter().join(", ")),
        }
    }
}

/// Per-group, per-timestamp state of one operator.
///
/// Adding a row never rewrites previously emitted state; accumulators only
/// fold forward.
pub trait AggAccumulator: Send + Sync + fmt::Debug {
    /// Folds one intermediate row (same timestamp) into the state.
    fn add(&mut self, row: &dyn RowReader) -> Result<()>;

    /// The current intermediate row for timestamp `ts`.
    fn to_row(&self, ts: i64) -> MutableRow;
}

/// One aggregation operator as its row-level operation set.
pub trait RowAggregator: Send + Sync + fmt::Debug {
    /// A reusable scratch row shaped like the reduction schema.
    fn new_row_to_map_into(&self) -> MutableRow;

    /// Leaf-side projection of one input row into `out`. `key` is the key
    /// of the source range vector, not the group key.
    fn map(&self, key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow);

    /// Shape of the intermediate rows produced by `map` and `reduce`.
    fn reduction_schema(&self, source: &ResultSchema) -> ResultSchema;

    fn new_accumulator(&self) -> Box<dyn AggAccumulator>;

    /// Translates one reduced group into user-visible range vectors.
    /// Fan-out operators may emit up to `limit` vectors per group.
    fn present(
        &self,
        rv: &dyn RangeVector,
        limit: usize,
        range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>>;

    /// Shape of the rows produced by `present`.
    fn presentation_schema(&self, reduction: &ResultSchema) -> ResultSchema;
}

/// Builds the aggregator for `op` against the value column of
/// `source_schema`. Histogram-typed values reroute summation to the
/// histogram aggregator and reject everything else.
pub fn row_aggregator(
    op: &AggregationOperator,
    source_schema: &ResultSchema,
) -> Result<Arc<dyn RowAggregator>> {
    op.validate()?;
    let value_type = source_schema.value_column_type().ok_or_else(|| {
        QueryError::BadQuery(format!(
            "aggregation {op} requires a schema with a value column"
        ))
    })?;
    if value_type == ColumnType::Histogram {
        return match op {
            AggregationOperator::Sum => Ok(Arc::new(hist::HistSumRowAggregator)),
            other => Err(QueryError::BadQuery(format!(
                "aggregation {other} is not supported over histogram values"
            ))),
        };
    }
    Ok(match op {
        AggregationOperator::Sum => Arc::new(basic::SumRowAggregator),
        AggregationOperator::Min => Arc::new(basic::MinRowAggregator),
        AggregationOperator::Max => Arc::new(basic::MaxRowAggregator),
        AggregationOperator::Count => Arc::new(basic::CountRowAggregator),
        AggregationOperator::Group => Arc::new(basic::GroupRowAggregator),
        AggregationOperator::Avg => Arc::new(avg::AvgRowAggregator),
        AggregationOperator::Stddev => Arc::new(avg::StddevRowAggregator),
        AggregationOperator::Stdvar => Arc::new(avg::StdvarRowAggregator),
        AggregationOperator::TopK(k) => Arc::new(topk::TopBottomKRowAggregator::top_k(*k)),
        AggregationOperator::BottomK(k) => {
            Arc::new(topk::TopBottomKRowAggregator::bottom_k(*k))
        }
        AggregationOperator::Quantile(q) => Arc::new(quantile::QuantileRowAggregator::new(*q)),
        AggregationOperator::CountValues(label) => {
            Arc::new(count_values::CountValuesRowAggregator::new(label.clone()))
        }
    })
}

/// Shared `present` for operators whose output is one `(timestamp, value)`
/// vector per group.
pub(crate) fn present_scalar_values(
    rv: &dyn RangeVector,
    value_fn: impl Fn(&MutableRow) -> f64,
) -> Vec<RangeVectorRef> {
    let rows = rv
        .rows()
        .map(|row| MutableRow::timestamp_value(row.get_long(0), value_fn(&row)))
        .collect();
    vec![Box::new(ListRangeVector::new(
        rv.key().clone(),
        rv.output_range(),
        rows,
    ))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_parameters_are_rejected() {
        assert!(AggregationOperator::TopK(0).validate().is_err());
        assert!(AggregationOperator::Quantile(1.5).validate().is_err());
        assert!(AggregationOperator::Quantile(-0.1).validate().is_err());
        assert!(AggregationOperator::CountValues(String::new())
            .validate()
            .is_err());
        assert!(AggregationOperator::TopK(3).validate().is_ok());
        assert!(AggregationOperator::Quantile(0.0).validate().is_ok());
    }

    #[test]
    fn scalar_params_only_rebind_quantile() {
        let q = AggregationOperator::Quantile(0.5)
            .with_scalar_param(0.9)
            .unwrap();
        assert_eq!(q, AggregationOperator::Quantile(0.9));
        assert!(AggregationOperator::TopK(2).with_scalar_param(3.0).is_err());
        assert!(AggregationOperator::Sum.with_scalar_param(1.0).is_err());
    }

    #[test]
    fn factory_reroutes_histogram_sum() {
        let schema = ResultSchema::timestamp_histogram();
        let agg = row_aggregator(&AggregationOperator::Sum, &schema).unwrap();
        assert_eq!(agg.reduction_schema(&schema), schema);
        assert!(row_aggregator(&AggregationOperator::Avg, &schema).is_err());
    }

    #[test]
    fn clause_grouping_keys() {
        let key = RangeVectorKey::from_pairs([("job", "api"), ("instance", "i1")]);
        assert_eq!(
            AggregateClause::Entire.grouping_key(&key),
            RangeVectorKey::empty()
        );
        assert_eq!(
            AggregateClause::By(vec!["job".to_owned()]).grouping_key(&key),
            RangeVectorKey::from_pairs([("job", "api")])
        );
        assert_eq!(
            AggregateClause::Without(vec!["instance".to_owned()]).grouping_key(&key),
            RangeVectorKey::from_pairs([("job", "api")])
        );
    }
}
