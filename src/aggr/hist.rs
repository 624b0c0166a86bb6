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

//! Summation over histogram-valued series.
//!
//! Buckets add element-wise when the bucket schemas agree. A schema
//! mismatch does not fail the query; the affected instant becomes an
//! all-NaN histogram, which later stages treat like any other absent
//! sample.

use crate::error::Result;
use crate::histogram::HistogramSample;
use crate::query::RangeParams;
use crate::range_vector::{ListRangeVector, RangeVector, RangeVectorKey, RangeVectorRef};
use crate::row::{MutableRow, RowReader};
use crate::schema::ResultSchema;

use super::{AggAccumulator, RowAggregator};

#[derive(Debug)]
pub struct HistSumRowAggregator;

impl RowAggregator for HistSumRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(2)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        out.set_long(0, row.get_long(0));
        out.set_histogram(1, row.get_histogram(1).clone());
    }

    fn reduction_schema(&self, source: &ResultSchema) -> ResultSchema {
        source.clone()
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(HistSumAccumulator {
            sum: HistogramSample::empty(),
        })
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        let rows = rv.rows().collect();
        Ok(vec![Box::new(ListRangeVector::new(
            rv.key().clone(),
            rv.output_range(),
            rows,
        ))])
    }

    fn presentation_schema(&self, reduction: &ResultSchema) -> ResultSchema {
        reduction.clone()
    }
}

#[derive(Debug)]
struct HistSumAccumulator {
    sum: HistogramSample,
}

impl AggAccumulator for HistSumAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        self.sum.add(row.get_histogram(1));
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        let mut row = MutableRow::new(2);
        row.set_long(0, ts);
        row.set_histogram(1, self.sum.clone());
        row
    }
}
