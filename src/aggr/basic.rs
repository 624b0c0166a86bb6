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

//! Single-valued aggregators: sum, min, max, count, group.
//!
//! Their intermediate shape equals the input shape, so `map` is a cheap
//! per-row projection and `reduce` folds with the engine-wide NaN
//! discipline: a NaN input is skipped unless every input at that timestamp
//! was NaN, in which case the aggregate itself is NaN. Count in particular
//! yields NaN rather than 0 for an all-NaN instant.

use crate::error::Result;
use crate::query::RangeParams;
use crate::range_vector::{RangeVector, RangeVectorKey, RangeVectorRef};
use crate::row::{MutableRow, RowReader};
use crate::schema::ResultSchema;

use super::{present_scalar_values, AggAccumulator, RowAggregator};

/// NaN-skipping fold shared by the single-valued accumulators.
#[derive(Debug)]
struct FoldAccumulator {
    value: f64,
    combine: fn(f64, f64) -> f64,
}

impl FoldAccumulator {
    fn new(combine: fn(f64, f64) -> f64) -> Self {
        Self {
            value: f64::NAN,
            combine,
        }
    }
}

impl AggAccumulator for FoldAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        let v = row.get_double(1);
        if !v.is_nan() {
            self.value = if self.value.is_nan() {
                v
            } else {
                (self.combine)(self.value, v)
            };
        }
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        MutableRow::timestamp_value(ts, self.value)
    }
}

macro_rules! identity_map {
    () => {
        fn new_row_to_map_into(&self) -> MutableRow {
            MutableRow::new(2)
        }

        fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
            out.set_long(0, row.get_long(0));
            out.set_double(1, row.get_double(1));
        }

        fn reduction_schema(&self, source: &ResultSchema) -> ResultSchema {
            source.clone()
        }

        fn present(
            &self,
            rv: &dyn RangeVector,
            _limit: usize,
            _range_params: &RangeParams,
        ) -> Result<Vec<RangeVectorRef>> {
            Ok(present_scalar_values(rv, |row| row.get_double(1)))
        }

        fn presentation_schema(&self, reduction: &ResultSchema) -> ResultSchema {
            reduction.clone()
        }
    };
}

#[derive(Debug)]
pub struct SumRowAggregator;

impl RowAggregator for SumRowAggregator {
    identity_map!();

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(FoldAccumulator::new(|a, b| a + b))
    }
}

#[derive(Debug)]
pub struct MinRowAggregator;

impl RowAggregator for MinRowAggregator {
    identity_map!();

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(FoldAccumulator::new(f64::min))
    }
}

#[derive(Debug)]
pub struct MaxRowAggregator;

impl RowAggregator for MaxRowAggregator {
    identity_map!();

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(FoldAccumulator::new(f64::max))
    }
}

/// Count maps every present sample to `1.0`, then sums. Reducing already
/// mapped rows therefore sums partial counts.
#[derive(Debug)]
pub struct CountRowAggregator;

impl RowAggregator for CountRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(2)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        let v = row.get_double(1);
        out.set_long(0, row.get_long(0));
        out.set_double(1, if v.is_nan() { f64::NAN } else { 1.0 });
    }

    fn reduction_schema(&self, source: &ResultSchema) -> ResultSchema {
        source.clone()
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(FoldAccumulator::new(|a, b| a + b))
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        Ok(present_scalar_values(rv, |row| row.get_double(1)))
    }

    fn presentation_schema(&self, reduction: &ResultSchema) -> ResultSchema {
        reduction.clone()
    }
}

/// Group emits `1.0` whenever at least one sample exists at the instant.
#[derive(Debug)]
pub struct GroupRowAggregator;

impl RowAggregator for GroupRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(2)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        let v = row.get_double(1);
        out.set_long(0, row.get_long(0));
        out.set_double(1, if v.is_nan() { f64::NAN } else { 1.0 });
    }

    fn reduction_schema(&self, source: &ResultSchema) -> ResultSchema {
        source.clone()
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(FoldAccumulator::new(|_, _| 1.0))
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        Ok(present_scalar_values(rv, |row| row.get_double(1)))
    }

    fn presentation_schema(&self, reduction: &ResultSchema) -> ResultSchema {
        reduction.clone()
    }
}
