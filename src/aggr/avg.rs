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

//! Mean and variance aggregators.
//!
//! Their intermediates carry the sufficient statistics rather than the
//! final value, so partial aggregates from different plan layers combine
//! exactly: weighted means for avg, and the parallel variance combination
//! of Chan et al. for stddev/stdvar. Sample counts ride along as doubles;
//! they are exact up to 2^53 samples.

use crate::error::Result;
use crate::query::RangeParams;
use crate::range_vector::{RangeVector, RangeVectorKey, RangeVectorRef};
use crate::row::{MutableRow, RowReader};
use crate::schema::{ColumnInfo, ColumnType, ResultSchema};

use super::{present_scalar_values, AggAccumulator, RowAggregator};

fn mean_count_schema() -> ResultSchema {
    ResultSchema::new(vec![
        ColumnInfo::new("timestamp", ColumnType::Timestamp),
        ColumnInfo::new("mean", ColumnType::Double),
        ColumnInfo::new("count", ColumnType::Double),
    ])
}

fn variance_schema() -> ResultSchema {
    ResultSchema::new(vec![
        ColumnInfo::new("timestamp", ColumnType::Timestamp),
        ColumnInfo::new("var", ColumnType::Double),
        ColumnInfo::new("mean", ColumnType::Double),
        ColumnInfo::new("count", ColumnType::Double),
    ])
}

/// Average with a `(mean, count)` intermediate.
#[derive(Debug)]
pub struct AvgRowAggregator;

impl RowAggregator for AvgRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(3)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        let v = row.get_double(1);
        out.set_long(0, row.get_long(0));
        if v.is_nan() {
            out.set_double(1, f64::NAN);
            out.set_double(2, 0.0);
        } else {
            out.set_double(1, v);
            out.set_double(2, 1.0);
        }
    }

    fn reduction_schema(&self, _source: &ResultSchema) -> ResultSchema {
        mean_count_schema()
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(AvgAccumulator::default())
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        Ok(present_scalar_values(rv, |row| row.get_double(1)))
    }

    fn presentation_schema(&self, _reduction: &ResultSchema) -> ResultSchema {
        ResultSchema::timestamp_value()
    }
}

#[derive(Debug, Default)]
struct AvgAccumulator {
    mean: f64,
    count: f64,
}

impl AggAccumulator for AvgAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        let mean = row.get_double(1);
        let count = row.get_double(2);
        if count > 0.0 && !mean.is_nan() {
            if self.count == 0.0 {
                self.mean = mean;
                self.count = count;
            } else {
                let total = self.count + count;
                self.mean = (self.mean * self.count + mean * count) / total;
                self.count = total;
            }
        }
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        let mut row = MutableRow::new(3);
        row.set_long(0, ts);
        row.set_double(1, if self.count == 0.0 { f64::NAN } else { self.mean });
        row.set_double(2, self.count);
        row
    }
}

/// Shared accumulator for stddev/stdvar with a `(var, mean, count)`
/// intermediate. Variances are population variances.
#[derive(Debug, Default)]
struct VarianceAccumulator {
    var: f64,
    mean: f64,
    count: f64,
}

impl AggAccumulator for VarianceAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        let var = row.get_double(1);
        let mean = row.get_double(2);
        let count = row.get_double(3);
        if count > 0.0 && !mean.is_nan() {
            if self.count == 0.0 {
                self.var = var;
                self.mean = mean;
                self.count = count;
            } else {
                let n1 = self.count;
                let n2 = count;
                let total = n1 + n2;
                let delta = mean - self.mean;
                let m2 = self.var * n1 + var * n2 + delta * delta * n1 * n2 / total;
                self.mean = (self.mean * n1 + mean * n2) / total;
                self.var = m2 / total;
                self.count = total;
            }
        }
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        let mut row = MutableRow::new(4);
        row.set_long(0, ts);
        if self.count == 0.0 {
            row.set_double(1, f64::NAN);
            row.set_double(2, f64::NAN);
            row.set_double(3, 0.0);
        } else {
            row.set_double(1, self.var);
            row.set_double(2, self.mean);
            row.set_double(3, self.count);
        }
        row
    }
}

fn variance_map(row: &dyn RowReader, out: &mut MutableRow) {
    let v = row.get_double(1);
    out.set_long(0, row.get_long(0));
    if v.is_nan() {
        out.set_double(1, f64::NAN);
        out.set_double(2, f64::NAN);
        out.set_double(3, 0.0);
    } else {
        out.set_double(1, 0.0);
        out.set_double(2, v);
        out.set_double(3, 1.0);
    }
}

#[derive(Debug)]
pub struct StdvarRowAggregator;

impl RowAggregator for StdvarRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(4)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        variance_map(row, out);
    }

    fn reduction_schema(&self, _source: &ResultSchema) -> ResultSchema {
        variance_schema()
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(VarianceAccumulator::default())
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        Ok(present_scalar_values(rv, |row| row.get_double(1)))
    }

    fn presentation_schema(&self, _reduction: &ResultSchema) -> ResultSchema {
        ResultSchema::timestamp_value()
    }
}

#[derive(Debug)]
pub struct StddevRowAggregator;

impl RowAggregator for StddevRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(4)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        variance_map(row, out);
    }

    fn reduction_schema(&self, _source: &ResultSchema) -> ResultSchema {
        variance_schema()
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(VarianceAccumulator::default())
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        Ok(present_scalar_values(rv, |row| row.get_double(1).sqrt()))
    }

    fn presentation_schema(&self, _reduction: &ResultSchema) -> ResultSchema {
        ResultSchema::timestamp_value()
    }
}
