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

//! Grouped quantile estimation over t-digest intermediates.
//!
//! `map` sketches each sample into a one-observation digest; `reduce`
//! merges serialized digests, so partial aggregates from any plan layer
//! combine without revisiting raw samples. `present` reads the requested
//! quantile off the merged digest; an instant where every input was NaN
//! carries an empty digest and presents as NaN.

use crate::error::Result;
use crate::query::RangeParams;
use crate::range_vector::{ListRangeVector, RangeVector, RangeVectorKey, RangeVectorRef};
use crate::row::{MutableRow, RowReader};
use crate::schema::{ColumnInfo, ColumnType, ResultSchema};
use crate::tdigest::TDigest;

use super::{AggAccumulator, RowAggregator};

#[derive(Debug)]
pub struct QuantileRowAggregator {
    q: f64,
}

impl QuantileRowAggregator {
    pub fn new(q: f64) -> Self {
        Self { q }
    }
}

impl RowAggregator for QuantileRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(2)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        let mut digest = TDigest::default();
        digest.add(row.get_double(1));
        out.set_long(0, row.get_long(0));
        out.set_blob(1, digest.to_bytes());
    }

    fn reduction_schema(&self, _source: &ResultSchema) -> ResultSchema {
        ResultSchema::new(vec![
            ColumnInfo::new("timestamp", ColumnType::Timestamp),
            ColumnInfo::new("digest", ColumnType::Blob),
        ])
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(QuantileAccumulator {
            digest: TDigest::default(),
        })
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        _limit: usize,
        _range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        let mut rows = Vec::new();
        for row in rv.rows() {
            let digest = TDigest::from_bytes(row.get_blob(1))?;
            rows.push(MutableRow::timestamp_value(
                row.get_long(0),
                digest.quantile(self.q),
            ));
        }
        Ok(vec![Box::new(ListRangeVector::new(
            rv.key().clone(),
            rv.output_range(),
            rows,
        ))])
    }

    fn presentation_schema(&self, _reduction: &ResultSchema) -> ResultSchema {
        ResultSchema::timestamp_value()
    }
}

#[derive(Debug)]
struct QuantileAccumulator {
    digest: TDigest,
}

impl AggAccumulator for QuantileAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        let other = TDigest::from_bytes(row.get_blob(1))?;
        self.digest.merge(&other);
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        let mut row = MutableRow::new(2);
        row.set_long(0, ts);
        row.set_blob(1, self.digest.to_bytes());
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_vector::ListRangeVector;

    fn reduce_instant(agg: &QuantileRowAggregator, values: &[f64], ts: i64) -> MutableRow {
        let key = RangeVectorKey::empty();
        let mut acc = agg.new_accumulator();
        let mut mapped = agg.new_row_to_map_into();
        for v in values {
            let row = MutableRow::timestamp_value(ts, *v);
            agg.map(&key, &row, &mut mapped);
            acc.add(&mapped).unwrap();
        }
        acc.to_row(ts)
    }

    #[test]
    fn median_of_small_instant_is_exact() {
        let agg = QuantileRowAggregator::new(0.5);
        let reduced = reduce_instant(&agg, &[1.0, 2.0, 3.0], 1000);
        let rv = ListRangeVector::new(RangeVectorKey::empty(), None, vec![reduced]);
        let out = agg
            .present(&rv, usize::MAX, &RangeParams::new(1, 1, 1))
            .unwrap();
        let row = out[0].rows().next().unwrap();
        assert_eq!(row.get_double(1), 2.0);
    }

    #[test]
    fn all_nan_instant_presents_nan() {
        let agg = QuantileRowAggregator::new(0.9);
        let reduced = reduce_instant(&agg, &[f64::NAN, f64::NAN], 1000);
        let rv = ListRangeVector::new(RangeVectorKey::empty(), None, vec![reduced]);
        let out = agg
            .present(&rv, usize::MAX, &RangeParams::new(1, 1, 1))
            .unwrap();
        assert!(out[0].rows().next().unwrap().get_double(1).is_nan());
    }

    #[test]
    fn digests_merge_across_partials() {
        let agg = QuantileRowAggregator::new(0.5);
        let left = reduce_instant(&agg, &[1.0, 2.0], 1000);
        let right = reduce_instant(&agg, &[3.0, 4.0, 5.0], 1000);
        let mut acc = agg.new_accumulator();
        acc.add(&left).unwrap();
        acc.add(&right).unwrap();
        let digest = TDigest::from_bytes(acc.to_row(1000).get_blob(1)).unwrap();
        assert_eq!(digest.count(), 5.0);
        assert_eq!(digest.quantile(0.5), 3.0);
    }
}
