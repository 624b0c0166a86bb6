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

//! `count_values`: occurrence counts per distinct sample value.
//!
//! Intermediates are blobs of `(value, count)` pairs keyed by the value's
//! bit pattern (`-0.0` normalized to `0.0`), so reduction is exact value
//! equality rather than epsilon comparison. `present` fans each group out
//! into one range vector per distinct value, keyed by the configured label
//! carrying the value in shortest round-trip decimal form (`5.6`, `2.0`).

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hashbrown::HashMap;

use crate::error::Result;
use crate::query::RangeParams;
use crate::range_vector::{ListRangeVector, RangeVector, RangeVectorKey, RangeVectorRef};
use crate::row::{MutableRow, RowReader};
use crate::schema::{ColumnInfo, ColumnType, ResultSchema};

use super::{AggAccumulator, RowAggregator};

fn normalized_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

/// Shortest decimal form that round-trips, the label-value format.
fn format_value(v: f64) -> String {
    format!("{v:?}")
}

fn encode_counts(pairs: &[(u64, u64)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(pairs.len() * 16);
    for (bits, count) in pairs {
        buf.put_u64_le(*bits);
        buf.put_u64_le(*count);
    }
    buf.freeze()
}

fn decode_counts(mut data: &[u8]) -> impl Iterator<Item = (u64, u64)> + '_ {
    std::iter::from_fn(move || {
        if data.remaining() < 16 {
            return None;
        }
        Some((data.get_u64_le(), data.get_u64_le()))
    })
}

#[derive(Debug)]
pub struct CountValuesRowAggregator {
    label: String,
}

impl CountValuesRowAggregator {
    pub fn new(label: String) -> Self {
        Self { label }
    }
}

impl RowAggregator for CountValuesRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        MutableRow::new(2)
    }

    fn map(&self, _key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        let v = row.get_double(1);
        out.set_long(0, row.get_long(0));
        if v.is_nan() {
            out.set_blob(1, Bytes::new());
        } else {
            out.set_blob(1, encode_counts(&[(normalized_bits(v), 1)]));
        }
    }

    fn reduction_schema(&self, _source: &ResultSchema) -> ResultSchema {
        ResultSchema::new(vec![
            ColumnInfo::new("timestamp", ColumnType::Timestamp),
            ColumnInfo::new("counts", ColumnType::Blob),
        ])
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(CountValuesAccumulator {
            counts: HashMap::new(),
        })
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        limit: usize,
        range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        // distinct value -> (timestamp -> count); BTreeMap on the bit
        // pattern keeps the fan-out order deterministic
        let mut per_value: BTreeMap<u64, BTreeMap<i64, u64>> = BTreeMap::new();
        for row in rv.rows() {
            let ts = row.get_long(0);
            for (bits, count) in decode_counts(row.get_blob(1)) {
                *per_value.entry(bits).or_default().entry(ts).or_insert(0) += count;
            }
        }
        let grid = range_params.as_range_ms();
        Ok(per_value
            .into_iter()
            .take(limit)
            .map(|(bits, points)| {
                let key = RangeVectorKey::from_pairs([(
                    self.label.clone(),
                    format_value(f64::from_bits(bits)),
                )]);
                let rows = grid
                    .timestamps()
                    .map(|ts| {
                        MutableRow::timestamp_value(
                            ts,
                            points.get(&ts).map(|c| *c as f64).unwrap_or(f64::NAN),
                        )
                    })
                    .collect();
                Box::new(ListRangeVector::new(key, Some(grid), rows)) as RangeVectorRef
            })
            .collect())
    }

    fn presentation_schema(&self, _reduction: &ResultSchema) -> ResultSchema {
        ResultSchema::timestamp_value()
    }
}

#[derive(Debug)]
struct CountValuesAccumulator {
    counts: HashMap<u64, u64>,
}

impl AggAccumulator for CountValuesAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        for (bits, count) in decode_counts(row.get_blob(1)) {
            *self.counts.entry(bits).or_insert(0) += count;
        }
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        let mut pairs: Vec<(u64, u64)> = self.counts.iter().map(|(b, c)| (*b, *c)).collect();
        pairs.sort_unstable_by_key(|(bits, _)| *bits);
        let mut row = MutableRow::new(2);
        row.set_long(0, ts);
        row.set_blob(1, encode_counts(&pairs));
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduce_instant(
        agg: &CountValuesRowAggregator,
        values: &[f64],
        ts: i64,
    ) -> MutableRow {
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
    fn shortest_form_formatting() {
        assert_eq!(format_value(5.6), "5.6");
        assert_eq!(format_value(2.0), "2.0");
        assert_eq!(format_value(-0.5), "-0.5");
    }

    #[test]
    fn negative_zero_counts_with_zero() {
        let agg = CountValuesRowAggregator::new("value".to_owned());
        let reduced = reduce_instant(&agg, &[0.0, -0.0], 1000);
        let pairs: Vec<_> = decode_counts(reduced.get_blob(1)).collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1, 2);
    }

    #[test]
    fn present_fans_out_per_distinct_value() {
        let agg = CountValuesRowAggregator::new("freq".to_owned());
        let r1 = reduce_instant(&agg, &[1.5, 1.5, 2.0], 1000);
        let r2 = reduce_instant(&agg, &[2.0], 2000);
        let reduced = ListRangeVector::new(RangeVectorKey::empty(), None, vec![r1, r2]);
        let out = agg
            .present(&reduced, usize::MAX, &RangeParams::new(1, 1, 2))
            .unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(
            out[0].key(),
            &RangeVectorKey::from_pairs([("freq", "1.5")])
        );
        let rows: Vec<_> = out[0].rows().collect();
        assert_eq!(rows[0].get_double(1), 2.0);
        assert!(rows[1].get_double(1).is_nan());

        assert_eq!(
            out[1].key(),
            &RangeVectorKey::from_pairs([("freq", "2.0")])
        );
        let rows: Vec<_> = out[1].rows().collect();
        assert_eq!(rows[0].get_double(1), 1.0);
        assert_eq!(rows[1].get_double(1), 1.0);
    }

    #[test]
    fn nan_samples_contribute_nothing() {
        let agg = CountValuesRowAggregator::new("value".to_owned());
        let reduced = reduce_instant(&agg, &[f64::NAN, f64::NAN], 1000);
        assert_eq!(decode_counts(reduced.get_blob(1)).count(), 0);
    }
}
