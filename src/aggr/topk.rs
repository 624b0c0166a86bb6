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

//! Bounded top-k / bottom-k selection under grouping.
//!
//! The intermediate row has `2k+1` columns: the timestamp followed by `k`
//! `(value, source key)` slots, ranked best-first. Unfilled slots hold the
//! sentinel (`-MAX` for topk, `+MAX` for bottomk) and an empty key string;
//! sentinels never escape `present`. A series that is NaN at an instant is
//! not a candidate there even if slots remain unfilled, so an all-NaN
//! instant presents as NaN in every emitted series.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::error::Result;
use crate::query::RangeParams;
use crate::range_vector::{
    ListRangeVector, RangeVector, RangeVectorKey, RangeVectorRef,
};
use crate::row::{MutableRow, RowReader};
use crate::schema::{ColumnInfo, ColumnType, ResultSchema};

use super::{AggAccumulator, RowAggregator};

#[derive(Debug)]
pub struct TopBottomKRowAggregator {
    k: usize,
    bottom: bool,
}

impl TopBottomKRowAggregator {
    pub fn top_k(k: usize) -> Self {
        Self { k, bottom: false }
    }

    pub fn bottom_k(k: usize) -> Self {
        Self { k, bottom: true }
    }

    fn sentinel(&self) -> f64 {
        if self.bottom {
            f64::MAX
        } else {
            -f64::MAX
        }
    }

    fn clear_slots(&self, out: &mut MutableRow, from: usize) {
        for i in from..self.k {
            out.set_double(1 + 2 * i, self.sentinel());
            out.set_string(2 + 2 * i, "");
        }
    }
}

impl RowAggregator for TopBottomKRowAggregator {
    fn new_row_to_map_into(&self) -> MutableRow {
        let mut row = MutableRow::new(1 + 2 * self.k);
        row.set_long(0, 0);
        self.clear_slots(&mut row, 0);
        row
    }

    fn map(&self, key: &RangeVectorKey, row: &dyn RowReader, out: &mut MutableRow) {
        let v = row.get_double(1);
        out.set_long(0, row.get_long(0));
        // the scratch row is reused, so every slot is rewritten
        if v.is_nan() {
            self.clear_slots(out, 0);
        } else {
            out.set_double(1, v);
            out.set_string(2, key.to_string());
            self.clear_slots(out, 1);
        }
    }

    fn reduction_schema(&self, _source: &ResultSchema) -> ResultSchema {
        let mut columns = Vec::with_capacity(1 + 2 * self.k);
        columns.push(ColumnInfo::new("timestamp", ColumnType::Timestamp));
        for i in 1..=self.k {
            columns.push(ColumnInfo::new(format!("value{i}"), ColumnType::Double));
            columns.push(ColumnInfo::new(format!("key{i}"), ColumnType::String));
        }
        ResultSchema::new(columns)
    }

    fn new_accumulator(&self) -> Box<dyn AggAccumulator> {
        Box::new(TopKAccumulator {
            k: self.k,
            bottom: self.bottom,
            sentinel: self.sentinel(),
            items: Vec::with_capacity(self.k),
        })
    }

    fn present(
        &self,
        rv: &dyn RangeVector,
        limit: usize,
        range_params: &RangeParams,
    ) -> Result<Vec<RangeVectorRef>> {
        // first-seen order of source keys keeps the fan-out deterministic
        let mut order: Vec<Arc<str>> = Vec::new();
        let mut by_key: HashMap<Arc<str>, BTreeMap<i64, f64>> = HashMap::new();
        for row in rv.rows() {
            let ts = row.get_long(0);
            for i in 0..self.k {
                let v = row.get_double(1 + 2 * i);
                let key = row.get_string(2 + 2 * i);
                if key.is_empty() || v.is_nan() || v == self.sentinel() {
                    continue;
                }
                let key: Arc<str> = Arc::from(key);
                by_key
                    .entry(key.clone())
                    .or_insert_with(|| {
                        order.push(key.clone());
                        BTreeMap::new()
                    })
                    .insert(ts, v);
            }
        }
        let grid = range_params.as_range_ms();
        Ok(order
            .into_iter()
            .take(limit)
            .map(|key_str| {
                let points = &by_key[&key_str];
                let rows = grid
                    .timestamps()
                    .map(|ts| {
                        MutableRow::timestamp_value(
                            ts,
                            points.get(&ts).copied().unwrap_or(f64::NAN),
                        )
                    })
                    .collect();
                Box::new(ListRangeVector::new(
                    RangeVectorKey::parse(&key_str),
                    Some(grid),
                    rows,
                )) as RangeVectorRef
            })
            .collect())
    }

    fn presentation_schema(&self, _reduction: &ResultSchema) -> ResultSchema {
        let mut schema = ResultSchema::timestamp_value();
        schema.fixed_vector_len = None;
        schema
    }
}

#[derive(Debug)]
struct TopKAccumulator {
    k: usize,
    bottom: bool,
    sentinel: f64,
    /// Ranked best-first; ties keep insertion order.
    items: Vec<(f64, Arc<str>)>,
}

impl AggAccumulator for TopKAccumulator {
    fn add(&mut self, row: &dyn RowReader) -> Result<()> {
        let mut changed = false;
        for i in 0..self.k {
            let v = row.get_double(1 + 2 * i);
            let key = row.get_string(2 + 2 * i);
            if key.is_empty() || v.is_nan() || v == self.sentinel {
                continue;
            }
            self.items.push((v, Arc::from(key)));
            changed = true;
        }
        if changed {
            // stable sort, so equal values keep their arrival order
            if self.bottom {
                self.items.sort_by(|a, b| a.0.total_cmp(&b.0));
            } else {
                self.items.sort_by(|a, b| b.0.total_cmp(&a.0));
            }
            self.items.truncate(self.k);
        }
        Ok(())
    }

    fn to_row(&self, ts: i64) -> MutableRow {
        let mut row = MutableRow::new(1 + 2 * self.k);
        row.set_long(0, ts);
        for i in 0..self.k {
            match self.items.get(i) {
                Some((v, key)) => {
                    row.set_double(1 + 2 * i, *v);
                    row.set_string(2 + 2 * i, key.clone());
                }
                None => {
                    row.set_double(1 + 2 * i, self.sentinel);
                    row.set_string(2 + 2 * i, "");
                }
            }
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::RowReader;

    fn series_key(name: &str) -> RangeVectorKey {
        RangeVectorKey::from_pairs([("instance", name)])
    }

    fn reduce_instant(
        agg: &TopBottomKRowAggregator,
        inputs: &[(&str, f64)],
        ts: i64,
    ) -> Box<dyn AggAccumulator> {
        let mut acc = agg.new_accumulator();
        let mut mapped = agg.new_row_to_map_into();
        for (name, v) in inputs {
            let row = MutableRow::timestamp_value(ts, *v);
            agg.map(&series_key(name), &row, &mut mapped);
            acc.add(&mapped).unwrap();
        }
        acc
    }

    #[test]
    fn bottomk_keeps_the_two_smallest() {
        let agg = TopBottomKRowAggregator::bottom_k(2);
        let acc = reduce_instant(
            &agg,
            &[("a", f64::NAN), ("b", 4.6), ("c", 2.1)],
            1000,
        );
        let row = acc.to_row(1000);
        assert_eq!(row.get_double(1), 2.1);
        assert_eq!(row.get_string(2), "instance=c");
        assert_eq!(row.get_double(3), 4.6);
        assert_eq!(row.get_string(4), "instance=b");
    }

    #[test]
    fn topk_fills_remaining_slots_with_sentinels() {
        let agg = TopBottomKRowAggregator::top_k(3);
        let acc = reduce_instant(&agg, &[("a", 9.0)], 1000);
        let row = acc.to_row(1000);
        assert_eq!(row.get_double(1), 9.0);
        assert_eq!(row.get_double(3), -f64::MAX);
        assert_eq!(row.get_string(4), "");
        assert_eq!(row.get_double(5), -f64::MAX);
    }

    #[test]
    fn nan_series_is_no_candidate_even_with_free_slots() {
        let agg = TopBottomKRowAggregator::top_k(2);
        let acc = reduce_instant(&agg, &[("a", f64::NAN), ("b", 1.0)], 1000);
        let row = acc.to_row(1000);
        assert_eq!(row.get_string(2), "instance=b");
        assert_eq!(row.get_string(4), "");
    }

    #[test]
    fn merging_partial_heaps_preserves_ranking() {
        let agg = TopBottomKRowAggregator::top_k(2);
        let left = reduce_instant(&agg, &[("a", 1.0), ("b", 5.0)], 1000);
        let right = reduce_instant(&agg, &[("c", 3.0), ("d", 8.0)], 1000);
        let mut merged = agg.new_accumulator();
        merged.add(&left.to_row(1000)).unwrap();
        merged.add(&right.to_row(1000)).unwrap();
        let row = merged.to_row(1000);
        assert_eq!(row.get_double(1), 8.0);
        assert_eq!(row.get_string(2), "instance=d");
        assert_eq!(row.get_double(3), 5.0);
        assert_eq!(row.get_string(4), "instance=b");
    }

    #[test]
    fn present_rekeys_and_fills_unselected_timestamps_with_nan() {
        let agg = TopBottomKRowAggregator::top_k(1);
        let acc1 = reduce_instant(&agg, &[("a", 1.0), ("b", 5.0)], 1000);
        let acc2 = reduce_instant(&agg, &[("a", 9.0), ("b", 5.0)], 2000);
        let reduced = ListRangeVector::new(
            RangeVectorKey::empty(),
            None,
            vec![acc1.to_row(1000), acc2.to_row(2000)],
        );
        let out = agg
            .present(&reduced, usize::MAX, &RangeParams::new(1, 1, 2))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].key(), &series_key("b"));
        let b_rows: Vec<_> = out[0].rows().collect();
        assert_eq!(b_rows[0].get_double(1), 5.0);
        assert!(b_rows[1].get_double(1).is_nan());
        assert_eq!(out[1].key(), &series_key("a"));
        let a_rows: Vec<_> = out[1].rows().collect();
        assert!(a_rows[0].get_double(1).is_nan());
        assert_eq!(a_rows[1].get_double(1), 9.0);
    }

    #[test]
    fn all_nan_instant_presents_as_nan_everywhere() {
        let agg = TopBottomKRowAggregator::top_k(1);
        let acc1 = reduce_instant(&agg, &[("a", 2.0)], 1000);
        let acc2 = reduce_instant(&agg, &[("a", f64::NAN)], 2000);
        let reduced = ListRangeVector::new(
            RangeVectorKey::empty(),
            None,
            vec![acc1.to_row(1000), acc2.to_row(2000)],
        );
        let out = agg
            .present(&reduced, usize::MAX, &RangeParams::new(1, 1, 2))
            .unwrap();
        assert_eq!(out.len(), 1);
        let rows: Vec<_> = out[0].rows().collect();
        assert_eq!(rows[0].get_double(1), 2.0);
        assert!(rows[1].get_double(1).is_nan());
    }
}
