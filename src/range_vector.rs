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

//! Range vectors: one labeled series of timestamped rows per query window.
//!
//! Keys are canonicalized sorted label pairs, so hashing and equality are a
//! single pass with no per-lookup allocation. Row cursors yield rows in
//! ascending timestamp order; every range vector in one result shares the
//! same step grid, and absent samples surface as NaN rows rather than gaps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::row::MutableRow;

/// Boxed range vector flowing through plan streams.
pub type RangeVectorRef = Box<dyn RangeVector>;

/// Row cursor over one range vector.
pub type RowIter<'a> = Box<dyn Iterator<Item = MutableRow> + Send + 'a>;

/// The fixed output grid of a result: inclusive `[start, end]` with `step`
/// spacing, all in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RvRange {
    pub start_ms: i64,
    pub step_ms: i64,
    pub end_ms: i64,
}

impl RvRange {
    pub fn timestamps(&self) -> impl Iterator<Item = i64> {
        let step = self.step_ms.max(1);
        let end = self.end_ms;
        std::iter::successors(Some(self.start_ms), move |t| {
            let next = t + step;
            (next <= end).then_some(next)
        })
    }

    pub fn num_steps(&self) -> usize {
        if self.end_ms < self.start_ms {
            0
        } else {
            ((self.end_ms - self.start_ms) / self.step_ms.max(1)) as usize + 1
        }
    }
}

/// Immutable label set identifying one range vector.
///
/// Pairs are kept sorted by label name, which makes equality, hashing and
/// grouping order-insensitive in the inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeVectorKey {
    labels: Vec<(Arc<str>, Arc<str>)>,
}

impl RangeVectorKey {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<Arc<str>>,
        V: Into<Arc<str>>,
    {
        let mut labels: Vec<(Arc<str>, Arc<str>)> = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), v.into()))
            .collect();
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        labels.dedup_by(|a, b| a.0 == b.0);
        Self { labels }
    }

    pub fn labels(&self) -> &[(Arc<str>, Arc<str>)] {
        &self.labels
    }

    pub fn label_value(&self, name: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|(n, _)| n.as_ref().cmp(name))
            .ok()
            .map(|i| self.labels[i].1.as_ref())
    }

    /// Projection keeping only the named labels, for `by (...)` grouping.
    pub fn retain_labels(&self, names: &[String]) -> Self {
        Self {
            labels: self
                .labels
                .iter()
                .filter(|(n, _)| names.iter().any(|want| want == n.as_ref()))
                .cloned()
                .collect(),
        }
    }

    /// Projection dropping the named labels, for `without (...)` grouping.
    pub fn without_labels(&self, names: &[String]) -> Self {
        Self {
            labels: self
                .labels
                .iter()
                .filter(|(n, _)| !names.iter().any(|drop| drop == n.as_ref()))
                .cloned()
                .collect(),
        }
    }

    /// Parses the `Display` form back into a key. The inverse of formatting
    /// as long as label names and values avoid `,` and `=`.
    pub fn parse(s: &str) -> Self {
        Self::from_pairs(s.split(',').filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_owned(), value.to_owned()))
        }))
    }

    /// Approximate in-memory footprint, used for result-size accounting.
    pub fn size_bytes(&self) -> usize {
        self.labels
            .iter()
            .map(|(n, v)| n.len() + v.len() + 2)
            .sum()
    }
}

impl fmt::Display for RangeVectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.labels
                .iter()
                .map(|(n, v)| format!("{n}={v}"))
                .join(",")
        )
    }
}

/// One labeled series of timestamped rows.
pub trait RangeVector: Send + Sync {
    fn key(&self) -> &RangeVectorKey;

    /// The output grid this vector is aligned to, when known.
    fn output_range(&self) -> Option<RvRange> {
        None
    }

    /// A fresh cursor over the rows in ascending timestamp order.
    fn rows(&self) -> RowIter<'_>;
}

/// A fully materialized range vector backed by a row list. Restartable.
#[derive(Clone, Debug)]
pub struct ListRangeVector {
    key: RangeVectorKey,
    range: Option<RvRange>,
    rows: Vec<MutableRow>,
}

impl ListRangeVector {
    pub fn new(key: RangeVectorKey, range: Option<RvRange>, rows: Vec<MutableRow>) -> Self {
        Self { key, range, rows }
    }

    /// Convenience constructor from `(timestamp, value)` samples.
    pub fn from_samples(
        key: RangeVectorKey,
        range: Option<RvRange>,
        samples: impl IntoIterator<Item = (i64, f64)>,
    ) -> Self {
        Self::new(
            key,
            range,
            samples
                .into_iter()
                .map(|(ts, v)| MutableRow::timestamp_value(ts, v))
                .collect(),
        )
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl RangeVector for ListRangeVector {
    fn key(&self) -> &RangeVectorKey {
        &self.key
    }

    fn output_range(&self) -> Option<RvRange> {
        self.range
    }

    fn rows(&self) -> RowIter<'_> {
        Box::new(self.rows.iter().cloned())
    }
}

/// A scalar parameter materialized as a range vector over the query grid.
///
/// Produced by parameter sub-plans; consumers read `value_at` rather than
/// scanning rows.
#[derive(Clone, Debug)]
pub enum ScalarRangeVector {
    Fixed {
        range: RvRange,
        value: f64,
    },
    Varying {
        range: RvRange,
        values: BTreeMap<i64, f64>,
    },
}

impl ScalarRangeVector {
    pub fn fixed(range: RvRange, value: f64) -> Self {
        Self::Fixed { range, value }
    }

    pub fn varying(range: RvRange, values: BTreeMap<i64, f64>) -> Self {
        Self::Varying { range, values }
    }

    pub fn value_at(&self, ts: i64) -> f64 {
        match self {
            Self::Fixed { value, .. } => *value,
            Self::Varying { values, .. } => values.get(&ts).copied().unwrap_or(f64::NAN),
        }
    }

    /// The value at the start of the grid; aggregation parameters must be
    /// constant over the query window.
    pub fn single_value(&self) -> f64 {
        match self {
            Self::Fixed { value, .. } => *value,
            Self::Varying { range, values } => values
                .get(&range.start_ms)
                .or_else(|| values.values().next())
                .copied()
                .unwrap_or(f64::NAN),
        }
    }

    fn range(&self) -> RvRange {
        match self {
            Self::Fixed { range, .. } | Self::Varying { range, .. } => *range,
        }
    }
}

impl RangeVector for ScalarRangeVector {
    fn key(&self) -> &RangeVectorKey {
        static EMPTY: RangeVectorKey = RangeVectorKey { labels: Vec::new() };
        &EMPTY
    }

    fn output_range(&self) -> Option<RvRange> {
        Some(self.range())
    }

    fn rows(&self) -> RowIter<'_> {
        let range = self.range();
        Box::new(
            range
                .timestamps()
                .map(move |ts| MutableRow::timestamp_value(ts, self.value_at(ts)))
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }
}
