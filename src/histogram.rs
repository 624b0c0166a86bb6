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

//! Bucketed histogram samples.
//!
//! A histogram sample is tagged with its bucket schema (the ordered upper
//! bounds of its buckets). Two samples are additively combinable only when
//! their bucket schemas match; adding mismatched samples yields an all-NaN
//! histogram instead of an error, and downstream aggregation skips NaN
//! bucket values the same way it skips NaN scalars.

use std::sync::Arc;

/// One histogram sample: cumulative bucket values under a shared schema of
/// bucket upper bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSample {
    bucket_tops: Arc<[f64]>,
    values: Vec<f64>,
}

impl HistogramSample {
    /// Builds a sample; `values` must be one per bucket top.
    pub fn new(bucket_tops: Arc<[f64]>, values: Vec<f64>) -> Self {
        assert_eq!(
            bucket_tops.len(),
            values.len(),
            "histogram values must match bucket schema"
        );
        Self {
            bucket_tops,
            values,
        }
    }

    /// A histogram with no buckets, the identity for summation.
    pub fn empty() -> Self {
        Self {
            bucket_tops: Arc::from([]),
            values: Vec::new(),
        }
    }

    pub fn num_buckets(&self) -> usize {
        self.values.len()
    }

    pub fn bucket_tops(&self) -> &[f64] {
        &self.bucket_tops
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn same_bucket_schema(&self, other: &HistogramSample) -> bool {
        self.bucket_tops == other.bucket_tops
    }

    /// Adds `other` bucket-wise in place, with the scalar NaN discipline per
    /// bucket. A bucket-schema mismatch turns every bucket value of `self`
    /// into NaN.
    pub fn add(&mut self, other: &HistogramSample) {
        if self.num_buckets() == 0 {
            *self = other.clone();
            return;
        }
        if other.num_buckets() == 0 {
            return;
        }
        if !self.same_bucket_schema(other) {
            for v in &mut self.values {
                *v = f64::NAN;
            }
            return;
        }
        for (v, o) in self.values.iter_mut().zip(other.values.iter()) {
            if o.is_nan() {
                continue;
            }
            if v.is_nan() {
                *v = *o;
            } else {
                *v += *o;
            }
        }
    }

    pub fn is_all_nan(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.is_nan())
    }
}
