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

//! Merging t-digest for streaming quantile estimation.
//!
//! The digest keeps a bounded set of weighted centroids ordered by mean.
//! Centroid widths follow the classic `4·n·q·(1-q)/δ` size bound, so the
//! sketch is finest near the tails. Digests serialize to a compact byte
//! payload so they can travel between plan layers as row blobs and merge
//! losslessly at the reducing node.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{QueryError, Result};

/// Compression used by the quantile aggregation; roughly bounds the centroid
/// count and therefore the approximation error.
pub const DEFAULT_COMPRESSION: f64 = 100.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Centroid {
    mean: f64,
    weight: f64,
}

/// A mergeable quantile sketch.
#[derive(Clone, Debug, PartialEq)]
pub struct TDigest {
    compression: f64,
    /// Sorted by mean.
    centroids: Vec<Centroid>,
    count: f64,
    min: f64,
    max: f64,
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION)
    }
}

impl TDigest {
    pub fn new(compression: f64) -> Self {
        Self {
            compression: compression.max(10.0),
            centroids: Vec::new(),
            count: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0.0
    }

    /// Adds one observation. NaN observations are ignored.
    pub fn add(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }
        let at = self
            .centroids
            .partition_point(|c| c.mean < value);
        self.centroids.insert(
            at,
            Centroid {
                mean: value,
                weight: 1.0,
            },
        );
        self.count += 1.0;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        if self.centroids.len() > (4.0 * self.compression) as usize {
            self.compress();
        }
    }

    /// Merges another digest into this one.
    pub fn merge(&mut self, other: &TDigest) {
        if other.is_empty() {
            return;
        }
        self.centroids.extend_from_slice(&other.centroids);
        self.centroids
            .sort_by(|a, b| a.mean.total_cmp(&b.mean));
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.compress();
    }

    /// Collapses adjacent centroids while each stays under its size bound.
    /// Requires `centroids` sorted by mean; keeps them sorted.
    fn compress(&mut self) {
        if self.centroids.len() <= 1 {
            return;
        }
        let total = self.count;
        let mut out: Vec<Centroid> = Vec::with_capacity(self.centroids.len());
        let mut cur = self.centroids[0];
        let mut cum = 0.0;
        for &next in &self.centroids[1..] {
            let proposed = cur.weight + next.weight;
            let q = (cum + proposed * 0.5) / total;
            let limit = (4.0 * total * q * (1.0 - q) / self.compression).max(1.0);
            if proposed <= limit {
                let merged_weight = cur.weight + next.weight;
                cur = Centroid {
                    mean: (cur.mean * cur.weight + next.mean * next.weight) / merged_weight,
                    weight: merged_weight,
                };
            } else {
                cum += cur.weight;
                out.push(cur);
                cur = next;
            }
        }
        out.push(cur);
        self.centroids = out;
    }

    /// Estimates the `q`-quantile by interpolating between centroid
    /// midpoints. Returns NaN on an empty digest.
    pub fn quantile(&self, q: f64) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        if q <= 0.0 {
            return self.min;
        }
        if q >= 1.0 {
            return self.max;
        }
        let target = q * self.count;
        let mut cum = 0.0;
        let mut prev_mean = self.min;
        let mut prev_cum = 0.0;
        for c in &self.centroids {
            let mid = cum + c.weight * 0.5;
            if target < mid {
                if mid <= prev_cum {
                    return c.mean;
                }
                let t = (target - prev_cum) / (mid - prev_cum);
                return prev_mean + t * (c.mean - prev_mean);
            }
            prev_mean = c.mean;
            prev_cum = mid;
            cum += c.weight;
        }
        if self.count <= prev_cum {
            return self.max;
        }
        let t = (target - prev_cum) / (self.count - prev_cum);
        prev_mean + t * (self.max - prev_mean)
    }

    /// Serializes into the blob layout used by quantile intermediate rows.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 * 3 + 4 + self.centroids.len() * 16);
        buf.put_f64_le(self.compression);
        buf.put_f64_le(self.min);
        buf.put_f64_le(self.max);
        buf.put_u32_le(self.centroids.len() as u32);
        for c in &self.centroids {
            buf.put_f64_le(c.mean);
            buf.put_f64_le(c.weight);
        }
        buf.freeze()
    }

    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        if data.len() < 28 {
            return Err(QueryError::Serialization(format!(
                "t-digest payload too short: {} bytes",
                data.len()
            )));
        }
        let compression = data.get_f64_le();
        let min = data.get_f64_le();
        let max = data.get_f64_le();
        let n = data.get_u32_le() as usize;
        if data.len() < n * 16 {
            return Err(QueryError::Serialization(format!(
                "t-digest payload truncated: {n} centroids missing"
            )));
        }
        let mut centroids = Vec::with_capacity(n);
        let mut count = 0.0;
        for _ in 0..n {
            let mean = data.get_f64_le();
            let weight = data.get_f64_le();
            count += weight;
            centroids.push(Centroid { mean, weight });
        }
        Ok(Self {
            compression,
            centroids,
            count,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn empty_digest_yields_nan() {
        let d = TDigest::default();
        assert!(d.quantile(0.5).is_nan());
    }

    #[test]
    fn small_digest_is_exact_at_extremes() {
        let mut d = TDigest::default();
        for v in [1.0, 2.0, 3.0] {
            d.add(v);
        }
        assert_eq!(d.quantile(0.0), 1.0);
        assert_eq!(d.quantile(1.0), 3.0);
        assert_eq!(d.quantile(0.5), 2.0);
    }

    #[test]
    fn nan_observations_are_ignored() {
        let mut d = TDigest::default();
        d.add(f64::NAN);
        assert!(d.is_empty());
        d.add(7.0);
        assert_eq!(d.count(), 1.0);
        assert_eq!(d.quantile(0.5), 7.0);
    }

    #[test]
    fn uniform_median_within_tolerance() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut d = TDigest::default();
        for _ in 0..5000 {
            d.add(rng.gen_range(0.0..1000.0));
        }
        let median = d.quantile(0.5);
        assert!((median - 500.0).abs() < 30.0, "median {median}");
        let p90 = d.quantile(0.9);
        assert!((p90 - 900.0).abs() < 30.0, "p90 {p90}");
    }

    #[test]
    fn merge_matches_single_digest_approximately() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<f64> = (0..4000).map(|_| rng.gen_range(0.0..100.0)).collect();
        let mut whole = TDigest::default();
        let mut left = TDigest::default();
        let mut right = TDigest::default();
        for (i, v) in values.iter().enumerate() {
            whole.add(*v);
            if i % 2 == 0 {
                left.add(*v);
            } else {
                right.add(*v);
            }
        }
        left.merge(&right);
        assert_eq!(left.count(), whole.count());
        for q in [0.1, 0.5, 0.99] {
            let a = whole.quantile(q);
            let b = left.quantile(q);
            assert!((a - b).abs() < 5.0, "q={q}: {a} vs {b}");
        }
    }

    #[test]
    fn byte_round_trip_preserves_quantiles() {
        let mut d = TDigest::default();
        for v in 0..1000 {
            d.add(v as f64);
        }
        let restored = TDigest::from_bytes(&d.to_bytes()).unwrap();
        assert_eq!(restored.count(), d.count());
        assert_eq!(restored.quantile(0.5), d.quantile(0.5));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = TDigest::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, QueryError::Serialization(_)));
    }
}
