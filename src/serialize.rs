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

//! Materialization of row streams into bounded byte payloads.
//!
//! A [`RecordBuilder`] encodes rows into a shared [`BytesMut`] backing
//! buffer; each materialized range vector freezes its slice into a cheap
//! reference-counted [`Bytes`] container, so one builder serves a whole
//! result without reallocating per vector. Decoding is positional against
//! the record schema, which makes a [`SerializedRangeVector`] a restartable
//! row cursor as well as the wire-ready result payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{QueryError, Result};
use crate::histogram::HistogramSample;
use crate::range_vector::{RangeVector, RangeVectorKey, RowIter, RvRange};
use crate::row::{MutableRow, RowReader};
use crate::schema::{ColumnType, ResultSchema};

/// Encodes rows of a fixed schema into per-vector byte containers.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    buf: BytesMut,
    bytes_written: usize,
    containers_built: usize,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes handed out across all containers built so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn containers_built(&self) -> usize {
        self.containers_built
    }

    fn encode_row(&mut self, schema: &ResultSchema, row: &dyn RowReader) -> Result<()> {
        for (i, col) in schema.columns.iter().enumerate() {
            match col.column_type {
                ColumnType::Timestamp => self.buf.put_i64_le(row.get_long(i)),
                ColumnType::Double => self.buf.put_f64_le(row.get_double(i)),
                ColumnType::String => {
                    let s = row.get_string(i);
                    if s.len() > u32::MAX as usize {
                        return Err(QueryError::Serialization(format!(
                            "string cell in column {i} exceeds u32 length"
                        )));
                    }
                    self.buf.put_u32_le(s.len() as u32);
                    self.buf.put_slice(s.as_bytes());
                }
                ColumnType::Histogram => {
                    let h = row.get_histogram(i);
                    self.buf.put_u16_le(h.num_buckets() as u16);
                    for top in h.bucket_tops() {
                        self.buf.put_f64_le(*top);
                    }
                    for v in h.values() {
                        self.buf.put_f64_le(*v);
                    }
                }
                ColumnType::Blob => {
                    let b = row.get_blob(i);
                    self.buf.put_u32_le(b.len() as u32);
                    self.buf.put_slice(b);
                }
            }
        }
        Ok(())
    }

    /// Freezes everything encoded since the previous call into one
    /// container. The backing allocation is reused for the next vector.
    fn finish_container(&mut self) -> Bytes {
        let data = self.buf.split().freeze();
        self.bytes_written += data.len();
        self.containers_built += 1;
        data
    }
}

/// A range vector materialized into a contiguous byte container.
#[derive(Clone, Debug)]
pub struct SerializedRangeVector {
    key: RangeVectorKey,
    range: Option<RvRange>,
    schema: ResultSchema,
    data: Bytes,
    num_rows: usize,
}

impl SerializedRangeVector {
    /// Drains `rv` through `builder`, encoding every row under
    /// `record_schema`. `plan_name` identifies the materializing plan in
    /// error reports.
    pub fn materialize(
        rv: &dyn RangeVector,
        builder: &mut RecordBuilder,
        record_schema: &ResultSchema,
        plan_name: &str,
    ) -> Result<Self> {
        let mut num_rows = 0;
        for row in rv.rows() {
            builder
                .encode_row(record_schema, &row)
                .map_err(|e| QueryError::Serialization(format!("{plan_name}: {e}")))?;
            num_rows += 1;
        }
        Ok(Self {
            key: rv.key().clone(),
            range: rv.output_range(),
            schema: record_schema.clone(),
            data: builder.finish_container(),
            num_rows,
        })
    }

    pub fn num_rows_serialized(&self) -> usize {
        self.num_rows
    }

    /// Size of this vector's byte container.
    pub fn data_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn record_schema(&self) -> &ResultSchema {
        &self.schema
    }
}

impl RangeVector for SerializedRangeVector {
    fn key(&self) -> &RangeVectorKey {
        &self.key
    }

    fn output_range(&self) -> Option<RvRange> {
        self.range
    }

    fn rows(&self) -> RowIter<'_> {
        Box::new(RecordIter {
            data: &self.data,
            schema: &self.schema,
            remaining: self.num_rows,
        })
    }
}

struct RecordIter<'a> {
    data: &'a [u8],
    schema: &'a ResultSchema,
    remaining: usize,
}

impl Iterator for RecordIter<'_> {
    type Item = MutableRow;

    fn next(&mut self) -> Option<MutableRow> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let mut row = MutableRow::new(self.schema.columns.len());
        for (i, col) in self.schema.columns.iter().enumerate() {
            match col.column_type {
                ColumnType::Timestamp => row.set_long(i, self.data.get_i64_le()),
                ColumnType::Double => row.set_double(i, self.data.get_f64_le()),
                ColumnType::String => {
                    let len = self.data.get_u32_le() as usize;
                    let s = std::str::from_utf8(&self.data[..len])
                        .expect("serialized string cell is valid utf8");
                    row.set_string(i, s);
                    self.data.advance(len);
                }
                ColumnType::Histogram => {
                    let n = self.data.get_u16_le() as usize;
                    let mut tops = Vec::with_capacity(n);
                    for _ in 0..n {
                        tops.push(self.data.get_f64_le());
                    }
                    let mut values = Vec::with_capacity(n);
                    for _ in 0..n {
                        values.push(self.data.get_f64_le());
                    }
                    row.set_histogram(i, HistogramSample::new(tops.into(), values));
                }
                ColumnType::Blob => {
                    let len = self.data.get_u32_le() as usize;
                    row.set_blob(i, Bytes::copy_from_slice(&self.data[..len]));
                    self.data.advance(len);
                }
            }
        }
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_vector::ListRangeVector;
    use crate::schema::ColumnInfo;

    fn key(name: &str) -> RangeVectorKey {
        RangeVectorKey::from_pairs([("job", name)])
    }

    #[test]
    fn round_trips_timestamp_value_rows() {
        let rv = ListRangeVector::from_samples(
            key("api"),
            None,
            vec![(1000, 1.5), (2000, f64::NAN), (3000, 2.5)],
        );
        let mut builder = RecordBuilder::new();
        let srv = SerializedRangeVector::materialize(
            &rv,
            &mut builder,
            &ResultSchema::timestamp_value(),
            "TestExec",
        )
        .unwrap();
        assert_eq!(srv.num_rows_serialized(), 3);
        assert_eq!(srv.data_bytes(), 3 * 16);
        let rows: Vec<_> = srv.rows().collect();
        assert_eq!(rows[0].get_long(0), 1000);
        assert!(rows[1].get_double(1).is_nan());
        assert_eq!(rows[2].get_double(1), 2.5);
        // restartable cursor
        assert_eq!(srv.rows().count(), 3);
    }

    #[test]
    fn builder_is_reusable_across_vectors() {
        let mut builder = RecordBuilder::new();
        let schema = ResultSchema::timestamp_value();
        for i in 0..3 {
            let rv = ListRangeVector::from_samples(key("api"), None, vec![(i, i as f64)]);
            let srv =
                SerializedRangeVector::materialize(&rv, &mut builder, &schema, "TestExec")
                    .unwrap();
            assert_eq!(srv.num_rows_serialized(), 1);
        }
        assert_eq!(builder.containers_built(), 3);
        assert_eq!(builder.bytes_written(), 3 * 16);
    }

    #[test]
    fn round_trips_string_and_blob_cells() {
        let schema = ResultSchema::new(vec![
            ColumnInfo::new("timestamp", ColumnType::Timestamp),
            ColumnInfo::new("value", ColumnType::Double),
            ColumnInfo::new("label", ColumnType::String),
            ColumnInfo::new("state", ColumnType::Blob),
        ]);
        let mut row = MutableRow::new(4);
        row.set_long(0, 42);
        row.set_double(1, 9.5);
        row.set_string(2, "job=api");
        row.set_blob(3, Bytes::from_static(b"\x01\x02\x03"));
        let rv = ListRangeVector::new(key("api"), None, vec![row]);

        let mut builder = RecordBuilder::new();
        let srv =
            SerializedRangeVector::materialize(&rv, &mut builder, &schema, "TestExec").unwrap();
        let decoded = srv.rows().next().unwrap();
        assert_eq!(decoded.get_string(2), "job=api");
        assert_eq!(decoded.get_blob(3), b"\x01\x02\x03");
    }

    #[test]
    fn round_trips_histograms() {
        let schema = ResultSchema::timestamp_histogram();
        let hist = HistogramSample::new(vec![1.0, 2.0, 4.0].into(), vec![1.0, 5.0, 7.0]);
        let mut row = MutableRow::new(2);
        row.set_long(0, 1000);
        row.set_histogram(1, hist.clone());
        let rv = ListRangeVector::new(key("api"), None, vec![row]);

        let mut builder = RecordBuilder::new();
        let srv =
            SerializedRangeVector::materialize(&rv, &mut builder, &schema, "TestExec").unwrap();
        let decoded = srv.rows().next().unwrap();
        assert_eq!(decoded.get_histogram(1), &hist);
    }
}
