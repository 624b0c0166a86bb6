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

//! Sample rows and their positional readers.
//!
//! A row is a tuple addressed by column position; column 0 is always a
//! millisecond timestamp. Aggregator intermediates travel as rows too, so
//! the cell set is wider than what result consumers ever see: `Blob` cells
//! carry opaque operator state (digests, value/count payloads) between the
//! reduce and present phases and never survive into a presentation schema.

use std::sync::Arc;

use bytes::Bytes;

use crate::histogram::HistogramSample;

/// One value slot of a row.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Long(i64),
    Double(f64),
    Str(Arc<str>),
    Hist(HistogramSample),
    Blob(Bytes),
}

/// Positional read access to one sample row.
///
/// Accessors are typed by position; reading a column with the wrong accessor
/// is a programming error and panics.
pub trait RowReader: Send {
    fn num_cols(&self) -> usize;

    fn get_long(&self, col: usize) -> i64 {
        panic!("column {col} does not hold a long")
    }

    fn get_double(&self, col: usize) -> f64 {
        panic!("column {col} does not hold a double")
    }

    fn get_string(&self, col: usize) -> &str {
        panic!("column {col} does not hold a string")
    }

    fn get_histogram(&self, col: usize) -> &HistogramSample {
        panic!("column {col} does not hold a histogram")
    }

    fn get_blob(&self, col: usize) -> &[u8] {
        panic!("column {col} does not hold a blob")
    }

    /// The row timestamp in milliseconds, read from column 0.
    fn timestamp(&self) -> i64 {
        self.get_long(0)
    }
}

/// A growable row of typed cells, used for aggregator intermediates and for
/// materialized output rows.
///
/// New rows start with every cell set to `Double(NaN)` so that an operator
/// which skips a slot still produces the engine-wide representation of an
/// absent sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutableRow {
    cells: Vec<Cell>,
}

impl MutableRow {
    pub fn new(num_cols: usize) -> Self {
        Self {
            cells: vec![Cell::Double(f64::NAN); num_cols],
        }
    }

    /// Shorthand for the ubiquitous `(timestamp, value)` row.
    pub fn timestamp_value(ts: i64, value: f64) -> Self {
        let mut row = Self::new(2);
        row.set_long(0, ts);
        row.set_double(1, value);
        row
    }

    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn set_long(&mut self, col: usize, value: i64) {
        self.cells[col] = Cell::Long(value);
    }

    pub fn set_double(&mut self, col: usize, value: f64) {
        self.cells[col] = Cell::Double(value);
    }

    pub fn set_string(&mut self, col: usize, value: impl Into<Arc<str>>) {
        self.cells[col] = Cell::Str(value.into());
    }

    pub fn set_histogram(&mut self, col: usize, value: HistogramSample) {
        self.cells[col] = Cell::Hist(value);
    }

    pub fn set_blob(&mut self, col: usize, value: Bytes) {
        self.cells[col] = Cell::Blob(value);
    }
}

impl RowReader for MutableRow {
    fn num_cols(&self) -> usize {
        self.cells.len()
    }

    fn get_long(&self, col: usize) -> i64 {
        match &self.cells[col] {
            Cell::Long(v) => *v,
            other => panic!("column {col} holds {other:?}, not a long"),
        }
    }

    fn get_double(&self, col: usize) -> f64 {
        match &self.cells[col] {
            Cell::Double(v) => *v,
            other => panic!("column {col} holds {other:?}, not a double"),
        }
    }

    fn get_string(&self, col: usize) -> &str {
        match &self.cells[col] {
            Cell::Str(v) => v,
            other => panic!("column {col} holds {other:?}, not a string"),
        }
    }

    fn get_histogram(&self, col: usize) -> &HistogramSample {
        match &self.cells[col] {
            Cell::Hist(v) => v,
            other => panic!("column {col} holds {other:?}, not a histogram"),
        }
    }

    fn get_blob(&self, col: usize) -> &[u8] {
        match &self.cells[col] {
            Cell::Blob(v) => v,
            other => panic!("column {col} holds {other:?}, not a blob"),
        }
    }
}

/// A mutable two-column `(timestamp, value)` row intended for single-shot
/// use inside row cursors; callers overwrite it in place between reads.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransientRow {
    pub timestamp: i64,
    pub value: f64,
}

impl TransientRow {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn set_values(&mut self, timestamp: i64, value: f64) {
        self.timestamp = timestamp;
        self.value = value;
    }
}

impl RowReader for TransientRow {
    fn num_cols(&self) -> usize {
        2
    }

    fn get_long(&self, col: usize) -> i64 {
        match col {
            0 => self.timestamp,
            _ => panic!("column {col} does not hold a long"),
        }
    }

    fn get_double(&self, col: usize) -> f64 {
        match col {
            1 => self.value,
            _ => panic!("column {col} does not hold a double"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutable_row_starts_as_nan() {
        let row = MutableRow::new(3);
        assert!(row.get_double(1).is_nan());
        assert!(row.get_double(2).is_nan());
    }

    #[test]
    fn timestamp_value_round_trip() {
        let row = MutableRow::timestamp_value(1000, 5.5);
        assert_eq!(row.timestamp(), 1000);
        assert_eq!(row.get_double(1), 5.5);
    }

    #[test]
    fn transient_row_overwrites_in_place() {
        let mut row = TransientRow::new(1000, 1.0);
        row.set_values(2000, 2.0);
        assert_eq!(row.get_long(0), 2000);
        assert_eq!(row.get_double(1), 2.0);
    }

    #[test]
    #[should_panic(expected = "not a long")]
    fn typed_accessor_mismatch_panics() {
        let row = MutableRow::timestamp_value(1000, 5.5);
        row.get_long(1);
    }
}
