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

//! Result schemas and their reduction across child plans.
//!
//! Every stage of the pipeline announces the shape of the rows it produces
//! as a [`ResultSchema`]. Non-leaf plans must unify the schemas returned by
//! their children before composing row streams; reduction is associative and
//! the empty schema is its identity, so children may be reduced in any order.

use crate::error::{QueryError, Result};

/// The type of one result column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// Millisecond timestamp, always column 0.
    Timestamp,
    Double,
    Histogram,
    String,
    /// Opaque operator state. Only valid in reduction schemas.
    Blob,
}

/// Name and type of one result column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column layout of a query result or of an operator intermediate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResultSchema {
    pub columns: Vec<ColumnInfo>,
    /// Known per-vector row count, when every range vector in the result
    /// spans the same fixed grid.
    pub fixed_vector_len: Option<usize>,
}

impl ResultSchema {
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        Self {
            columns,
            fixed_vector_len: None,
        }
    }

    /// The identity element of schema reduction.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The common `(timestamp, value)` sample layout.
    pub fn timestamp_value() -> Self {
        Self::new(vec![
            ColumnInfo::new("timestamp", ColumnType::Timestamp),
            ColumnInfo::new("value", ColumnType::Double),
        ])
    }

    /// The `(timestamp, histogram)` sample layout.
    pub fn timestamp_histogram() -> Self {
        Self::new(vec![
            ColumnInfo::new("timestamp", ColumnType::Timestamp),
            ColumnInfo::new("h", ColumnType::Histogram),
        ])
    }

    /// The type of the value column consumed by aggregators, column 1.
    pub fn value_column_type(&self) -> Option<ColumnType> {
        self.columns.get(1).map(|c| c.column_type)
    }

    pub fn same_column_types(&self, other: &ResultSchema) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.column_type == b.column_type)
    }
}

/// Strategy for unifying the result schemas of sibling child plans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaReducer {
    /// First non-empty schema wins; every later non-empty schema must be
    /// identical to it.
    #[default]
    Default,
    /// Children are shards of one logical result: only column types must
    /// agree, and `fixed_vector_len` is summed across shards.
    IgnoreFixedVectorLenAndColumnNames,
}

impl SchemaReducer {
    /// Folds `next` into the running schema `acc`. Empty schemas are
    /// identities on either side.
    pub fn reduce(&self, acc: ResultSchema, next: &ResultSchema) -> Result<ResultSchema> {
        if acc.is_empty() {
            return Ok(next.clone());
        }
        if next.is_empty() {
            return Ok(acc);
        }
        match self {
            SchemaReducer::Default => {
                if acc == *next {
                    Ok(acc)
                } else {
                    Err(QueryError::SchemaMismatch(format!(
                        "child plans returned incompatible schemas: {acc:?} vs {next:?}"
                    )))
                }
            }
            SchemaReducer::IgnoreFixedVectorLenAndColumnNames => {
                if acc.same_column_types(next) {
                    let fixed_vector_len = match (acc.fixed_vector_len, next.fixed_vector_len) {
                        (Some(a), Some(b)) => Some(a + b),
                        _ => None,
                    };
                    Ok(ResultSchema {
                        columns: acc.columns,
                        fixed_vector_len,
                    })
                } else {
                    Err(QueryError::SchemaMismatch(format!(
                        "child plans returned incompatible column types: {:?} vs {:?}",
                        acc.columns, next.columns
                    )))
                }
            }
        }
    }
}
