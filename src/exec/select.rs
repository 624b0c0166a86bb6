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

//! The leaf plan: raw series selection from a chunk source.
//!
//! Chunked column storage and its part-key index live outside this crate;
//! the engine only needs something that yields labeled row streams for a
//! dataset. An in-memory source is provided for embedders' tests and for
//! the crate's own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use itertools::Itertools;

use crate::error::Result;
use crate::query::{QueryContext, QuerySession};
use crate::range_vector::{ListRangeVector, RangeVectorKey, RangeVectorRef};
use crate::schema::ResultSchema;

use super::{
    DatasetRef, ExecPlan, ExecResult, PlanDispatcher, RangeVectorTransformer,
    SendableRangeVectorStream,
};

/// A chunk source's answer: the raw stream and the schema of its rows.
pub struct ScanResult {
    pub stream: SendableRangeVectorStream,
    pub schema: ResultSchema,
}

/// Row-producing face of the column store.
#[async_trait]
pub trait ChunkSource: Send + Sync + fmt::Debug {
    async fn scan(&self, dataset: &DatasetRef, session: &QuerySession) -> Result<ScanResult>;
}

/// Label-equality filter applied to scanned series.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnFilter {
    pub label: String,
    pub value: String,
}

impl ColumnFilter {
    pub fn equals(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, key: &RangeVectorKey) -> bool {
        key.label_value(&self.label) == Some(self.value.as_str())
    }
}

impl fmt::Display for ColumnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.value)
    }
}

/// Leaf node scanning raw series of one dataset.
#[derive(Debug)]
pub struct SelectRawSeriesExec {
    query_context: QueryContext,
    dataset: DatasetRef,
    dispatcher: Arc<dyn PlanDispatcher>,
    filters: Vec<ColumnFilter>,
    transformers: Vec<Arc<dyn RangeVectorTransformer>>,
}

impl SelectRawSeriesExec {
    pub fn new(
        query_context: QueryContext,
        dataset: DatasetRef,
        dispatcher: Arc<dyn PlanDispatcher>,
        filters: Vec<ColumnFilter>,
    ) -> Self {
        Self {
            query_context,
            dataset,
            dispatcher,
            filters,
            transformers: Vec::new(),
        }
    }

    pub fn add_range_vector_transformer(&mut self, t: Arc<dyn RangeVectorTransformer>) {
        self.transformers.push(t);
    }
}

#[async_trait]
impl ExecPlan for SelectRawSeriesExec {
    fn query_context(&self) -> &QueryContext {
        &self.query_context
    }

    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    fn dispatcher(&self) -> Arc<dyn PlanDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    fn transformers(&self) -> &[Arc<dyn RangeVectorTransformer>] {
        &self.transformers
    }

    fn plan_name(&self) -> &'static str {
        "SelectRawSeriesExec"
    }

    fn args_string(&self) -> String {
        format!(
            "dataset={}, filters=[{}]",
            self.dataset,
            self.filters.iter().join(", ")
        )
    }

    async fn do_execute(
        &self,
        source: Arc<dyn ChunkSource>,
        session: &QuerySession,
    ) -> Result<ExecResult> {
        let scan = source.scan(&self.dataset, session).await?;
        let filters = self.filters.clone();
        let stats = session.stats.clone();
        let stream = scan
            .stream
            .filter(move |rv| {
                let keep = match rv {
                    Ok(rv) => filters.iter().all(|f| f.matches(rv.key())),
                    Err(_) => true,
                };
                if keep {
                    stats.add_series_scanned(1);
                }
                futures::future::ready(keep)
            })
            .boxed();
        Ok(ExecResult::with_schema(stream, scan.schema))
    }
}

/// A chunk source over fixed in-memory series, for tests and examples.
#[derive(Debug, Default)]
pub struct InMemoryChunkSource {
    series: Vec<ListRangeVector>,
    schema: ResultSchema,
}

impl InMemoryChunkSource {
    pub fn new(series: Vec<ListRangeVector>, schema: ResultSchema) -> Self {
        Self { series, schema }
    }

    /// Builds a `(timestamp, value)` source from plain samples.
    pub fn from_samples(
        series: Vec<(RangeVectorKey, Vec<(i64, f64)>)>,
    ) -> Self {
        Self::new(
            series
                .into_iter()
                .map(|(key, samples)| ListRangeVector::from_samples(key, None, samples))
                .collect(),
            ResultSchema::timestamp_value(),
        )
    }
}

#[async_trait]
impl ChunkSource for InMemoryChunkSource {
    async fn scan(&self, _dataset: &DatasetRef, _session: &QuerySession) -> Result<ScanResult> {
        let rvs: Vec<Result<RangeVectorRef>> = self
            .series
            .iter()
            .map(|rv| Ok(Box::new(rv.clone()) as RangeVectorRef))
            .collect();
        Ok(ScanResult {
            stream: Box::pin(futures::stream::iter(rvs)),
            schema: if self.series.is_empty() {
                ResultSchema::empty()
            } else {
                self.schema.clone()
            },
        })
    }
}
