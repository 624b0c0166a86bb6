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

//! Streaming two-phase grouped aggregation over range-vector streams.
//!
//! The map/reduce stream drains its source while folding every row into a
//! per-`(group, timestamp)` accumulator, then emits one range vector per
//! group whose rows are read lazily in ascending timestamp order. Reduction
//! is single-threaded within one stream, so per-group mutual exclusion is
//! structural; parallelism comes from running the map phase on many leaf
//! plans at once and reducing their outputs here.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use ahash::RandomState;
use futures::ready;
use futures::stream::{Stream, StreamExt};
use hashbrown::HashMap;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::exec::SendableRangeVectorStream;
use crate::query::RangeParams;
use crate::range_vector::{RangeVector, RangeVectorKey, RangeVectorRef, RowIter};
use crate::row::RowReader;

use super::{AggAccumulator, RowAggregator};

/// Derives the output group of one input range vector.
pub type GroupingFn = Arc<dyn Fn(&dyn RangeVector) -> RangeVectorKey + Send + Sync>;

/// Entry points for the two phases of grouped aggregation.
pub struct RangeVectorAggregator;

impl RangeVectorAggregator {
    /// Folds `source` into one range vector per group key.
    ///
    /// With `skip_map_phase` the input rows are taken to be intermediates
    /// already (the reduce side of a distributed aggregation); otherwise
    /// every row passes through `agg.map` first.
    pub fn map_reduce(
        agg: Arc<dyn RowAggregator>,
        skip_map_phase: bool,
        source: SendableRangeVectorStream,
        grouping: GroupingFn,
    ) -> SendableRangeVectorStream {
        Box::pin(GroupedAggregateStream {
            agg,
            skip_map_phase,
            grouping,
            input: source,
            group_index: HashMap::with_hasher(RandomState::new()),
            group_states: Vec::new(),
            exec_state: ExecutionState::ReadingInput,
            emit_idx: 0,
        })
    }

    /// Translates reduced groups into their user-visible form, flattening
    /// fan-out operators into multiple output vectors per group.
    pub fn present(
        agg: Arc<dyn RowAggregator>,
        source: SendableRangeVectorStream,
        limit: usize,
        range_params: RangeParams,
    ) -> SendableRangeVectorStream {
        Box::pin(
            source
                .map(move |input| {
                    let presented = input
                        .and_then(|rv| agg.present(rv.as_ref(), limit, &range_params));
                    let out: Vec<Result<RangeVectorRef>> = match presented {
                        Ok(rvs) => rvs.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    };
                    futures::stream::iter(out)
                })
                .flatten(),
        )
    }
}

/// Tracks what phase the aggregation is in.
enum ExecutionState {
    ReadingInput,
    ProducingOutput,
    Done,
}

type GroupAccumulators = BTreeMap<i64, Box<dyn AggAccumulator>>;

struct GroupedAggregateStream {
    agg: Arc<dyn RowAggregator>,
    skip_map_phase: bool,
    grouping: GroupingFn,
    input: SendableRangeVectorStream,
    /// Group key to position in `group_states`.
    group_index: HashMap<RangeVectorKey, usize, RandomState>,
    /// Emission follows first-seen group order.
    group_states: Vec<(RangeVectorKey, GroupAccumulators)>,
    exec_state: ExecutionState,
    emit_idx: usize,
}

impl GroupedAggregateStream {
    fn accumulate(&mut self, rv: &dyn RangeVector) -> Result<()> {
        let group = (self.grouping)(rv);
        let group_idx = match self.group_index.get(&group) {
            Some(idx) => *idx,
            None => {
                let idx = self.group_states.len();
                self.group_index.insert(group.clone(), idx);
                self.group_states.push((group, BTreeMap::new()));
                idx
            }
        };
        let agg = self.agg.clone();
        let accumulators = &mut self.group_states[group_idx].1;
        let mut mapped = agg.new_row_to_map_into();
        for row in rv.rows() {
            let ts = row.get_long(0);
            let acc = accumulators
                .entry(ts)
                .or_insert_with(|| agg.new_accumulator());
            if self.skip_map_phase {
                acc.add(&row)?;
            } else {
                agg.map(rv.key(), &row, &mut mapped);
                acc.add(&mapped)?;
            }
        }
        Ok(())
    }
}

impl Stream for GroupedAggregateStream {
    type Item = Result<RangeVectorRef>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.exec_state {
                ExecutionState::ReadingInput => match ready!(this.input.poll_next_unpin(cx)) {
                    // new range vector to fold in
                    Some(Ok(rv)) => {
                        if let Err(e) = this.accumulate(rv.as_ref()) {
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                    // inner had error, return to caller
                    Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                    // inner is done, start emitting groups
                    None => this.exec_state = ExecutionState::ProducingOutput,
                },

                ExecutionState::ProducingOutput => {
                    if this.emit_idx < this.group_states.len() {
                        let slot = &mut this.group_states[this.emit_idx];
                        let (key, accumulators) = std::mem::replace(
                            slot,
                            (RangeVectorKey::empty(), BTreeMap::new()),
                        );
                        this.emit_idx += 1;
                        return Poll::Ready(Some(Ok(Box::new(GroupedResultRangeVector {
                            key,
                            accumulators,
                        }))));
                    }
                    this.exec_state = ExecutionState::Done;
                }

                ExecutionState::Done => return Poll::Ready(None),
            }
        }
    }
}

/// One reduced group; rows are produced lazily from the accumulators in
/// ascending timestamp order.
struct GroupedResultRangeVector {
    key: RangeVectorKey,
    accumulators: GroupAccumulators,
}

impl RangeVector for GroupedResultRangeVector {
    fn key(&self) -> &RangeVectorKey {
        &self.key
    }

    fn rows(&self) -> RowIter<'_> {
        Box::new(
            self.accumulators
                .iter()
                .map(|(ts, acc)| acc.to_row(*ts)),
        )
    }
}
