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

//! The dedicated query scheduler.
//!
//! Query evaluation runs on its own runtime, separate from I/O executors, so
//! storage scans cannot starve plan execution. Worker threads carry a
//! recognizable name prefix; the execution pipeline checks it at its step
//! boundaries and logs when a query is being driven from a foreign runtime.

use std::thread;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{QueryError, Result};

/// Thread-name prefix of query-scheduler workers.
pub const QUERY_THREAD_PREFIX: &str = "query-sched";

/// A dedicated multi-threaded runtime for plan execution.
#[derive(Debug)]
pub struct QueryScheduler {
    runtime: Runtime,
}

impl QueryScheduler {
    pub fn new(worker_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(QUERY_THREAD_PREFIX)
            .enable_all()
            .build()
            .map_err(|e| QueryError::Internal(format!("failed to build query scheduler: {e}")))?;
        Ok(Self { runtime })
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    /// Runs a future to completion on this scheduler from a non-async
    /// caller.
    pub fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

/// Whether the current thread belongs to the query scheduler.
pub fn on_query_scheduler() -> bool {
    thread::current()
        .name()
        .is_some_and(|name| name.starts_with(QUERY_THREAD_PREFIX))
}

/// Step-boundary check. Embedders may drive plans from their own runtimes,
/// so an off-scheduler stage logs instead of failing the query.
pub(crate) fn check_query_scheduler(stage: &str) {
    if !on_query_scheduler() {
        log::debug!(
            "{stage} running off the query scheduler (thread {:?})",
            thread::current().name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_threads_carry_the_prefix() {
        let scheduler = QueryScheduler::new(2).unwrap();
        let on_sched = scheduler.block_on(async {
            tokio::task::spawn(async { on_query_scheduler() })
                .await
                .unwrap()
        });
        assert!(on_sched);
        assert!(!on_query_scheduler());
    }
}
