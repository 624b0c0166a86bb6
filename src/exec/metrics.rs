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

//! Execution metrics keyed by plan name.
//!
//! Counters and timers are cheap shared atomics; recording is
//! fire-and-forget and never fails a query. An external sink can snapshot
//! the registry on its own schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

/// A cumulative count, shared by cloning.
#[derive(Clone, Debug, Default)]
pub struct Count {
    value: Arc<AtomicU64>,
}

impl Count {
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Accumulated wall-clock nanoseconds, shared by cloning.
#[derive(Clone, Debug, Default)]
pub struct Time {
    nanos: Arc<AtomicU64>,
}

impl Time {
    pub fn add_elapsed(&self, since: Instant) {
        self.nanos
            .fetch_add(since.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn nanos(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }
}

/// The metric set of one plan class.
#[derive(Clone, Debug, Default)]
pub struct ExecPlanMetrics {
    pub execute_time: Time,
    pub rows_serialized: Count,
    pub queries_failed: Count,
}

/// Process-wide registry of per-plan metric sets.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    plans: Mutex<HashMap<&'static str, ExecPlanMetrics>>,
}

impl MetricsRegistry {
    pub fn global() -> &'static MetricsRegistry {
        static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();
        REGISTRY.get_or_init(MetricsRegistry::default)
    }

    pub fn for_plan(&self, plan_name: &'static str) -> ExecPlanMetrics {
        self.plans.lock().entry(plan_name).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_sets_are_shared_per_plan_name() {
        let registry = MetricsRegistry::default();
        let a = registry.for_plan("SomeExec");
        let b = registry.for_plan("SomeExec");
        a.rows_serialized.add(3);
        assert_eq!(b.rows_serialized.value(), 3);
        let other = registry.for_plan("OtherExec");
        assert_eq!(other.rows_serialized.value(), 0);
    }

    #[test]
    fn time_accumulates() {
        let time = Time::default();
        time.add_elapsed(Instant::now());
        let first = time.nanos();
        time.add_elapsed(Instant::now());
        assert!(time.nanos() >= first);
    }
}
