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

//! Plan dispatch.
//!
//! A dispatcher carries a sub-plan to wherever it runs and returns exactly
//! one response. The in-process dispatcher below executes the plan in this
//! process, optionally hopping onto the dedicated query scheduler; a remote
//! dispatcher would serialize the plan, send it over the wire and
//! deserialize the response, which is a transport concern outside this
//! crate.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{QueryError, Result};
use crate::query::{QueryConfig, QueryResponse, QuerySession};

use super::{ChunkSource, ExecPlan};

/// Delivers a plan to its execution site.
#[async_trait]
pub trait PlanDispatcher: Send + Sync + fmt::Debug {
    /// Executes `plan` against `source` and returns its response. `Err` is
    /// reserved for transport failures; query failures travel inside the
    /// response.
    async fn dispatch(
        &self,
        plan: Arc<dyn ExecPlan>,
        source: Arc<dyn ChunkSource>,
    ) -> Result<QueryResponse>;
}

/// Executes dispatched plans in this process. Each dispatch runs under a
/// fresh session so child stats merge upward through the response rather
/// than aliasing the parent's counters.
pub struct InProcessPlanDispatcher {
    query_config: Arc<QueryConfig>,
    scheduler: Option<tokio::runtime::Handle>,
}

impl InProcessPlanDispatcher {
    pub fn new(query_config: Arc<QueryConfig>) -> Self {
        Self {
            query_config,
            scheduler: None,
        }
    }

    /// Routes every dispatched plan onto the dedicated query scheduler.
    pub fn on_scheduler(
        query_config: Arc<QueryConfig>,
        scheduler: tokio::runtime::Handle,
    ) -> Self {
        Self {
            query_config,
            scheduler: Some(scheduler),
        }
    }
}

impl fmt::Debug for InProcessPlanDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InProcessPlanDispatcher")
    }
}

#[async_trait]
impl PlanDispatcher for InProcessPlanDispatcher {
    async fn dispatch(
        &self,
        plan: Arc<dyn ExecPlan>,
        source: Arc<dyn ChunkSource>,
    ) -> Result<QueryResponse> {
        let session = QuerySession::new(Arc::clone(&self.query_config));
        match &self.scheduler {
            Some(handle) => handle
                .spawn(async move { plan.execute(source, &session).await })
                .await
                .map_err(|e| {
                    QueryError::Internal(format!("dispatched query task failed: {e}"))
                }),
            None => Ok(plan.execute(source, &session).await),
        }
    }
}
