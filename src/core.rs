//! The process-scoped shared state (§5): "a process-scoped, mutex-guarded
//! `Core` value threaded through request handlers; never via hidden
//! globals." One `Arc<Core>` is built once in `main` and cloned into every
//! request handler and background task.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Settings;
use crate::cost_graph::CostGraph;
use crate::error::ApiResult;
use crate::policy::PolicyRegistry;
use crate::store::ObjectStore;
use crate::trace::{Clock, TraceIdx};

pub struct Core {
    pub db: PgPool,
    pub cost_graph: CostGraph,
    pub policies: PolicyRegistry,
    pub trace_idx: TraceIdx,
    pub clock: Clock,
    pub store: Box<dyn ObjectStore>,
    pub settings: Settings,
}

impl Core {
    pub fn new(db: PgPool, cost_graph: CostGraph, settings: Settings, store: Box<dyn ObjectStore>) -> ApiResult<Arc<Self>> {
        let policies = PolicyRegistry::new(&settings)?;
        Ok(Arc::new(Self {
            db,
            cost_graph,
            policies,
            trace_idx: TraceIdx::new(),
            clock: Clock::real_time(),
            store,
            settings,
        }))
    }
}
