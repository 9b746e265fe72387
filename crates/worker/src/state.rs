use courier_db::{LedgerStore, TokenRegistry};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::gateway::ProviderGateway;
use crate::metrics::MetricsHandle;
use crate::retry::RetryPolicy;
use crate::store::JobStore;

/// Everything a worker needs to run one delivery attempt.
#[derive(Clone)]
pub struct WorkerState {
    pub store: Arc<JobStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub tokens: Arc<dyn TokenRegistry>,
    pub gateway: Arc<ProviderGateway>,
    pub retry: RetryPolicy,
    pub chunk_size: usize,
    pub metrics: MetricsHandle,
    pub clock: Arc<dyn Clock>,
    /// Signalled whenever a job becomes ready so the dispatcher re-checks.
    pub wake: Arc<Notify>,
}
