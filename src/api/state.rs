//! Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::InspectionConfig;
use crate::copilot::Copilot;
use crate::notify::NotificationService;
use crate::pipeline::{BatchRunner, InspectionCoordinator};
use crate::rca::RcaEngine;
use crate::spc::SpcEngine;
use crate::storage::WaferRepository;

/// Everything a handler can reach. Cloned per request; all fields are cheap.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<InspectionCoordinator>,
    pub batch: Arc<BatchRunner>,
    pub store: Arc<dyn WaferRepository>,
    pub notifier: Arc<NotificationService>,
    pub spc: Arc<SpcEngine>,
    pub rca: Arc<RcaEngine>,
    pub copilot: Arc<Copilot>,
    /// Cancelled on shutdown; running lots stop between wafers
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(
        config: &InspectionConfig,
        coordinator: Arc<InspectionCoordinator>,
        notifier: Arc<NotificationService>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            batch: Arc::new(BatchRunner::new(coordinator.clone(), config.lot.clone())),
            store: coordinator.store().clone(),
            coordinator,
            notifier,
            spc: Arc::new(SpcEngine::new(config.spc.clone())),
            rca: Arc::new(RcaEngine::new(config.rca.clone())),
            copilot: Arc::new(Copilot::new(config.copilot.clone())),
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// Replace the batch runner (e.g. to plug in another narrative backend).
    pub fn with_batch_runner(mut self, batch: BatchRunner) -> Self {
        self.batch = Arc::new(batch);
        self
    }
}
