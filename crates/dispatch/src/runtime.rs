//! Process wiring: one subscription loop per event stream, all under one
//! cancellation token.

use std::sync::Arc;

use nexgrid_bus::{
    topics, CancellationToken, EventBus, EventHandler, EventPublisher, LoopReport,
    SubscriptionBuilder,
};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::config::GridConfig;
use crate::coordinator::Coordinator;
use crate::error::DispatchError;
use crate::registry::CapabilityRegistry;
use crate::scheduler::Scheduler;
use crate::store::TaskStore;

/// The engine's components, constructed and owned explicitly.
pub struct GridRuntime {
    config: GridConfig,
    coordinator: Arc<Coordinator>,
    aggregator: Arc<Aggregator>,
    scheduler: Arc<Scheduler>,
}

impl GridRuntime {
    pub fn new(
        config: GridConfig,
        publisher: Arc<dyn EventPublisher>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let registry = Arc::new(CapabilityRegistry::new());
        let coordinator = Arc::new(Coordinator::from_config(
            &config.coordinator,
            registry,
            publisher.clone(),
        ));
        let aggregator = Arc::new(Aggregator::new(
            store.clone(),
            publisher.clone(),
            config.aggregator.source.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store,
            publisher,
            config.scheduler.source.clone(),
            config.scheduler.chunks_per_task,
        ));
        Self {
            config,
            coordinator,
            aggregator,
            scheduler,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Subscribe every loop on `bus` and start processing.
    ///
    /// Resolves once all subscriptions are active. Cancelling `cancel` stops
    /// the loops; [`RunningGrid::join`] waits for them to drain.
    pub async fn start(
        &self,
        bus: &dyn EventBus,
        cancel: CancellationToken,
    ) -> Result<RunningGrid, DispatchError> {
        let coordinator: Arc<dyn EventHandler> = self.coordinator.clone();
        let aggregator: Arc<dyn EventHandler> = self.aggregator.clone();
        let scheduler: Arc<dyn EventHandler> = self.scheduler.clone();
        let loops = [
            ("coordinator.capabilities", topics::CAPABILITIES_UPDATE, coordinator.clone()),
            ("coordinator.dispatch", topics::DISPATCH_REQUESTED, coordinator),
            ("aggregator.chunks", topics::DISPATCH_SUCCESS, aggregator),
            ("scheduler.tasks", topics::TASK_REQUESTED, scheduler),
        ];

        let scope = cancel.child_token();
        let mut handles = Vec::with_capacity(loops.len());
        for (name, topic, handler) in loops {
            let started = self.start_loop(bus, name, topic, handler, scope.clone()).await;
            match started {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(loop_name = name, error = %e, "failed to start subscription loop");
                    scope.cancel();
                    for handle in handles {
                        let _ = handle.await;
                    }
                    return Err(e);
                }
            }
        }

        info!(
            loops = handles.len(),
            duplicate_policy = %self.config.coordinator.duplicate_policy,
            chunks_per_task = self.config.scheduler.chunks_per_task,
            "grid runtime started"
        );
        Ok(RunningGrid {
            handles,
            coordinator: self.coordinator.clone(),
            aggregator: self.aggregator.clone(),
        })
    }

    /// Start every loop and wait until `cancel` fires and they have drained.
    pub async fn run(
        &self,
        bus: &dyn EventBus,
        cancel: CancellationToken,
    ) -> Result<Vec<LoopReport>, DispatchError> {
        let running = self.start(bus, cancel).await?;
        Ok(running.join().await)
    }

    async fn start_loop(
        &self,
        bus: &dyn EventBus,
        name: &str,
        topic: &str,
        handler: Arc<dyn EventHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<LoopReport>, DispatchError> {
        let subscriber = bus.subscriber().await?;
        let handle = SubscriptionBuilder::new(name)
            .subscribe(topic)
            .max_in_flight(self.config.runtime.max_in_flight)
            .shutdown_timeout(self.config.runtime.shutdown_timeout())
            .build()
            .start(subscriber, handler, cancel)
            .await?;
        Ok(handle)
    }
}

/// Handles of the running loops.
pub struct RunningGrid {
    handles: Vec<JoinHandle<LoopReport>>,
    coordinator: Arc<Coordinator>,
    aggregator: Arc<Aggregator>,
}

impl RunningGrid {
    /// Wait for every loop to stop and return their reports.
    pub async fn join(self) -> Vec<LoopReport> {
        let mut reports = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "subscription loop panicked"),
            }
        }

        let coordinator = self.coordinator.stats();
        let aggregator = self.aggregator.stats();
        info!(
            capability_updates = coordinator.capability_updates,
            dispatched = coordinator.dispatched,
            failed = coordinator.failed,
            chunks_completed = aggregator.chunks_completed,
            tasks_completed = aggregator.tasks_completed,
            dropped = coordinator.dropped + aggregator.dropped,
            "grid runtime stopped"
        );
        reports
    }
}
