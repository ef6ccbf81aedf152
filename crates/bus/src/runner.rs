//! Subscription loops and process lifetime.
//!
//! A [`SubscriptionLoop`] owns one subscription stream and feeds every event to
//! an [`EventHandler`], one spawned task per event. All loops of a process share
//! a [`CancellationToken`]: once it fires, loops stop receiving and drain the
//! handlers already in flight.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::event::CanonicalEvent;
use crate::traits::EventSubscriber;

// ── Handler trait ────────────────────────────────────────────────────

/// Consumes events delivered by a [`SubscriptionLoop`].
///
/// Handlers may run concurrently with themselves and must not assume ordering
/// or uniqueness of deliveries. Errors are the handler's to log; nothing
/// propagates back into the loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: CanonicalEvent);
}

#[async_trait]
impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    async fn handle(&self, event: CanonicalEvent) {
        (**self).handle(event).await
    }
}

// ── SubscriptionBuilder ──────────────────────────────────────────────

/// Fluent builder for a [`SubscriptionLoop`].
///
/// # Example
/// ```ignore
/// let sub = SubscriptionBuilder::new("coordinator.dispatch")
///     .subscribe(topics::DISPATCH_REQUESTED)
///     .max_in_flight(32)
///     .build();
/// let handle = sub.start(subscriber, handler, cancel.clone()).await?;
/// ```
pub struct SubscriptionBuilder {
    name: String,
    topics: Vec<String>,
    max_in_flight: usize,
    shutdown_timeout: Duration,
    retry_backoff: Duration,
}

impl SubscriptionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topics: Vec::new(),
            max_in_flight: 64,
            shutdown_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(100),
        }
    }

    /// Add a topic prefix.
    pub fn subscribe(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Maximum handler invocations running at once (default: 64, minimum 1).
    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    /// How long to wait for in-flight handlers after cancellation (default: 5s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Pause after a transient receive error (default: 100ms).
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> SubscriptionLoop {
        SubscriptionLoop {
            name: self.name,
            topics: self.topics,
            max_in_flight: self.max_in_flight,
            shutdown_timeout: self.shutdown_timeout,
            retry_backoff: self.retry_backoff,
        }
    }
}

// ── SubscriptionLoop ─────────────────────────────────────────────────

/// A configured receive loop, produced by [`SubscriptionBuilder`].
#[derive(Debug, Clone)]
pub struct SubscriptionLoop {
    pub name: String,
    pub topics: Vec<String>,
    pub max_in_flight: usize,
    pub shutdown_timeout: Duration,
    pub retry_backoff: Duration,
}

/// Summary returned when a loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub name: String,
    /// Events received and handed to the handler.
    pub received: u64,
    /// Handlers still running when the shutdown timeout expired; left to finish detached.
    pub detached: usize,
}

impl SubscriptionLoop {
    /// Subscribe to every topic, then spawn the receive loop.
    ///
    /// Returns only after the subscriptions are active, so events published
    /// after `start` resolves are guaranteed to reach this loop.
    pub async fn start(
        self,
        subscriber: Box<dyn EventSubscriber>,
        handler: Arc<dyn EventHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<LoopReport>, BusError> {
        for topic in &self.topics {
            subscriber.subscribe(topic).await?;
        }
        info!(loop_name = %self.name, topics = ?self.topics, "subscription loop started");
        Ok(tokio::spawn(self.run(subscriber, handler, cancel)))
    }

    async fn run(
        self,
        subscriber: Box<dyn EventSubscriber>,
        handler: Arc<dyn EventHandler>,
        cancel: CancellationToken,
    ) -> LoopReport {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut received = 0u64;

        loop {
            while let Some(result) = in_flight.try_join_next() {
                self.log_join(result);
            }

            // Backpressure: do not pull another event until a handler slot is free.
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = subscriber.recv() => next,
            };

            match next {
                Ok(event) => {
                    received += 1;
                    debug!(loop_name = %self.name, event_type = %event.event_type, id = %event.id, "dispatching event to handler");
                    let handler = handler.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        handler.handle(event).await;
                    });
                }
                Err(BusError::Closed) => {
                    info!(loop_name = %self.name, "event stream closed");
                    break;
                }
                Err(e) => {
                    warn!(loop_name = %self.name, error = %e, "subscriber recv error");
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        info!(
            loop_name = %self.name,
            in_flight = in_flight.len(),
            timeout = ?self.shutdown_timeout,
            "subscription loop stopping, draining handlers"
        );
        let drained =
            tokio::time::timeout(self.shutdown_timeout, self.drain(&mut in_flight)).await;
        let detached = if drained.is_err() {
            let remaining = in_flight.len();
            warn!(loop_name = %self.name, remaining, "drain timed out, detaching remaining handlers");
            in_flight.detach_all();
            remaining
        } else {
            0
        };

        info!(loop_name = %self.name, received, "subscription loop stopped");
        LoopReport {
            name: self.name,
            received,
            detached,
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<()>) {
        while let Some(result) = in_flight.join_next().await {
            self.log_join(result);
        }
    }

    fn log_join(&self, result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                error!(loop_name = %self.name, error = %e, "event handler panicked");
            }
        }
    }
}

// ── Process lifetime ─────────────────────────────────────────────────

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to register unix signal handlers, falling back to ctrl_c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl_c");
        std::future::pending::<()>().await;
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::memory::InMemoryBus;
    use crate::messages::topics;
    use crate::traits::EventPublisher;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Handler that counts completed invocations and tracks peak concurrency.
    struct CountingHandler {
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    impl CountingHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                done: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: CanonicalEvent) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(event_type: &str) -> CanonicalEvent {
        CanonicalEvent::new(event_type, "test", &()).unwrap()
    }

    async fn wait_for(counter: &AtomicUsize, n: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while counter.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler count not reached in time");
    }

    #[test]
    fn builder_defaults() {
        let sub = SubscriptionBuilder::new("default").build();
        assert_eq!(sub.name, "default");
        assert!(sub.topics.is_empty());
        assert_eq!(sub.max_in_flight, 64);
        assert_eq!(sub.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_fluent_api() {
        let sub = SubscriptionBuilder::new("custom")
            .subscribe(topics::CAPABILITIES_UPDATE)
            .subscribe(topics::DISPATCH_REQUESTED)
            .max_in_flight(0)
            .shutdown_timeout(Duration::from_secs(1))
            .build();
        assert_eq!(sub.topics.len(), 2);
        assert_eq!(sub.max_in_flight, 1);
        assert_eq!(sub.shutdown_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn only_subscribed_topics_reach_handler() {
        let bus = InMemoryBus::new();
        let handler = CountingHandler::new(Duration::ZERO);
        let cancel = CancellationToken::new();

        let handle = SubscriptionBuilder::new("caps")
            .subscribe(topics::CAPABILITIES_UPDATE)
            .build()
            .start(Box::new(bus.subscribe_stream()), handler.clone(), cancel.clone())
            .await
            .unwrap();

        bus.publish(event(topics::CAPABILITIES_UPDATE)).await.unwrap();
        bus.publish(event(topics::DISPATCH_REQUESTED)).await.unwrap();
        bus.publish(event(topics::CAPABILITIES_UPDATE)).await.unwrap();
        wait_for(&handler.done, 2).await;

        cancel.cancel();
        let report = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
        assert_eq!(report.received, 2);
        assert_eq!(report.detached, 0);
    }

    #[tokio::test]
    async fn handlers_run_concurrently_up_to_limit() {
        let bus = InMemoryBus::new();
        let handler = CountingHandler::new(Duration::from_millis(50));
        let cancel = CancellationToken::new();

        let handle = SubscriptionBuilder::new("bounded")
            .subscribe("compute:")
            .max_in_flight(3)
            .build()
            .start(Box::new(bus.subscribe_stream()), handler.clone(), cancel.clone())
            .await
            .unwrap();

        for _ in 0..9 {
            bus.publish(event(topics::DISPATCH_SUCCESS)).await.unwrap();
        }
        wait_for(&handler.done, 9).await;

        let peak = handler.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "expected concurrent handling, peak was {peak}");
        assert!(peak <= 3, "limit exceeded, peak was {peak}");

        cancel.cancel();
        tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_drains_in_flight_handlers() {
        let bus = InMemoryBus::new();
        let handler = CountingHandler::new(Duration::from_millis(100));
        let cancel = CancellationToken::new();

        let handle = SubscriptionBuilder::new("drain")
            .subscribe("")
            .build()
            .start(Box::new(bus.subscribe_stream()), handler.clone(), cancel.clone())
            .await
            .unwrap();

        bus.publish(event(topics::TASK_REQUESTED)).await.unwrap();
        wait_for(&handler.running, 1).await;
        cancel.cancel();

        let report = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
        assert_eq!(report.received, 1);
        assert_eq!(handler.done.load(Ordering::SeqCst), 1, "in-flight handler must finish");

        // No new events are accepted after cancellation.
        bus.publish(event(topics::TASK_REQUESTED)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_handlers_are_detached_not_killed() {
        let bus = InMemoryBus::new();
        let handler = CountingHandler::new(Duration::from_millis(200));
        let cancel = CancellationToken::new();

        let handle = SubscriptionBuilder::new("slow")
            .subscribe("")
            .shutdown_timeout(Duration::from_millis(10))
            .build()
            .start(Box::new(bus.subscribe_stream()), handler.clone(), cancel.clone())
            .await
            .unwrap();

        bus.publish(event(topics::TASK_REQUESTED)).await.unwrap();
        wait_for(&handler.running, 1).await;
        cancel.cancel();

        let report = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
        assert_eq!(report.detached, 1);
        wait_for(&handler.done, 1).await;
    }

    #[tokio::test]
    async fn closed_stream_ends_loop() {
        let bus = InMemoryBus::new();
        let handler = CountingHandler::new(Duration::ZERO);

        let handle = SubscriptionBuilder::new("closing")
            .subscribe("")
            .build()
            .start(Box::new(bus.subscribe_stream()), handler.clone(), CancellationToken::new())
            .await
            .unwrap();

        bus.close();
        let report = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
        assert_eq!(report.received, 0);
    }
}
