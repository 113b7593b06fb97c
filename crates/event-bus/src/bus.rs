use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use common::{AggregateId, TraceContext};
use event_store::{DomainEvent, EventMetadata, EventStore};
use outbox::{OutboxEvent, OutboxStore, RetryOutcome};

use crate::config::BusConfig;
use crate::error::{EventBusError, Result};
use crate::handler::{EventHandler, HandlerError};

/// Token identifying one subscription, returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

struct DrainTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Publishes domain events into the event store and the outbox, dispatches
/// them to in-process subscribers, and drives outbox draining.
///
/// Publishing appends the event for audit/replay, stages a pending outbox
/// entry, then drains once immediately for low-latency delivery. The periodic
/// drain started by [`start_processing`](EventBus::start_processing) is the
/// safety net for entries whose immediate attempt failed or never ran (e.g.
/// the process restarted while entries were pending).
pub struct EventBus<ES, OS> {
    event_store: ES,
    outbox: OS,
    config: BusConfig,
    subscribers: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    drain_task: Arc<Mutex<Option<DrainTask>>>,
}

impl<ES: Clone, OS: Clone> Clone for EventBus<ES, OS> {
    fn clone(&self) -> Self {
        Self {
            event_store: self.event_store.clone(),
            outbox: self.outbox.clone(),
            config: self.config.clone(),
            subscribers: Arc::clone(&self.subscribers),
            drain_task: Arc::clone(&self.drain_task),
        }
    }
}

impl<ES, OS> EventBus<ES, OS>
where
    ES: EventStore,
    OS: OutboxStore,
{
    /// Creates a bus over the given stores.
    pub fn new(event_store: ES, outbox: OS, config: BusConfig) -> Self {
        Self {
            event_store,
            outbox,
            config,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            drain_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Publishes a domain event.
    ///
    /// Builds the event (fresh id, current timestamp, metadata stamped with
    /// the caller's trace ids and the configured service name), appends it to
    /// the event store, and stages a pending outbox entry. Both writes must
    /// succeed — a failure of either propagates to the caller and the event
    /// is never silently dropped. Dispatch itself is best-effort here; the
    /// periodic drain retries anything the immediate attempt missed.
    #[tracing::instrument(skip(self, payload, trace), fields(aggregate_id = %aggregate_id))]
    pub async fn publish(
        &self,
        event_type: &str,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        payload: serde_json::Value,
        trace: Option<&TraceContext>,
    ) -> Result<DomainEvent> {
        let metadata = match trace {
            Some(trace) => EventMetadata::from_trace(trace, &self.config.service_name),
            None => EventMetadata {
                service: Some(self.config.service_name.clone()),
                ..EventMetadata::default()
            },
        };

        let event = DomainEvent::builder()
            .event_type(event_type)
            .aggregate_id(aggregate_id)
            .aggregate_type(aggregate_type)
            .payload(payload)
            .metadata(metadata)
            .build();

        self.event_store.append(vec![event.clone()]).await?;

        let entry = OutboxEvent::new(event.clone(), self.config.max_retries);
        self.outbox.insert(vec![entry]).await?;

        metrics::counter!("bus_events_published_total").increment(1);
        tracing::debug!(event_id = %event.event_id, "event published");

        // Immediate best-effort drain for low-latency delivery. A failure
        // here leaves the entry pending for the periodic drain.
        if let Err(e) = self.process_outbox_events().await {
            tracing::warn!(error = %e, "immediate outbox drain failed");
        }

        Ok(event)
    }

    /// Registers a handler for one event type and returns its subscription
    /// token.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Removes a previously registered handler. Returns whether a
    /// subscription was actually removed.
    pub async fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.get_mut(event_type) {
            Some(subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                subs.len() < before
            }
            None => false,
        }
    }

    /// Drains one batch of due outbox entries.
    ///
    /// Entries are claimed atomically (`pending → processing`) so a racing
    /// drain pass never dispatches the same entry. Per-entry failures are
    /// isolated: a failing handler schedules a retry for its entry and the
    /// loop moves on to the rest of the batch. Store errors while recording
    /// an entry's outcome are isolated the same way; the entry stays claimed
    /// until its lease expires and a later pass reclaims it, which can
    /// redeliver an already-handled event (at-least-once). Returns the number
    /// of entries delivered.
    #[tracing::instrument(skip(self))]
    pub async fn process_outbox_events(&self) -> Result<usize> {
        // Recover entries stranded in processing by a crash or a failed
        // bookkeeping write once their claim lease has expired.
        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        if let Err(e) = self.outbox.reclaim_stale(lease).await {
            tracing::warn!(error = %e, "outbox reclaim failed");
        }

        let batch = self.outbox.claim_pending(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for entry in batch {
            match self.dispatch(&entry.event_data).await {
                Ok(()) => {
                    delivered += 1;
                    metrics::counter!("bus_outbox_delivered_total").increment(1);
                    if let Err(e) = self.outbox.mark_processed(&[entry.id]).await {
                        tracing::warn!(
                            outbox_id = %entry.id,
                            error = %e,
                            "delivered but could not mark processed, \
                             entry stays claimed until its lease expires"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        error = %e,
                        "outbox delivery failed, scheduling retry"
                    );
                    metrics::counter!("bus_outbox_retries_total").increment(1);

                    match self.outbox.increment_retry(entry.id, &e.to_string()).await {
                        Ok(RetryOutcome::Rescheduled { .. }) => {}
                        Ok(RetryOutcome::Exhausted) => {
                            tracing::error!(
                                outbox_id = %entry.id,
                                event_type = %entry.event_type,
                                aggregate_id = %entry.aggregate_id,
                                "outbox entry dead-lettered after exhausting retries"
                            );
                            metrics::counter!("bus_outbox_dead_lettered_total").increment(1);
                        }
                        Err(store_err) => {
                            tracing::warn!(
                                outbox_id = %entry.id,
                                error = %store_err,
                                "could not record retry, \
                                 entry stays claimed until its lease expires"
                            );
                        }
                    }
                }
            }
        }

        Ok(delivered)
    }

    /// Invokes every subscriber registered for the event's type, awaiting
    /// each. The first handler error aborts dispatch of this event.
    async fn dispatch(&self, event: &DomainEvent) -> std::result::Result<(), HandlerError> {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .get(&event.event_type)
                .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
                .unwrap_or_default()
        };

        let trace = event
            .metadata
            .trace_context()
            .map(|t| t.child())
            .unwrap_or_else(TraceContext::root);

        for handler in handlers {
            handler.handle(event, &trace).await?;
        }
        Ok(())
    }

    /// Returns the full event history of one aggregate, ascending by
    /// timestamp.
    pub async fn get_event_history(&self, aggregate_id: &AggregateId) -> Result<Vec<DomainEvent>> {
        Ok(self.event_store.get_events(aggregate_id, None).await?)
    }

    /// Replays one aggregate's history through `handler`, sequentially and in
    /// timestamp order. Used to rebuild aggregate state; not idempotent
    /// unless the handler itself is, since side-effecting handlers are
    /// re-invoked. Returns the number of events replayed.
    pub async fn replay_events<F, Fut>(
        &self,
        aggregate_id: &AggregateId,
        mut handler: F,
    ) -> Result<usize>
    where
        F: FnMut(DomainEvent) -> Fut,
        Fut: Future<Output = std::result::Result<(), HandlerError>>,
    {
        let events = self.event_store.get_events(aggregate_id, None).await?;
        let count = events.len();
        for event in events {
            handler(event).await.map_err(EventBusError::Replay)?;
        }
        Ok(count)
    }
}

impl<ES, OS> EventBus<ES, OS>
where
    ES: EventStore + Clone + 'static,
    OS: OutboxStore + Clone + 'static,
{
    /// Starts the periodic drain task with the configured interval.
    pub async fn start_processing(&self) {
        self.start_processing_every(self.config.drain_interval).await;
    }

    /// Starts the periodic drain task with an explicit interval. A no-op if
    /// the task is already running.
    pub async fn start_processing_every(&self, interval: Duration) {
        let mut guard = self.drain_task.lock().await;
        if guard.is_some() {
            tracing::warn!("outbox drain task already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let bus = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = bus.process_outbox_events().await {
                            tracing::warn!(error = %e, "periodic outbox drain failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("outbox drain task stopping");
                        break;
                    }
                }
            }
        });

        *guard = Some(DrainTask { shutdown, handle });
    }

    /// Stops the periodic drain task.
    ///
    /// Only prevents future ticks: an in-flight drain batch runs to
    /// completion before the task exits.
    pub async fn stop_processing(&self) {
        let task = self.drain_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "outbox drain task join failed");
            }
        }
    }
}
