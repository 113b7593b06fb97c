//! End-to-end tests for publish, outbox draining, retry/backoff, and replay.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, TraceContext};
use event_bus::{BusConfig, EventBus, EventHandler, HandlerError};
use event_store::{DomainEvent, EventStore, InMemoryEventStore};
use outbox::{
    InMemoryOutboxStore, OutboxError, OutboxEvent, OutboxId, OutboxStatus, OutboxStore,
    RetryOutcome,
};

struct TestHarness {
    bus: EventBus<InMemoryEventStore, InMemoryOutboxStore>,
    event_store: InMemoryEventStore,
    outbox: InMemoryOutboxStore,
}

impl TestHarness {
    fn new() -> Self {
        let event_store = InMemoryEventStore::new();
        let outbox = InMemoryOutboxStore::new();
        let bus = EventBus::new(
            event_store.clone(),
            outbox.clone(),
            BusConfig::default().with_service_name("waste-mgmt"),
        );
        Self {
            bus,
            event_store,
            outbox,
        }
    }
}

/// Succeeds unconditionally and counts invocations.
struct NoopHandler {
    calls: AtomicUsize,
}

impl NoopHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for NoopHandler {
    async fn handle(
        &self,
        _event: &DomainEvent,
        _trace: &TraceContext,
    ) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails the first `fail_times` invocations, then succeeds.
struct FlakyHandler {
    calls: AtomicUsize,
    fail_times: usize,
}

impl FlakyHandler {
    fn new(fail_times: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_times,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    async fn handle(
        &self,
        _event: &DomainEvent,
        _trace: &TraceContext,
    ) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            Err(format!("transient failure on call {call}").into())
        } else {
            Ok(())
        }
    }
}

/// Delegates to an in-memory store but fails the first `fail_times`
/// bookkeeping writes (`mark_processed` / `increment_retry`).
#[derive(Clone)]
struct FlakyBookkeepingStore {
    inner: InMemoryOutboxStore,
    fail_times: Arc<AtomicUsize>,
}

impl FlakyBookkeepingStore {
    fn new(fail_times: usize) -> Self {
        Self {
            inner: InMemoryOutboxStore::new(),
            fail_times: Arc::new(AtomicUsize::new(fail_times)),
        }
    }

    fn take_failure(&self) -> bool {
        self.fail_times
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OutboxStore for FlakyBookkeepingStore {
    async fn insert(&self, events: Vec<OutboxEvent>) -> outbox::Result<()> {
        self.inner.insert(events).await
    }

    async fn get_pending_events(&self, limit: usize) -> outbox::Result<Vec<OutboxEvent>> {
        self.inner.get_pending_events(limit).await
    }

    async fn claim_pending(&self, limit: usize) -> outbox::Result<Vec<OutboxEvent>> {
        self.inner.claim_pending(limit).await
    }

    async fn reclaim_stale(&self, lease: chrono::Duration) -> outbox::Result<usize> {
        self.inner.reclaim_stale(lease).await
    }

    async fn mark_processed(&self, ids: &[OutboxId]) -> outbox::Result<()> {
        if self.take_failure() {
            return Err(OutboxError::InvalidStatus("connection lost".to_string()));
        }
        self.inner.mark_processed(ids).await
    }

    async fn mark_failed(&self, id: OutboxId, error: &str) -> outbox::Result<()> {
        self.inner.mark_failed(id, error).await
    }

    async fn increment_retry(&self, id: OutboxId, error: &str) -> outbox::Result<RetryOutcome> {
        if self.take_failure() {
            return Err(OutboxError::InvalidStatus("connection lost".to_string()));
        }
        self.inner.increment_retry(id, error).await
    }

    async fn get_failed_events(&self, limit: usize) -> outbox::Result<Vec<OutboxEvent>> {
        self.inner.get_failed_events(limit).await
    }
}

fn staged_event(event_type: &str, aggregate_id: &str) -> OutboxEvent {
    let event = DomainEvent::builder()
        .event_type(event_type)
        .aggregate_id(aggregate_id)
        .aggregate_type("bin")
        .payload(serde_json::json!({}))
        .build();
    OutboxEvent::new(event, 3)
}

#[tokio::test]
async fn publish_then_drain_completes_the_outbox_entry() {
    // Scenario: publish "bin.created" for B1 with a registered no-op
    // subscriber; the event lands in the store and its outbox entry ends up
    // completed with processed_at set.
    let h = TestHarness::new();
    let handler = NoopHandler::new();
    h.bus.subscribe("bin.created", handler.clone()).await;

    let published = h
        .bus
        .publish(
            "bin.created",
            AggregateId::new("B1"),
            "bin",
            serde_json::json!({"capacity": 240, "location": "depot-3"}),
            None,
        )
        .await
        .unwrap();

    let history = h.bus.get_event_history(&AggregateId::new("B1")).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, "bin.created");
    assert_eq!(history[0].payload, published.payload);

    // The immediate drain already delivered it.
    assert_eq!(handler.calls(), 1);
    assert_eq!(h.outbox.count().await, 1);
    let entry = h.outbox.snapshot().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Completed);
    assert!(entry.processed_at.is_some());
    assert_eq!(entry.retry_count, 0);
    assert_eq!(entry.event_data.event_id, published.event_id);
}

#[tokio::test]
async fn entry_without_subscribers_is_still_drained() {
    let h = TestHarness::new();

    h.bus
        .publish(
            "bin.created",
            AggregateId::new("B1"),
            "bin",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

    // No subscribers means nothing to deliver to: vacuous success.
    assert!(h.outbox.get_pending_events(10).await.unwrap().is_empty());
    let entry = h.outbox.snapshot().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Completed);
}

#[tokio::test]
async fn flaky_subscriber_retries_with_exponential_backoff_then_completes() {
    // Scenario: a "payment.processed" subscriber throws on its first two
    // invocations and succeeds on the third. With max_retries = 3 the event
    // completes on the third drain pass, and the two intermediate backoff
    // gaps are about 2 and 4 minutes.
    let h = TestHarness::new();
    let handler = FlakyHandler::new(2);
    h.bus.subscribe("payment.processed", handler.clone()).await;

    // Drain pass 1 happens inside publish and fails.
    let before_first = Utc::now();
    h.bus
        .publish(
            "payment.processed",
            AggregateId::new("INV-9"),
            "invoice",
            serde_json::json!({"amount_cents": 125_00}),
            None,
        )
        .await
        .unwrap();

    let entry = h.outbox.snapshot().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Pending);
    assert_eq!(entry.retry_count, 1);
    let gap = entry.next_retry_at.unwrap() - before_first;
    assert!(gap >= chrono::Duration::minutes(2) - chrono::Duration::seconds(5));
    assert!(gap <= chrono::Duration::minutes(2) + chrono::Duration::seconds(5));

    // Still in backoff: a drain pass now must not touch it.
    assert_eq!(h.bus.process_outbox_events().await.unwrap(), 0);
    assert_eq!(handler.calls(), 1);

    // Drain pass 2: due again, fails again, 4-minute gap.
    h.outbox.clear_backoff().await;
    let before_second = Utc::now();
    assert_eq!(h.bus.process_outbox_events().await.unwrap(), 0);

    let entry = h.outbox.snapshot().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Pending);
    assert_eq!(entry.retry_count, 2);
    let gap = entry.next_retry_at.unwrap() - before_second;
    assert!(gap >= chrono::Duration::minutes(4) - chrono::Duration::seconds(5));
    assert!(gap <= chrono::Duration::minutes(4) + chrono::Duration::seconds(5));

    // Drain pass 3: handler finally succeeds.
    h.outbox.clear_backoff().await;
    assert_eq!(h.bus.process_outbox_events().await.unwrap(), 1);

    let entry = h.outbox.snapshot().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Completed);
    assert!(entry.processed_at.is_some());
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_entry() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(usize::MAX);
    h.bus.subscribe("payment.processed", handler.clone()).await;

    h.bus
        .publish(
            "payment.processed",
            AggregateId::new("INV-1"),
            "invoice",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();

    // Attempts 2 and 3.
    h.outbox.clear_backoff().await;
    h.bus.process_outbox_events().await.unwrap();
    h.outbox.clear_backoff().await;
    h.bus.process_outbox_events().await.unwrap();

    let failed = h.outbox.get_failed_events(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, OutboxStatus::Failed);
    assert!(failed[0].last_error.is_some());
    assert_eq!(handler.calls(), 3);

    // Terminal: further drains never see it again.
    h.outbox.clear_backoff().await;
    assert_eq!(h.bus.process_outbox_events().await.unwrap(), 0);
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn one_bad_event_does_not_block_the_batch() {
    let h = TestHarness::new();
    let good = NoopHandler::new();
    let bad = FlakyHandler::new(usize::MAX);
    h.bus.subscribe("bin.created", good.clone()).await;
    h.bus.subscribe("bin.rejected", bad.clone()).await;

    // Stage both entries without immediate dispatch by writing to the
    // outbox directly.
    h.outbox
        .insert(vec![
            staged_event("bin.rejected", "B1"),
            staged_event("bin.created", "B2"),
        ])
        .await
        .unwrap();

    // The failing first entry must not prevent delivery of the second.
    assert_eq!(h.bus.process_outbox_events().await.unwrap(), 1);
    assert_eq!(good.calls(), 1);
    assert_eq!(bad.calls(), 1);
}

#[tokio::test]
async fn completion_write_failure_does_not_strand_the_batch() {
    // A store error while recording one entry's delivery must not abort the
    // rest of the batch, and the affected entry must come back once its
    // claim lease expires instead of sitting in processing forever.
    let store = FlakyBookkeepingStore::new(1);
    let mut config = BusConfig::default().with_service_name("waste-mgmt");
    config.claim_lease = Duration::ZERO;
    let bus = EventBus::new(InMemoryEventStore::new(), store.clone(), config);

    let handler = NoopHandler::new();
    bus.subscribe("bin.created", handler.clone()).await;

    store
        .insert(vec![
            staged_event("bin.created", "B1"),
            staged_event("bin.created", "B2"),
        ])
        .await
        .unwrap();

    // First pass: both entries dispatched; the first one's completion write
    // fails and leaves it claimed, the second completes normally.
    assert_eq!(bus.process_outbox_events().await.unwrap(), 2);
    assert_eq!(handler.calls(), 2);

    let snapshot = store.inner.snapshot().await;
    assert_eq!(snapshot[0].status, OutboxStatus::Processing);
    assert_eq!(snapshot[1].status, OutboxStatus::Completed);

    // Second pass: the expired claim is reclaimed and redelivered. The
    // handler sees the event a second time (at-least-once), and this time
    // the completion write sticks.
    assert_eq!(bus.process_outbox_events().await.unwrap(), 1);
    assert_eq!(handler.calls(), 3);
    assert_eq!(
        store.inner.snapshot().await[0].status,
        OutboxStatus::Completed
    );
}

#[tokio::test]
async fn retry_write_failure_does_not_strand_the_batch() {
    // Same isolation for the failure path: if the retry bump itself errors,
    // later entries still drain and the stranded entry is reclaimed.
    let store = FlakyBookkeepingStore::new(1);
    let mut config = BusConfig::default().with_service_name("waste-mgmt");
    config.claim_lease = Duration::ZERO;
    let bus = EventBus::new(InMemoryEventStore::new(), store.clone(), config);

    let bad = FlakyHandler::new(1);
    let good = NoopHandler::new();
    bus.subscribe("bin.rejected", bad.clone()).await;
    bus.subscribe("bin.created", good.clone()).await;

    store
        .insert(vec![
            staged_event("bin.rejected", "B1"),
            staged_event("bin.created", "B2"),
        ])
        .await
        .unwrap();

    // First pass: the bad entry's handler fails AND its retry bump fails;
    // the good entry is still delivered.
    assert_eq!(bus.process_outbox_events().await.unwrap(), 1);
    assert_eq!(good.calls(), 1);
    assert_eq!(bad.calls(), 1);
    assert_eq!(
        store.inner.snapshot().await[0].status,
        OutboxStatus::Processing
    );

    // Second pass: reclaimed, redispatched, and the handler now succeeds.
    assert_eq!(bus.process_outbox_events().await.unwrap(), 1);
    assert_eq!(bad.calls(), 2);
    assert_eq!(
        store.inner.snapshot().await[0].status,
        OutboxStatus::Completed
    );
}

#[tokio::test]
async fn periodic_drain_recovers_pending_entries() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(1);
    h.bus.subscribe("bin.created", handler.clone()).await;

    // Immediate drain fails once; the entry goes back to pending.
    h.bus
        .publish(
            "bin.created",
            AggregateId::new("B1"),
            "bin",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(handler.calls(), 1);
    h.outbox.clear_backoff().await;

    // The timer drain picks it up without another publish.
    h.bus
        .start_processing_every(Duration::from_millis(20))
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.bus.stop_processing().await;

    let entry = h.outbox.snapshot().await.remove(0);
    assert_eq!(entry.status, OutboxStatus::Completed);
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn dispatched_trace_context_derives_from_publish_metadata() {
    struct TraceCapture {
        seen: tokio::sync::Mutex<Option<TraceContext>>,
    }

    #[async_trait]
    impl EventHandler for TraceCapture {
        async fn handle(
            &self,
            _event: &DomainEvent,
            trace: &TraceContext,
        ) -> Result<(), HandlerError> {
            *self.seen.lock().await = Some(trace.clone());
            Ok(())
        }
    }

    let h = TestHarness::new();
    let capture = Arc::new(TraceCapture {
        seen: tokio::sync::Mutex::new(None),
    });
    h.bus.subscribe("bin.created", capture.clone()).await;

    let trace = TraceContext::new("trace-abc", "span-root");
    h.bus
        .publish(
            "bin.created",
            AggregateId::new("B1"),
            "bin",
            serde_json::json!({}),
            Some(&trace),
        )
        .await
        .unwrap();

    let seen = capture.seen.lock().await.clone().unwrap();
    assert_eq!(seen.trace_id, "trace-abc");
    assert_ne!(seen.span_id, "span-root");
}

#[tokio::test]
async fn history_round_trips_published_fields() {
    let h = TestHarness::new();
    let payload = serde_json::json!({"route": "R-12", "stop": 4});

    h.bus
        .publish(
            "route.stop_added",
            AggregateId::new("R-12"),
            "route",
            payload.clone(),
            None,
        )
        .await
        .unwrap();

    let history = h
        .bus
        .get_event_history(&AggregateId::new("R-12"))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].event_type, "route.stop_added");
    assert_eq!(history[0].aggregate_type, "route");
    assert_eq!(history[0].payload, payload);

    // And the audit scan sees it too.
    let all = h.event_store.get_all_events(None, None).await.unwrap();
    assert!(all.iter().any(|e| e.aggregate_id == AggregateId::new("R-12")));
}

#[tokio::test]
async fn replaying_history_twice_through_a_pure_reducer_is_idempotent() {
    let h = TestHarness::new();
    let aggregate_id = AggregateId::new("B1");

    for (event_type, level) in [("bin.created", 0), ("bin.filled", 80), ("bin.emptied", 0)] {
        h.bus
            .publish(
                event_type,
                aggregate_id.clone(),
                "bin",
                serde_json::json!({"fill_level": level}),
                None,
            )
            .await
            .unwrap();
    }

    async fn rebuild(
        bus: &EventBus<InMemoryEventStore, InMemoryOutboxStore>,
        aggregate_id: &AggregateId,
    ) -> Vec<i64> {
        let state = Arc::new(std::sync::Mutex::new(Vec::new()));
        let state_ref = Arc::clone(&state);
        bus.replay_events(aggregate_id, move |event| {
            let state = Arc::clone(&state_ref);
            async move {
                let level = event.payload["fill_level"].as_i64().unwrap_or(0);
                state.lock().unwrap().push(level);
                Ok(())
            }
        })
        .await
        .unwrap();
        let result = state.lock().unwrap().clone();
        result
    }

    let first = rebuild(&h.bus, &aggregate_id).await;
    let second = rebuild(&h.bus, &aggregate_id).await;
    assert_eq!(first, vec![0, 80, 0]);
    assert_eq!(first, second);
}
