use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::TimeDelta;
use relay_core::clock::{Clock, ManualClock};
use relay_core::delivery::{
    BackoffPolicy, EventEngine, EventEngineConfig, EventHandler, HandlerPolicy, InMemoryEventBus,
    TickReport, TimeoutPolicy, TrackedEventBus,
};
use relay_core::persist::{EventStatus, EventStore, InMemoryEventStore};
use relay_core::{Event, EventSystem, GenericEvent, RelayError};
use relay_macros::event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[event(event_type = "order.placed")]
struct OrderPlaced {
    id: String,
    amount: u64,
}

fn order(id: &str) -> String {
    serde_json::to_string(&OrderPlaced {
        id: id.to_string(),
        amount: 100,
    })
    .unwrap()
}

/// 前 `failures` 次调用失败，之后成功
struct Scripted {
    name: &'static str,
    policy: HandlerPolicy,
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(name: &'static str, policy: HandlerPolicy, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            name,
            policy,
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for Scripted {
    fn handler_name(&self) -> &str {
        self.name
    }

    fn policy(&self) -> HandlerPolicy {
        self.policy
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("{} failed for {} on call {}", self.name, event.id, call + 1);
        }
        Ok(())
    }
}

struct Harness {
    engine: Arc<EventEngine>,
    store: Arc<InMemoryEventStore>,
    bus: Arc<TrackedEventBus>,
    clock: ManualClock,
}

impl Harness {
    fn new(config: EventEngineConfig) -> Self {
        let clock = ManualClock::default();
        let store = Arc::new(InMemoryEventStore::with_clock(Arc::new(clock.clone())));
        let bus = Arc::new(TrackedEventBus::new(Arc::new(InMemoryEventBus::new())));
        let engine = EventEngine::builder()
            .store(store.clone())
            .bus(bus.clone())
            .config(config)
            .build()
            .unwrap();

        Self {
            engine: Arc::new(engine),
            store,
            bus,
            clock,
        }
    }

    async fn status(&self, id: i64) -> (EventStatus, i32) {
        let row = self.store.find(id).await.unwrap().unwrap();
        (row.status(), row.attempts())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn single_failure_is_retried_after_two_seconds() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let payments = Scripted::new("payments", HandlerPolicy::retryable(), 1);
    h.bus.register::<OrderPlaced, _>(payments.clone())?;
    let id = h.store.append("order.placed", &order("o-1"), 5).await?;

    let first = h.engine.poll_once().await?;
    assert_eq!(first.retried, 1);
    let row = h.store.find(id).await?.unwrap();
    assert_eq!(row.status(), EventStatus::Pending);
    assert_eq!(row.attempts(), 1);
    assert_eq!(row.next_attempt_at(), h.clock.now() + TimeDelta::seconds(2));

    // 退避期内不会再次投递
    assert_eq!(h.engine.poll_once().await?.fetched, 0);

    h.clock.advance(Duration::from_secs(2));
    let second = h.engine.poll_once().await?;
    assert_eq!(second.succeeded, 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 1));
    assert_eq!(payments.calls(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn two_failures_back_off_two_then_four_seconds() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    h.bus
        .register::<OrderPlaced, _>(Scripted::new("inventory", HandlerPolicy::retryable(), 2))?;
    let id = h.store.append("order.placed", &order("o-2"), 5).await?;

    h.engine.poll_once().await?;
    let row = h.store.find(id).await?.unwrap();
    assert_eq!(row.attempts(), 1);
    assert_eq!(row.next_attempt_at(), h.clock.now() + TimeDelta::milliseconds(2000));

    h.clock.advance(Duration::from_millis(2000));
    h.engine.poll_once().await?;
    let row = h.store.find(id).await?.unwrap();
    assert_eq!(row.attempts(), 2);
    assert_eq!(row.next_attempt_at(), h.clock.now() + TimeDelta::milliseconds(4000));

    h.clock.advance(Duration::from_millis(4000));
    h.engine.poll_once().await?;
    assert_eq!(h.status(id).await, (EventStatus::Success, 2));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_errors_never_cause_a_retry() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let logger = Scripted::new("activity-logger", HandlerPolicy::default(), usize::MAX);
    h.bus.register::<OrderPlaced, _>(logger.clone())?;
    let id = h.store.append("order.placed", &order("o-3"), 5).await?;

    let report = h.engine.poll_once().await?;
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 0));

    h.clock.advance(Duration::from_secs(60));
    assert_eq!(h.engine.poll_once().await?, TickReport::default());
    assert_eq!(logger.calls(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_attempts_end_in_failed_and_stay_there() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    h.bus
        .register::<OrderPlaced, _>(Scripted::new("payments", HandlerPolicy::retryable(), usize::MAX))?;
    let id = h.store.append("order.placed", &order("o-4"), 3).await?;

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(h.engine.poll_once().await?);
        let (_, attempts) = h.status(id).await;
        assert!(attempts <= 3);
        h.clock.advance(Duration::from_secs(3600));
    }

    assert_eq!(reports[0].retried, 1);
    assert_eq!(reports[1].retried, 1);
    assert_eq!(reports[2].failed, 1);
    assert_eq!(h.status(id).await, (EventStatus::Failed, 3));

    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(h.engine.poll_once().await?.fetched, 0);
    h.store.mark_success(id).await?;
    assert_eq!(h.status(id).await, (EventStatus::Failed, 3));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn propagated_exceptions_still_record_the_failure() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let policy = HandlerPolicy::builder()
        .retryable(true)
        .propagate_exception(true)
        .build();
    h.bus
        .register::<OrderPlaced, _>(Scripted::new("payments", policy, 1))?;
    let id = h.store.append("order.placed", &order("o-5"), 5).await?;

    let report = h.engine.poll_once().await?;
    assert_eq!(report.retried, 1);
    assert_eq!(h.status(id).await, (EventStatus::Pending, 1));
    Ok(())
}

/// 永不在超时内完成的处理器
struct Stalled {
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler<OrderPlaced> for Stalled {
    fn handler_name(&self) -> &str {
        "stalled"
    }

    fn policy(&self) -> HandlerPolicy {
        HandlerPolicy::builder()
            .retryable(true)
            .timeout(Duration::from_secs(1))
            .build()
    }

    async fn handle(&self, _event: &OrderPlaced) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn unresolved_timeout_retries_and_late_report_is_ignored() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let finished = Arc::new(AtomicUsize::new(0));
    h.bus.register::<OrderPlaced, _>(Arc::new(Stalled {
        finished: finished.clone(),
    }))?;
    let id = h.store.append("order.placed", &order("o-6"), 5).await?;

    let report = h.engine.poll_once().await?;
    assert_eq!(report.retried, 1);
    assert_eq!(h.status(id).await, (EventStatus::Pending, 1));
    assert_eq!(h.engine.in_flight(), 0);

    // 迟到的完成信号落在已释放的槽位上
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(id).await, (EventStatus::Pending, 1));
    assert_eq!(h.engine.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn assume_success_policy_marks_timed_out_events_delivered() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig {
        timeout_policy: TimeoutPolicy::AssumeSuccess,
        ..EventEngineConfig::default()
    });
    h.bus.register::<OrderPlaced, _>(Arc::new(Stalled {
        finished: Arc::new(AtomicUsize::new(0)),
    }))?;
    let id = h.store.append("order.placed", &order("o-7"), 5).await?;

    let report = h.engine.poll_once().await?;
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 0));
    Ok(())
}

/// 记录同一事件的最大并发处理数
struct Exclusive {
    hold: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Exclusive {
    fn holding(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for Exclusive {
    fn handler_name(&self) -> &str {
        "exclusive"
    }

    async fn handle(&self, _event: &OrderPlaced) -> anyhow::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_ticks_never_dispatch_the_same_event_twice() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let spy = Exclusive::holding(Duration::from_millis(50));
    h.bus.register::<OrderPlaced, _>(spy.clone())?;
    let id = h.store.append("order.placed", &order("o-8"), 5).await?;

    let (a, b) = tokio::join!(h.engine.poll_once(), h.engine.poll_once());
    let (a, b) = (a?, b?);

    assert_eq!(a.fetched + b.fetched, 1);
    assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
    assert_eq!(spy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reclaimed_row_is_skipped_while_its_dispatch_is_running() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let spy = Exclusive::holding(Duration::from_millis(800));
    h.bus.register::<OrderPlaced, _>(spy.clone())?;
    let id = h.store.append("order.placed", &order("o-10"), 5).await?;

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.poll_once().await });
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while spy.calls.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(spy.calls.load(Ordering::SeqCst), 1);

    // 存储时钟越过租约，行再次到期
    h.clock.advance(Duration::from_secs(31));
    let second = h.engine.poll_once().await?;
    assert_eq!(second.fetched, 1);
    assert_eq!(second.skipped, 1);

    let first = first.await??;
    assert_eq!(first.succeeded, 1);
    assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
    assert_eq!(spy.peak.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 0));
    Ok(())
}

#[tokio::test]
async fn handler_timeouts_must_fit_inside_the_claim_lease() -> AnyResult<()> {
    let system = EventSystem::builder()
        .store(Arc::new(
            InMemoryEventStore::new().with_lease(Duration::from_secs(10)),
        ))
        .build()?;

    let too_slow = HandlerPolicy::builder()
        .retryable(true)
        .timeout(Duration::from_secs(60))
        .build();
    let err = system
        .register::<OrderPlaced, _>(Scripted::new("reports", too_slow, 0))
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidConfig { .. }));

    let at_lease = HandlerPolicy::builder()
        .timeout(Duration::from_secs(10))
        .build();
    assert!(system
        .register::<OrderPlaced, _>(Scripted::new("reports", at_lease, 0))
        .is_err());

    system.register::<OrderPlaced, _>(Scripted::new("payments", HandlerPolicy::retryable(), 0))?;
    assert_eq!(system.bus().classifier().entries("order.placed").len(), 1);
    Ok(())
}

/// 延迟后按脚本成功或失败
struct Delayed {
    name: &'static str,
    policy: HandlerPolicy,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl Delayed {
    fn new(name: &'static str, policy: HandlerPolicy, delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            policy,
            delay,
            fail,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for Delayed {
    fn handler_name(&self) -> &str {
        self.name
    }

    fn policy(&self) -> HandlerPolicy {
        self.policy
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("{} failed for {}", self.name, event.id);
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn shared_slot_takes_the_first_report_from_several_handlers() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let logger = Delayed::new("activity-logger", HandlerPolicy::default(), Duration::ZERO, true);
    let payments = Delayed::new(
        "payments",
        HandlerPolicy::builder()
            .retryable(true)
            .timeout(Duration::from_secs(10))
            .build(),
        Duration::from_millis(200),
        true,
    );
    h.bus.register::<OrderPlaced, _>(logger.clone())?;
    h.bus.register::<OrderPlaced, _>(payments.clone())?;

    let policy = h.bus.classifier().dispatch_policy("order.placed");
    assert_eq!(policy.timeout, Duration::from_secs(10));
    assert_eq!(policy.handlers, 2);
    assert!(policy.retryable);

    let id = h.store.append("order.placed", &order("o-11"), 5).await?;
    let report = h.engine.poll_once().await?;

    // 不可重试处理器先报告，闸门随即打开；稍后可重试处理器的失败落在已释放的槽位上
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 0));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(payments.calls.load(Ordering::SeqCst), 1);
    assert_eq!(logger.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(id).await, (EventStatus::Success, 0));
    assert_eq!(h.engine.in_flight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shared_slot_retries_when_the_failing_handler_reports_first() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    h.bus.register::<OrderPlaced, _>(Delayed::new(
        "payments",
        HandlerPolicy::retryable(),
        Duration::ZERO,
        true,
    ))?;
    h.bus.register::<OrderPlaced, _>(Delayed::new(
        "email-notifier",
        HandlerPolicy::default(),
        Duration::from_millis(200),
        false,
    ))?;
    let id = h.store.append("order.placed", &order("o-12"), 5).await?;

    let report = h.engine.poll_once().await?;
    assert_eq!(report.retried, 1);
    assert_eq!(h.status(id).await, (EventStatus::Pending, 1));
    Ok(())
}

#[derive(Default)]
struct LegacyAudit {
    seen: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl EventHandler<GenericEvent> for LegacyAudit {
    fn handler_name(&self) -> &str {
        "legacy-audit"
    }

    async fn handle(&self, event: &GenericEvent) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((event.event_type().to_string(), event.event_id()));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_events_reach_generic_handlers() -> AnyResult<()> {
    let h = Harness::new(EventEngineConfig::default());
    let audit = Arc::new(LegacyAudit::default());
    h.bus.register::<GenericEvent, _>(audit.clone())?;
    h.bus
        .register::<OrderPlaced, _>(Scripted::new("payments", HandlerPolicy::retryable(), 0))?;

    let unknown = h
        .store
        .append("customer.renamed", r#"{"id":"c-1","name":"x"}"#, 5)
        .await?;
    let malformed = h
        .store
        .append("order.placed", r#"{"id":"o-9","amount":"lots"}"#, 5)
        .await?;

    let report = h.engine.poll_once().await?;
    assert_eq!(report.succeeded, 2);
    assert_eq!(h.status(unknown).await.0, EventStatus::Success);
    assert_eq!(h.status(malformed).await.0, EventStatus::Success);

    let mut seen = audit.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            ("customer.renamed".to_string(), Some("c-1".to_string())),
            ("order.placed".to_string(), Some("o-9".to_string())),
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn event_system_publishes_and_delivers_with_retry() -> AnyResult<()> {
    let system = EventSystem::builder()
        .store(Arc::new(InMemoryEventStore::new()))
        .config(EventEngineConfig {
            poll_interval: Duration::from_millis(20),
            ..EventEngineConfig::default()
        })
        .backoff(BackoffPolicy::new(Duration::from_millis(10)))
        .build()?;

    let payments = Scripted::new("payments", HandlerPolicy::retryable(), 2);
    system.register::<OrderPlaced, _>(payments.clone())?;

    let handle = system.start();
    let retried = system
        .publish(&OrderPlaced {
            id: ulid::Ulid::new().to_string(),
            amount: 5,
        })
        .await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let row = system.store().find(retried).await?.unwrap();
        if row.status() != EventStatus::Pending || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown();
    handle.join().await;

    let row = system.store().find(retried).await?.unwrap();
    assert_eq!(row.status(), EventStatus::Success);
    assert_eq!(row.attempts(), 2);
    assert_eq!(payments.calls(), 3);
    assert_eq!(system.counts().await?.success, 1);
    assert_eq!(OrderPlaced::EVENT_TYPE, "order.placed");
    Ok(())
}
