//! 投递引擎（EventEngine）
//!
//! 统一编排“轮询 → 解码 → 分发 → 等待完成 → 落库”的长驻任务：
//! - 固定间隔认领一批到期事件，交给有界工作池；
//! - 每个工作者登记闸门、经可追踪总线分发，并在超时内等待完成信号；
//! - 按结果标记成功，或按退避策略安排重试/终止；
//! - 提供关闭与等待的 `EngineHandle`。
//!
//! 单次 tick 只认领与空闲工作者数量相同的行，认领后的事件不会在队列中
//! 等到租约过期。相邻 tick 可以重叠。
//!
//! 同一存储 id 同时至多一次分发：构建时把存储的租约绑定到总线，等待超时
//! 不小于租约的处理器无法登记；进程内另有一份分发中 id 集合，再次认领到
//! 仍在分发的行时跳过。
//!
use super::backoff::{BackoffPolicy, RetryDecision};
use super::correlator::{Completion, Correlator};
use super::tracked_bus::TrackedEventBus;
use crate::error::{RelayError, RelayResult as Result};
use crate::event::CorrelationId;
use crate::persist::{EventStore, StoredEvent};
use bon::bon;
use dashmap::DashSet;
use futures_util::{StreamExt, stream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

/// 等待超时且闸门未打开时的处置，二者只取其一
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// 视为未完成，按失败进入退避重试
    #[default]
    Retry,
    /// 视为已完成
    AssumeSuccess,
}

/// 投递引擎配置
#[derive(Clone, Copy, Debug)]
pub struct EventEngineConfig {
    /// 轮询间隔
    pub poll_interval: Duration,
    /// 单次认领上限
    ///
    /// 实际认领数为 `min(batch_size, 空闲工作者数)`，缺省配置下单次至多 5 行。
    pub batch_size: usize,
    /// 工作池大小（跨 tick 共享）
    pub concurrency: usize,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for EventEngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 20,
            concurrency: 5,
            timeout_policy: TimeoutPolicy::Retry,
        }
    }
}

impl EventEngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(RelayError::invalid_config("poll_interval must be positive"));
        }
        if self.batch_size == 0 {
            return Err(RelayError::invalid_config("batch_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(RelayError::invalid_config("concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// 单个事件的处理结局
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded,
    Retried { attempt: i32, delay: Duration },
    Failed { attempt: i32 },
    /// 落库失败，行保持租约，租约到期后重新到期
    Unsettled,
    /// 该行仍在本进程内分发，未再次分发
    Skipped,
}

/// 单次 tick 的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    pub unsettled: usize,
    pub skipped: usize,
}

impl TickReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Succeeded => self.succeeded += 1,
            DispatchOutcome::Retried { .. } => self.retried += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::Unsettled => self.unsettled += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
        }
    }
}

enum Verdict {
    Delivered,
    Failed(String),
}

pub struct EventEngine {
    store: Arc<dyn EventStore>,
    bus: Arc<TrackedEventBus>,
    config: EventEngineConfig,
    backoff: BackoffPolicy,
    correlator: Correlator,
    workers: Arc<Semaphore>,
    dispatching: DashSet<i64>,
}

#[bon]
impl EventEngine {
    #[builder]
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<TrackedEventBus>,
        #[builder(default)] config: EventEngineConfig,
        #[builder(default)] backoff: BackoffPolicy,
    ) -> Result<Self> {
        config.validate()?;
        bus.bind_lease(store.lease())?;

        Ok(Self {
            store,
            bus,
            config,
            backoff,
            correlator: Correlator::new(),
            workers: Arc::new(Semaphore::new(config.concurrency)),
            dispatching: DashSet::new(),
        })
    }
}

impl EventEngine {
    pub fn config(&self) -> &EventEngineConfig {
        &self.config
    }

    /// 仍在等待完成信号的分发数量
    pub fn in_flight(&self) -> usize {
        self.correlator.pending()
    }

    /// 启动轮询，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        let ticker = {
            let engine = self.clone();
            let tracker = tracker.clone();

            Self::spawn_periodic(token.clone(), self.config.poll_interval, move || {
                let engine = engine.clone();
                tracker.spawn(async move {
                    if let Err(err) = engine.poll_once().await {
                        tracing::error!(error = %err, "poll tick failed");
                    }
                });
                async {}
            })
        };

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "event engine started"
        );

        EngineHandle {
            token,
            tasks: vec![ticker],
            tracker,
        }
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    /// 执行一次 tick：认领、分发并等待本批全部落库
    pub async fn poll_once(&self) -> Result<TickReport> {
        let mut permits = self.reserve_workers();
        if permits.is_empty() {
            tracing::debug!("all workers busy, skipping tick");
            return Ok(TickReport::default());
        }

        let events = self.store.fetch_due(permits.len()).await?;
        permits.truncate(events.len());

        let mut report = TickReport {
            fetched: events.len(),
            ..TickReport::default()
        };
        if events.is_empty() {
            return Ok(report);
        }
        tracing::debug!(fetched = report.fetched, "claimed due events");

        let outcomes: Vec<DispatchOutcome> = stream::iter(events.into_iter().zip(permits))
            .map(|(event, permit)| async move {
                let outcome = self.process(event).await;
                drop(permit);
                outcome
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            report.record(outcome);
        }
        Ok(report)
    }

    fn reserve_workers(&self) -> Vec<OwnedSemaphorePermit> {
        let mut permits = Vec::new();
        while permits.len() < self.config.batch_size {
            match self.workers.clone().try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        permits
    }

    async fn process(&self, event: StoredEvent) -> DispatchOutcome {
        if !self.dispatching.insert(event.id()) {
            tracing::warn!(event_id = event.id(), "event is still being dispatched, skipping");
            return DispatchOutcome::Skipped;
        }

        let outcome = self.process_claimed(&event).await;
        self.dispatching.remove(&event.id());
        outcome
    }

    async fn process_claimed(&self, event: &StoredEvent) -> DispatchOutcome {
        let attempt = event.attempts().saturating_add(1);
        let span = tracing::info_span!(
            "dispatch",
            event_id = event.id(),
            event_type = %event.event_type(),
            attempt,
            correlation_id = tracing::field::Empty,
        );

        async {
            let verdict = self.dispatch(event, attempt).await;
            self.settle(event, verdict).await
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, event: &StoredEvent, attempt: i32) -> Verdict {
        let decoded = self.bus.decode(event.event_type(), event.payload());
        let correlation_id = CorrelationId::derive(
            decoded.identity().map(str::to_string),
            event.event_type(),
            event.payload(),
            event.id(),
            attempt,
        );
        tracing::Span::current().record("correlation_id", tracing::field::display(&correlation_id));

        let policy = self.bus.classifier().dispatch_policy(decoded.route());
        let mut gate = self.correlator.prepare(correlation_id.clone());
        let envelope = decoded.envelope().with_reporter(gate.reporter());

        let verdict = match self.bus.post(envelope).await {
            Ok(0) => {
                tracing::info!(route = decoded.route(), "no subscribers, dead event treated as delivered");
                Verdict::Delivered
            }
            Ok(_) => match gate.wait(policy.timeout).await {
                Completion::Resolved(result) if result.is_success() => Verdict::Delivered,
                Completion::Resolved(result) => Verdict::Failed(
                    result
                        .error()
                        .unwrap_or("handler reported failure")
                        .to_string(),
                ),
                Completion::TimedOut => {
                    let err = RelayError::CorrelationTimeout {
                        correlation_id: correlation_id.to_string(),
                        timeout: policy.timeout,
                    };
                    match self.config.timeout_policy {
                        TimeoutPolicy::Retry => {
                            tracing::warn!(error = %err, "no completion signal, scheduling retry");
                            Verdict::Failed(err.to_string())
                        }
                        TimeoutPolicy::AssumeSuccess => {
                            tracing::warn!(error = %err, "no completion signal, assuming success");
                            Verdict::Delivered
                        }
                    }
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "post failed");
                Verdict::Failed(err.to_string())
            }
        };

        gate.release();
        verdict
    }

    async fn settle(&self, event: &StoredEvent, verdict: Verdict) -> DispatchOutcome {
        match verdict {
            Verdict::Delivered => match self.store.mark_success(event.id()).await {
                Ok(()) => {
                    tracing::debug!("event delivered");
                    DispatchOutcome::Succeeded
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to mark event delivered");
                    DispatchOutcome::Unsettled
                }
            },
            Verdict::Failed(reason) => {
                let decision = self.backoff.decide(event.attempts(), event.max_attempts());
                if let Err(err) = self
                    .store
                    .mark_failed(event.id(), decision.attempt(), decision.backoff())
                    .await
                {
                    tracing::error!(error = %err, "failed to record delivery failure");
                    return DispatchOutcome::Unsettled;
                }

                match decision {
                    RetryDecision::Retry { attempt, delay } => {
                        tracing::warn!(
                            reason = %reason,
                            delay_ms = delay.as_millis() as u64,
                            "delivery failed, retry scheduled"
                        );
                        DispatchOutcome::Retried { attempt, delay }
                    }
                    RetryDecision::Exhausted { attempt } => {
                        tracing::error!(reason = %reason, "delivery attempts exhausted, event failed");
                        DispatchOutcome::Failed { attempt }
                    }
                }
            }
        }
    }
}

/// 引擎运行句柄：用于优雅关闭与等待任务结束
pub struct EngineHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    tracker: TaskTracker,
}

impl EngineHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// 等待轮询任务退出，并等待已开始的 tick 处理完毕
    pub async fn join(mut self) {
        let tasks = std::mem::take(&mut self.tasks);

        for t in tasks {
            let _ = t.await;
        }

        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
