//! 订单事件的混合监听器
//!
//! - 关键：支付、库存（可重试，失败后按退避重投）
//! - 非关键：活动日志、指标、邮件（失败只记录，事件视为已投递）
//!
use async_trait::async_trait;
use relay_core::delivery::{EventHandler, HandlerPolicy};
use relay_macros::event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[event(event_type = "order.placed")]
pub struct OrderPlaced {
    pub id: String,
    pub amount_cents: u64,
}

/// 每 `every` 次调用失败一次
#[derive(Debug, Default)]
struct Flaky {
    every: usize,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(every: usize) -> Self {
        Self {
            every,
            calls: AtomicUsize::new(0),
        }
    }

    fn should_fail(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.every > 0 && call % self.every == 0
    }
}

pub struct PaymentProcessor {
    flaky: Flaky,
}

impl PaymentProcessor {
    pub fn new(failure_every: usize) -> Self {
        Self {
            flaky: Flaky::new(failure_every),
        }
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for PaymentProcessor {
    fn handler_name(&self) -> &str {
        "payment-processor"
    }

    fn policy(&self) -> HandlerPolicy {
        HandlerPolicy::retryable()
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        tracing::info!(order = %event.id, amount_cents = event.amount_cents, "processing payment");
        if self.flaky.should_fail() {
            anyhow::bail!("payment gateway timeout");
        }
        tracing::info!(order = %event.id, "payment captured");
        Ok(())
    }
}

pub struct InventoryManager {
    flaky: Flaky,
}

impl InventoryManager {
    pub fn new(failure_every: usize) -> Self {
        Self {
            flaky: Flaky::new(failure_every),
        }
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for InventoryManager {
    fn handler_name(&self) -> &str {
        "inventory-manager"
    }

    fn policy(&self) -> HandlerPolicy {
        HandlerPolicy::builder()
            .retryable(true)
            .timeout(Duration::from_secs(10))
            .build()
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        tracing::info!(order = %event.id, "reserving stock");
        if self.flaky.should_fail() {
            anyhow::bail!("inventory database connection failed");
        }
        Ok(())
    }
}

pub struct ActivityLogger {
    flaky: Flaky,
}

impl ActivityLogger {
    pub fn new() -> Self {
        Self {
            flaky: Flaky::new(3),
        }
    }
}

#[async_trait]
impl EventHandler<OrderPlaced> for ActivityLogger {
    fn handler_name(&self) -> &str {
        "activity-logger"
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        if self.flaky.should_fail() {
            anyhow::bail!("logging service unavailable");
        }
        tracing::info!(order = %event.id, "activity recorded");
        Ok(())
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    total_cents: AtomicUsize,
}

#[async_trait]
impl EventHandler<OrderPlaced> for MetricsCollector {
    fn handler_name(&self) -> &str {
        "metrics-collector"
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        let amount = usize::try_from(event.amount_cents).unwrap_or(usize::MAX);
        let total = self.total_cents.fetch_add(amount, Ordering::Relaxed) + amount;
        tracing::debug!(order = %event.id, total_cents = total, "metrics collected");
        Ok(())
    }
}

pub struct EmailNotifier;

#[async_trait]
impl EventHandler<OrderPlaced> for EmailNotifier {
    fn handler_name(&self) -> &str {
        "email-notifier"
    }

    async fn handle(&self, event: &OrderPlaced) -> anyhow::Result<()> {
        tracing::info!(order = %event.id, "confirmation e-mail sent");
        Ok(())
    }
}
