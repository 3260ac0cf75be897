/// 投递引擎（内存版）示例
/// 逐次 tick 展示：可重试处理器失败 -> 指数退避 -> 重投成功；不可重试处理器失败即视为已投递
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use relay_core::clock::{Clock, ManualClock};
use relay_core::delivery::{
    EventEngine, EventHandler, HandlerPolicy, InMemoryEventBus, TrackedEventBus,
};
use relay_core::persist::{EventStore, InMemoryEventStore};
use relay_macros::event;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[event(event_type = "invoice.issued")]
struct InvoiceIssued {
    id: String,
    total_cents: u64,
}

#[event(event_type = "invoice.voided")]
struct InvoiceVoided {
    id: String,
}

// ============================================================================
// 处理器
// ============================================================================

/// 前两次调用失败的对账处理器（可重试）
#[derive(Default)]
struct Reconciler {
    calls: AtomicUsize,
}

#[async_trait]
impl EventHandler<InvoiceIssued> for Reconciler {
    fn handler_name(&self) -> &str {
        "reconciler"
    }

    fn policy(&self) -> HandlerPolicy {
        HandlerPolicy::retryable()
    }

    async fn handle(&self, event: &InvoiceIssued) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= 2 {
            println!("  [reconciler] call {call} for {}: ledger unavailable", event.id);
            anyhow::bail!("ledger unavailable");
        }
        println!(
            "  [reconciler] call {call} for {}: reconciled {} cents",
            event.id, event.total_cents
        );
        Ok(())
    }
}

/// 总是失败的通知处理器（不可重试）
struct Notifier;

#[async_trait]
impl EventHandler<InvoiceVoided> for Notifier {
    fn handler_name(&self) -> &str {
        "notifier"
    }

    async fn handle(&self, event: &InvoiceVoided) -> anyhow::Result<()> {
        println!("  [notifier] smtp down while notifying {}", event.id);
        anyhow::bail!("smtp down")
    }
}

// ============================================================================
// 演示
// ============================================================================

#[tokio::main]
async fn main() -> AnyResult<()> {
    println!("=== 投递引擎（内存版）示例 ===\n");

    let clock = ManualClock::default();
    let store = Arc::new(InMemoryEventStore::with_clock(Arc::new(clock.clone())));
    let bus = Arc::new(TrackedEventBus::new(Arc::new(InMemoryEventBus::new())));
    bus.register::<InvoiceIssued, _>(Arc::new(Reconciler::default()))?;
    bus.register::<InvoiceVoided, _>(Arc::new(Notifier))?;

    let engine = EventEngine::builder()
        .store(store.clone())
        .bus(bus)
        .build()?;

    let issued = store
        .append(
            "invoice.issued",
            &serde_json::to_string(&InvoiceIssued {
                id: "inv-1".into(),
                total_cents: 12_500,
            })?,
            5,
        )
        .await?;
    let voided = store
        .append(
            "invoice.voided",
            &serde_json::to_string(&InvoiceVoided { id: "inv-0".into() })?,
            5,
        )
        .await?;

    for tick in 1..=3 {
        let report = engine.poll_once().await?;
        println!("tick {tick}: {report:?}");

        for id in [issued, voided] {
            if let Some(row) = store.find(id).await? {
                let wait = (row.next_attempt_at() - clock.now()).num_milliseconds().max(0);
                println!(
                    "  #{id} {} status={} attempts={} next_in={}ms",
                    row.event_type(),
                    row.status(),
                    row.attempts(),
                    wait
                );
            }
        }

        // 跳过本轮退避
        clock.advance(Duration::from_secs(2u64.pow(tick)));
    }

    Ok(())
}
