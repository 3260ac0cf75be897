//! 混合监听器演示
//!
//! 加载配置、初始化日志，注册关键/非关键监听器后发布若干订单事件，
//! 运行一段时间后输出各状态的事件数量。
//!
mod listeners;
mod settings;

use anyhow::{Context, Result as AnyResult};
use listeners::{
    ActivityLogger, EmailNotifier, InventoryManager, MetricsCollector, OrderPlaced,
    PaymentProcessor,
};
use relay_core::EventSystem;
use relay_core::persist::{EventStore, InMemoryEventStore};
use settings::{LogFormat, Settings};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use ulid::Ulid;

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .init(),
    }
}

async fn open_store(settings: &Settings) -> AnyResult<Arc<dyn EventStore>> {
    #[cfg(feature = "postgres")]
    {
        if let Some(url) = settings.database_url.as_deref() {
            let pool = sqlx::PgPool::connect(url)
                .await
                .context("failed to connect to postgres")?;
            let store = relay_core::persist::PgEventStore::new(pool);
            store.init_schema().await?;
            tracing::info!("using postgres event store");
            return Ok(Arc::new(store));
        }
    }

    if settings.database_url.is_some() && cfg!(not(feature = "postgres")) {
        tracing::warn!("database_url is set but the `postgres` feature is disabled, using memory");
    }
    Ok(Arc::new(InMemoryEventStore::new()))
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_logging(settings.log_format);
    tracing::info!(?settings, "settings loaded");

    let system = EventSystem::builder()
        .store(open_store(&settings).await?)
        .config(settings.engine_config())
        .backoff(settings.backoff())
        .max_attempts(settings.max_attempts)
        .build()?;

    system.register::<OrderPlaced, _>(Arc::new(PaymentProcessor::new(
        settings.payment_failure_every,
    )))?;
    system.register::<OrderPlaced, _>(Arc::new(InventoryManager::new(
        settings.inventory_failure_every,
    )))?;
    system.register::<OrderPlaced, _>(Arc::new(ActivityLogger::new()))?;
    system.register::<OrderPlaced, _>(Arc::new(MetricsCollector::default()))?;
    system.register::<OrderPlaced, _>(Arc::new(EmailNotifier))?;

    let handle = system.start();

    for n in 0..settings.orders {
        let order = OrderPlaced {
            id: Ulid::new().to_string(),
            amount_cents: 1_000 + 250 * n as u64,
        };
        let stored_id = system.publish(&order).await?;
        tracing::info!(stored_id, order = %order.id, "order published");
    }

    tokio::time::sleep(Duration::from_secs(settings.run_seconds)).await;
    handle.shutdown();
    handle.join().await;

    let counts = system.counts().await?;
    tracing::info!(
        pending = counts.pending,
        success = counts.success,
        failed = counts.failed,
        "delivery summary"
    );
    println!(
        "pending={} success={} failed={}",
        counts.pending, counts.success, counts.failed
    );
    Ok(())
}
