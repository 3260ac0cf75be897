//! 事件系统门面（EventSystem）
//!
//! 组合存储、可追踪总线与投递引擎，对外提供 `register` / `publish` / `start`：
//! 发布即序列化并持久化，真正的分发由引擎的轮询完成。
//!
use crate::delivery::{
    BackoffPolicy, EngineHandle, EventBus, EventEngine, EventEngineConfig, EventHandler,
    InMemoryEventBus, TrackedEventBus,
};
use crate::error::{RelayError, RelayResult as Result};
use crate::event::Event;
use crate::persist::{DEFAULT_MAX_ATTEMPTS, EventStatus, EventStore};
use bon::bon;
use std::sync::Arc;

/// 各状态的事件数量
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}

pub struct EventSystem {
    store: Arc<dyn EventStore>,
    bus: Arc<TrackedEventBus>,
    engine: Arc<EventEngine>,
    max_attempts: i32,
}

#[bon]
impl EventSystem {
    #[builder]
    pub fn new(
        store: Arc<dyn EventStore>,
        // 缺省为 InMemoryEventBus
        bus: Option<Arc<dyn EventBus>>,
        #[builder(default)] config: EventEngineConfig,
        #[builder(default)] backoff: BackoffPolicy,
        #[builder(default = DEFAULT_MAX_ATTEMPTS)] max_attempts: i32,
    ) -> Result<Self> {
        if max_attempts < 1 {
            return Err(RelayError::invalid_config(format!(
                "max_attempts must be at least 1, got {max_attempts}"
            )));
        }

        let primitive: Arc<dyn EventBus> = match bus {
            Some(bus) => bus,
            None => Arc::new(InMemoryEventBus::new()),
        };
        let bus = Arc::new(TrackedEventBus::new(primitive));
        let engine = EventEngine::builder()
            .store(store.clone())
            .bus(bus.clone())
            .config(config)
            .backoff(backoff)
            .build()?;

        Ok(Self {
            store,
            bus,
            engine: Arc::new(engine),
            max_attempts,
        })
    }
}

impl EventSystem {
    pub fn register<E, H>(&self, handler: Arc<H>) -> Result<()>
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.bus.register::<E, H>(handler)
    }

    /// 序列化并持久化事件，返回存储 id
    pub async fn publish<E: Event>(&self, event: &E) -> Result<i64> {
        self.publish_with_attempts(event, self.max_attempts).await
    }

    pub async fn publish_with_attempts<E: Event>(
        &self,
        event: &E,
        max_attempts: i32,
    ) -> Result<i64> {
        let payload = serde_json::to_string(event)?;
        let id = self
            .store
            .append(event.event_type(), &payload, max_attempts)
            .await?;

        tracing::debug!(
            stored_id = id,
            event_type = event.event_type(),
            event_id = event.event_id().as_deref(),
            max_attempts,
            "event published"
        );
        Ok(id)
    }

    pub fn start(&self) -> EngineHandle {
        self.engine.clone().start()
    }

    pub async fn counts(&self) -> Result<StatusCounts> {
        Ok(StatusCounts {
            pending: self.store.count_by_status(EventStatus::Pending).await?,
            success: self.store.count_by_status(EventStatus::Success).await?,
            failed: self.store.count_by_status(EventStatus::Failed).await?,
        })
    }

    pub fn engine(&self) -> &Arc<EventEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<TrackedEventBus> {
        &self.bus
    }
}
