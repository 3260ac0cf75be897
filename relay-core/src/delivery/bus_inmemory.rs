//! 内存版事件总线（InMemoryEventBus）
//!
//! 以路由为键保存订阅者，满足 `EventBus` 协议：
//! - `register`：登记订阅者；
//! - `post`：为每个匹配的订阅者 `tokio::spawn` 一个任务后立即返回；
//! - 订阅者返回的错误在其任务内记录日志，不回传给调用方。
//!
use crate::delivery::{Envelope, EventBus, Subscriber};
use crate::error::RelayResult as Result;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    routes: DashMap<String, Vec<Subscriber>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, route: &str) -> usize {
        self.routes.get(route).map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn register(&self, subscriber: Subscriber) -> Result<()> {
        self.routes
            .entry(subscriber.route().to_string())
            .or_default()
            .push(subscriber);
        Ok(())
    }

    async fn post(&self, envelope: Envelope) -> Result<usize> {
        // 先克隆出订阅者列表，避免持有分片锁跨越 spawn
        let subscribers = self
            .routes
            .get(envelope.route())
            .map(|s| s.value().clone())
            .unwrap_or_default();

        for subscriber in &subscribers {
            let fut = subscriber.invoke(envelope.clone());
            let name = subscriber.name().to_string();
            let route = envelope.route().to_string();

            tokio::spawn(async move {
                if let Err(err) = fut.await {
                    tracing::error!(subscriber = %name, route = %route, error = %err, "subscriber failed");
                }
            });
        }

        Ok(subscribers.len())
    }
}
