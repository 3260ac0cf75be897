//! 可追踪的事件总线（TrackedEventBus）
//!
//! 以组合方式包装 `EventBus` 原语：
//! - `register`：登记处理器策略与解码器，并把处理器包装成订阅者交给原语；
//! - 包装后的订阅者捕获处理器的错误与 panic，交由分类器归类后打开闸门；
//! - `decode`：按存储的事件类型还原事件，无法还原时回退到 `GenericEvent`。
//!
//! 总线本身从不假定成功，成功与否只来自处理器的报告。
//!
//! 绑定到引擎后，总线记住存储的认领租约：等待超时不小于租约的处理器会被拒绝，
//! 否则行会在工作者仍在等待时重新到期并被再次认领。
//!
use super::classifier::{HandlerEntry, RetryClassifier};
use super::handler::EventHandler;
use super::{Envelope, EventBus, Subscriber, SubscriberFn};
use crate::error::{RelayError, RelayResult as Result};
use crate::event::{Event, GenericEvent};
use anyhow::anyhow;
use dashmap::DashMap;
use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

type DecodeFn = Arc<dyn Fn(&str) -> Result<Decoded> + Send + Sync>;

/// 解码后的事件，可直接封装为信封分发
#[derive(Clone)]
pub struct Decoded {
    route: String,
    event: Arc<dyn Any + Send + Sync>,
    identity: Option<String>,
    fallback: bool,
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("route", &self.route)
            .field("identity", &self.identity)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl Decoded {
    fn typed<E: Event>(event: E) -> Self {
        Self {
            route: E::EVENT_TYPE.to_string(),
            identity: event.event_id(),
            event: Arc::new(event),
            fallback: false,
        }
    }

    fn generic(event_type: &str, payload: &str) -> Self {
        let event = GenericEvent::from_payload(event_type, payload);
        Self {
            route: GenericEvent::EVENT_TYPE.to_string(),
            identity: event.event_id(),
            event: Arc::new(event),
            fallback: true,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// 是否回退为 `GenericEvent`
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn event(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.event
    }

    pub fn envelope(&self) -> Envelope {
        Envelope::new(self.route.clone(), self.event.clone())
    }
}

pub struct TrackedEventBus {
    inner: Arc<dyn EventBus>,
    classifier: Arc<RetryClassifier>,
    decoders: DashMap<String, DecodeFn>,
    // 毫秒；u64::MAX 表示尚未绑定
    lease_ms: AtomicU64,
}

impl fmt::Debug for TrackedEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedEventBus")
            .field("classifier", &self.classifier)
            .field("decoders", &self.decoders.len())
            .field("lease", &self.lease())
            .finish_non_exhaustive()
    }
}

impl TrackedEventBus {
    pub fn new(inner: Arc<dyn EventBus>) -> Self {
        Self {
            inner,
            classifier: Arc::new(RetryClassifier::new()),
            decoders: DashMap::new(),
            lease_ms: AtomicU64::new(u64::MAX),
        }
    }

    pub fn classifier(&self) -> &RetryClassifier {
        &self.classifier
    }

    /// 已绑定的认领租约（多个引擎共享总线时取最短者）
    pub fn lease(&self) -> Option<Duration> {
        match self.lease_ms.load(Ordering::Acquire) {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// 绑定存储的认领租约；已登记的处理器超时不小于租约时返回 `InvalidConfig`
    pub fn bind_lease(&self, lease: Duration) -> Result<()> {
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX - 1);
        let bound = Duration::from_millis(lease_ms);

        for entries in self.classifier.registered() {
            for entry in entries {
                check_timeout(&entry, bound)?;
            }
        }

        self.lease_ms.fetch_min(lease_ms, Ordering::AcqRel);
        Ok(())
    }

    /// 注册处理器；策略在此时读取一次
    pub fn register<E, H>(&self, handler: Arc<H>) -> Result<()>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let route = E::EVENT_TYPE;
        let entry = HandlerEntry::new(handler.handler_name(), handler.policy());
        if let Some(lease) = self.lease() {
            check_timeout(&entry, lease)?;
        }

        self.classifier.register(route, entry.clone());
        if route != GenericEvent::EVENT_TYPE {
            self.decoders
                .entry(route.to_string())
                .or_insert_with(decoder::<E>);
        }

        tracing::debug!(
            handler = entry.name(),
            event_type = route,
            retryable = entry.policy().retryable,
            "handler registered"
        );

        let name = entry.name().to_string();
        let classifier = self.classifier.clone();
        let call: SubscriberFn = Arc::new(move |envelope: Envelope| -> BoxFuture<'static, Result<()>> {
            let handler = handler.clone();
            let classifier = classifier.clone();
            let entry = entry.clone();

            Box::pin(async move {
                let outcome = match envelope.event().clone().downcast::<E>() {
                    Ok(event) => AssertUnwindSafe(handler.handle(&event))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(anyhow!("handler panicked: {}", panic_message(&*panic)))
                        }),
                    Err(_) => Err(anyhow!("event type mismatch on route {route}")),
                };

                classifier
                    .classify(&entry, outcome, envelope.reporter())
                    .map(|_| ())
            })
        });

        self.inner.register(Subscriber::new(name, route, call))
    }

    /// 按存储的类型还原事件；未注册的类型或不匹配的载荷回退为 `GenericEvent`
    pub fn decode(&self, event_type: &str, payload: &str) -> Decoded {
        let decoder = self.decoders.get(event_type).map(|d| d.value().clone());

        match decoder.map(|decode| decode(payload)) {
            Some(Ok(decoded)) => decoded,
            Some(Err(err)) => {
                tracing::warn!(event_type, error = %err, "payload does not match registered type, falling back to GenericEvent");
                Decoded::generic(event_type, payload)
            }
            None => {
                tracing::warn!(event_type, "no registered type, falling back to GenericEvent");
                Decoded::generic(event_type, payload)
            }
        }
    }

    /// 转发给原语；返回命中的订阅者数量
    pub async fn post(&self, envelope: Envelope) -> Result<usize> {
        self.inner.post(envelope).await
    }
}

fn check_timeout(entry: &HandlerEntry, lease: Duration) -> Result<()> {
    let timeout = entry.policy().timeout;
    if timeout >= lease {
        return Err(RelayError::invalid_config(format!(
            "handler `{}` timeout {timeout:?} must be shorter than the claim lease {lease:?}",
            entry.name()
        )));
    }
    Ok(())
}

fn decoder<E: Event>() -> DecodeFn {
    Arc::new(|payload| {
        let event: E =
            serde_json::from_str(payload).map_err(|e| RelayError::Deserialization {
                event_type: E::EVENT_TYPE.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Decoded::typed(event))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
