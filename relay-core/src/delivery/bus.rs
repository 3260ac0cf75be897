//! 事件总线（EventBus）原语
//!
//! 进程内的发布/订阅原语：按路由（事件类型）注册订阅者，`post` 把信封
//! 分发给匹配的订阅者并返回命中数量。原语自行决定在哪个任务上执行订阅者，
//! `post` 返回并不意味着处理完成。
//!
use super::correlator::CompletionReporter;
use crate::error::RelayResult as Result;
use async_trait::async_trait;
use futures_core::future::BoxFuture;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 随事件一同分发的上下文
#[derive(Clone)]
pub struct Envelope {
    route: String,
    event: Arc<dyn Any + Send + Sync>,
    reporter: Option<CompletionReporter>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("route", &self.route)
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

impl Envelope {
    pub fn new(route: impl Into<String>, event: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            route: route.into(),
            event,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: CompletionReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn event(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.event
    }

    pub fn reporter(&self) -> Option<&CompletionReporter> {
        self.reporter.as_ref()
    }
}

pub type SubscriberFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 已类型擦除的订阅者
#[derive(Clone)]
pub struct Subscriber {
    name: String,
    route: String,
    call: SubscriberFn,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

impl Subscriber {
    pub fn new(name: impl Into<String>, route: impl Into<String>, call: SubscriberFn) -> Self {
        Self {
            name: name.into(),
            route: route.into(),
            call,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn invoke(&self, envelope: Envelope) -> BoxFuture<'static, Result<()>> {
        (self.call)(envelope)
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    fn register(&self, subscriber: Subscriber) -> Result<()>;

    /// 分发信封，返回命中的订阅者数量（0 表示无人订阅）
    async fn post(&self, envelope: Envelope) -> Result<usize>;
}
