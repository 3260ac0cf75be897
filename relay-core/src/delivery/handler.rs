//! 事件处理器（EventHandler）
//!
//! 定义消费某一类事件的处理逻辑与元信息（名称、重试策略）。
//! 策略在注册时读取一次并登记到分类器，之后不再变化。
//!
use crate::event::Event;
use async_trait::async_trait;
use bon::Builder;
use std::time::Duration;

/// 默认的完成等待超时
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// 处理器的重试策略
#[derive(Builder, Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerPolicy {
    /// 失败时是否要求重投；为 false 时错误只记录日志，事件视为成功
    #[builder(default)]
    pub retryable: bool,
    /// 引擎等待该处理器完成信号的最长时间
    #[builder(default = DEFAULT_HANDLER_TIMEOUT)]
    pub timeout: Duration,
    /// 失败被记录后，是否把错误继续抛给总线任务
    #[builder(default)]
    pub propagate_exception: bool,
}

impl Default for HandlerPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HandlerPolicy {
    /// 可重试策略的快捷构造
    pub fn retryable() -> Self {
        Self::builder().retryable(true).build()
    }
}

/// 事件处理器：处理某一类型的事件
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// 处理器名称（用于日志与执行结果）
    fn handler_name(&self) -> &str;

    fn policy(&self) -> HandlerPolicy {
        HandlerPolicy::default()
    }

    async fn handle(&self, event: &E) -> anyhow::Result<()>;
}
