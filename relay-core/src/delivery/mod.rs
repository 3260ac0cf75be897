//! 投递（delivery）
//!
//! 至少一次投递的核心：
//! - `EventBus` / `InMemoryEventBus`：发布/订阅原语；
//! - `TrackedEventBus`：包装原语，登记处理器策略并把结果关联回分发方；
//! - `Correlator`：分发调用与异步执行结果之间的闸门表；
//! - `RetryClassifier`：按处理器策略把错误归类为成功或需要重试；
//! - `BackoffPolicy`：指数退避与终止决策；
//! - `EventEngine`：轮询到期事件并驱动上述组件。
//!
mod backoff;
mod bus;
mod bus_inmemory;
mod classifier;
mod correlator;
mod engine;
mod handler;
mod tracked_bus;

pub use backoff::{BackoffPolicy, RetryDecision};
pub use bus::{Envelope, EventBus, Subscriber, SubscriberFn};
pub use bus_inmemory::InMemoryEventBus;
pub use classifier::{DispatchPolicy, HandlerEntry, RetryClassifier};
pub use correlator::{Completion, CompletionGate, CompletionReporter, Correlator, ExecutionResult};
pub use engine::{
    DispatchOutcome, EngineHandle, EventEngine, EventEngineConfig, TickReport, TimeoutPolicy,
};
pub use handler::{DEFAULT_HANDLER_TIMEOUT, EventHandler, HandlerPolicy};
pub use tracked_bus::{Decoded, TrackedEventBus};
