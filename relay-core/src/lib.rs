//! 进程内事件的持久化至少一次投递（relay-core）
//!
//! 事件先落库再分发，由轮询引擎重放；每个处理器按自身策略决定失败时
//! 是否重投：
//! - 事件契约与关联标识（`event`）
//! - 事件存储与投递状态机（`persist`）：内存实现与 Postgres 实现
//! - 投递核心（`delivery`）：总线、完成关联、重试分类、退避与轮询引擎
//! - 门面（`system`）：`register` / `publish` / `start`
//!
//! 典型用法：
//! 1. 以 `#[event]` 定义事件，为其实现 `EventHandler` 并声明 `HandlerPolicy`；
//! 2. 选择 `EventStore` 实现，构建 `EventSystem` 并注册处理器；
//! 3. `start` 启动引擎后 `publish` 事件，失败的可重试处理器将按指数退避重投。
//!
pub mod clock;
pub mod delivery;
pub mod error;
pub mod event;
pub mod persist;
pub mod system;

pub use error::{RelayError, RelayResult};
pub use event::{CorrelationId, Event, GenericEvent};
pub use system::{EventSystem, StatusCounts};

// 允许在本 crate 内部通过 ::relay_core 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::relay_core 路径。
extern crate self as relay_core;
