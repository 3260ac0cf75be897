//! 持久化（persist）
//!
//! 定义事件存储协议与投递状态机，并提供两种实现：
//! - `InMemoryEventStore`：单锁内存实现，测试与示例使用；
//! - `PgEventStore`：基于 sqlx 的 Postgres 实现（`infra-sqlx` 特性）。
//!
mod event_store;
mod inmemory;
#[cfg(feature = "infra-sqlx")]
mod postgres;
mod stored_event;

pub use event_store::{DEFAULT_LEASE, EventStore};
pub use inmemory::InMemoryEventStore;
#[cfg(feature = "infra-sqlx")]
pub use postgres::PgEventStore;
pub use stored_event::{DEFAULT_MAX_ATTEMPTS, EventStatus, StoredEvent};
