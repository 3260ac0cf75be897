//! 事件存储（EventStore）协议
//!
//! 事件在分发前持久化，轮询器据此重放。`fetch_due` 以租约方式认领行：
//! 选出的行在同一原子操作中把 `next_attempt_at` 推迟到 `now + lease`，
//! 因而并发的两次拉取不会返回同一行；工作者崩溃时租约到期后该行重新到期。
//!
use crate::error::RelayResult as Result;
use crate::persist::{EventStatus, StoredEvent};
use async_trait::async_trait;
use std::time::Duration;

/// 默认认领租约，需大于任一处理器的等待超时
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 追加新事件：PENDING、attempts = 0、立即到期；返回存储分配的 id
    async fn append(&self, event_type: &str, payload: &str, max_attempts: i32) -> Result<i64>;

    /// 认领至多 `limit` 条到期事件，按 `created_at` 升序
    async fn fetch_due(&self, limit: usize) -> Result<Vec<StoredEvent>>;

    /// PENDING -> SUCCESS；对已 SUCCESS 的行为空操作
    ///
    /// 只更新 PENDING 行：FAILED 是终态，迟到的成功不会把它改回 SUCCESS。
    async fn mark_success(&self, id: i64) -> Result<()>;

    /// 记录失败次数并推迟下一次投递；`backoff` 为零或次数达到上限时显式迁移到 FAILED
    async fn mark_failed(&self, id: i64, attempts: i32, backoff: Duration) -> Result<()>;

    async fn find(&self, id: i64) -> Result<Option<StoredEvent>>;

    async fn count_by_status(&self, status: EventStatus) -> Result<u64>;

    /// `fetch_due` 认领时推迟的时长；处理器等待超时必须小于它
    fn lease(&self) -> Duration;
}

pub(crate) fn validate_max_attempts(max_attempts: i32) -> Result<()> {
    if max_attempts < 1 {
        return Err(crate::error::RelayError::invalid_argument(format!(
            "max_attempts must be at least 1, got {max_attempts}"
        )));
    }
    Ok(())
}
