//! 内存版事件存储（InMemoryEventStore）
//!
//! 单把互斥锁保护全部行，每个操作在锁内完成，满足单行更新的原子性；
//! `fetch_due` 的选择与租约推迟同在一次加锁中完成，关闭了重复认领的竞态。
//! 典型用途：测试环境、示例与本地开发。
//!
use crate::clock::{Clock, SystemClock, add_duration};
use crate::error::{RelayError, RelayResult as Result};
use crate::persist::event_store::{DEFAULT_LEASE, validate_max_attempts};
use crate::persist::{EventStatus, EventStore, StoredEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct Rows {
    next_id: i64,
    by_id: BTreeMap<i64, StoredEvent>,
}

#[derive(Debug)]
pub struct InMemoryEventStore {
    rows: Mutex<Rows>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(Rows::default()),
            clock,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// 当前全部行的快照（按 id 升序）
    pub fn snapshot(&self) -> Result<Vec<StoredEvent>> {
        Ok(self.lock()?.by_id.values().cloned().collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows>> {
        self.rows
            .lock()
            .map_err(|e| RelayError::persistence(format!("store lock poisoned: {e}")))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event_type: &str, payload: &str, max_attempts: i32) -> Result<i64> {
        validate_max_attempts(max_attempts)?;
        let now = self.clock.now();
        let mut rows = self.lock()?;
        rows.next_id += 1;
        let id = rows.next_id;

        let event = StoredEvent::builder()
            .id(id)
            .event_type(event_type.to_string())
            .payload(payload.to_string())
            .max_attempts(max_attempts)
            .next_attempt_at(now)
            .created_at(now)
            .build();
        rows.by_id.insert(id, event);

        Ok(id)
    }

    async fn fetch_due(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let now = self.clock.now();
        let leased_until = add_duration(now, self.lease);
        let mut rows = self.lock()?;

        let mut due: Vec<&StoredEvent> = rows.by_id.values().filter(|e| e.is_due(now)).collect();
        due.sort_by_key(|e| (e.created_at, e.id));
        let ids: Vec<i64> = due.into_iter().take(limit).map(|e| e.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = rows.by_id.get_mut(&id) {
                row.next_attempt_at = leased_until;
                claimed.push(row.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_success(&self, id: i64) -> Result<()> {
        let mut rows = self.lock()?;
        if let Some(row) = rows.by_id.get_mut(&id)
            && row.status == EventStatus::Pending
        {
            row.status = EventStatus::Success;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, attempts: i32, backoff: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut rows = self.lock()?;
        let Some(row) = rows.by_id.get_mut(&id) else {
            return Ok(());
        };
        if row.status != EventStatus::Pending {
            return Ok(());
        }

        row.attempts = attempts.max(row.attempts).min(row.max_attempts);
        row.next_attempt_at = add_duration(now, backoff);
        if backoff.is_zero() || row.attempts >= row.max_attempts {
            row.status = EventStatus::Failed;
        }
        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<StoredEvent>> {
        Ok(self.lock()?.by_id.get(&id).cloned())
    }

    async fn count_by_status(&self, status: EventStatus) -> Result<u64> {
        Ok(self
            .lock()?
            .by_id
            .values()
            .filter(|e| e.status == status)
            .count() as u64)
    }

    fn lease(&self) -> Duration {
        self.lease
    }
}
