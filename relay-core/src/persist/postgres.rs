//! Postgres 事件存储（PgEventStore）
//!
//! 基于 `sqlx` 的 `events` 表实现。`fetch_due` 使用 `FOR UPDATE SKIP LOCKED`
//! 在一条语句内完成“选出到期行 + 推迟租约”，多个轮询器并发时互不重复认领。
//!
use crate::error::RelayResult as Result;
use crate::persist::event_store::{DEFAULT_LEASE, validate_max_attempts};
use crate::persist::{EventStatus, EventStore, StoredEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id              BIGSERIAL PRIMARY KEY,
    event_type      VARCHAR(255) NOT NULL,
    payload         TEXT NOT NULL,
    status          VARCHAR(20) NOT NULL DEFAULT 'PENDING',
    attempts        INT NOT NULL DEFAULT 0,
    max_attempts    INT NOT NULL DEFAULT 5,
    next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#;

const CREATE_DUE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS events_due_idx ON events (status, next_attempt_at)";

const CLAIM_DUE: &str = r#"
UPDATE events
SET next_attempt_at = NOW() + ($2::bigint * INTERVAL '1 millisecond')
WHERE id IN (
    SELECT id FROM events
    WHERE status = 'PENDING' AND next_attempt_at <= NOW()
    ORDER BY created_at ASC
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
RETURNING id, event_type, payload, status, attempts, max_attempts, next_attempt_at, created_at"#;

const MARK_FAILED: &str = r#"
UPDATE events
SET attempts = LEAST(GREATEST($2, attempts), max_attempts),
    next_attempt_at = NOW() + ($3::bigint * INTERVAL '1 millisecond'),
    status = CASE
        WHEN $3::bigint = 0 OR LEAST(GREATEST($2, attempts), max_attempts) >= max_attempts
        THEN 'FAILED'
        ELSE 'PENDING'
    END
WHERE id = $1 AND status = 'PENDING'"#;

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    event_type: String,
    payload: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = crate::error::RelayError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(StoredEvent {
            id: row.id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse()?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            next_attempt_at: row.next_attempt_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PgEventStore {
    pool: PgPool,
    lease: Duration,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// 幂等建表与到期索引
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_DUE_INDEX).execute(&self.pool).await?;
        Ok(())
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, event_type: &str, payload: &str, max_attempts: i32) -> Result<i64> {
        validate_max_attempts(max_attempts)?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO events (event_type, payload, max_attempts) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(event_type)
        .bind(payload)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn fetch_due(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(CLAIM_DUE)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(millis(self.lease))
            .fetch_all(&self.pool)
            .await?;

        // RETURNING 不保证顺序
        let mut events = rows
            .into_iter()
            .map(StoredEvent::try_from)
            .collect::<Result<Vec<_>>>()?;
        events.sort_by_key(|e| (e.created_at, e.id));
        Ok(events)
    }

    async fn mark_success(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE events SET status = 'SUCCESS' WHERE id = $1 AND status = 'PENDING'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, attempts: i32, backoff: Duration) -> Result<()> {
        sqlx::query(MARK_FAILED)
            .bind(id)
            .bind(attempts)
            .bind(millis(backoff))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, id: i64) -> Result<Option<StoredEvent>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id, event_type, payload, status, attempts, max_attempts, next_attempt_at, created_at
             FROM events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredEvent::try_from).transpose()
    }

    async fn count_by_status(&self, status: EventStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn lease(&self) -> Duration {
        self.lease
    }
}
