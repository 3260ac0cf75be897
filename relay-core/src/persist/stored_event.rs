//! 持久化事件模型（StoredEvent）
//!
//! 定义事件在存储层的标准形态与投递状态机：
//! `PENDING` 为初始态，`SUCCESS` 与 `FAILED` 为终态，终态不再迁移。
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// 默认最大投递次数
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Success,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Success => "SUCCESS",
            EventStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Pending)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "SUCCESS" => Ok(EventStatus::Success),
            "FAILED" => Ok(EventStatus::Failed),
            other => Err(RelayError::persistence(format!(
                "unknown event status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct StoredEvent {
    /// 存储层分配的唯一标识
    pub(crate) id: i64,
    /// 事件类型，用于重放时解析事件形态
    pub(crate) event_type: String,
    /// 序列化后的事件载荷
    pub(crate) payload: String,
    /// 投递状态
    #[builder(default = EventStatus::Pending)]
    pub(crate) status: EventStatus,
    /// 已进行的投递次数
    #[builder(default)]
    pub(crate) attempts: i32,
    /// 最大投递次数
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub(crate) max_attempts: i32,
    /// 下一次可投递的时间
    pub(crate) next_attempt_at: DateTime<Utc>,
    /// 创建时间（拉取排序键）
    pub(crate) created_at: DateTime<Utc>,
}

impl StoredEvent {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn attempts(&self) -> i32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    pub fn next_attempt_at(&self) -> DateTime<Utc> {
        self.next_attempt_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 处于 PENDING 且已到达下一次投递时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Pending && self.next_attempt_at <= now
    }
}
