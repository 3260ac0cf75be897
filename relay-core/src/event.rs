//! 事件契约与关联标识
//!
//! - `Event`：可持久化、可重放的内存事件需要满足的能力边界；
//! - `GenericEvent`：存储类型无法解析时的通用结构化表示；
//! - `CorrelationId`：把一次分发与其待定的执行结果关联起来的派生键。
//!
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// 内存事件
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 事件类型（持久化时写入 `event_type` 列，重放时据此解析事件形态）
    const EVENT_TYPE: &'static str;

    /// 实例的事件类型；`GenericEvent` 以其携带的原始类型覆盖
    fn event_type(&self) -> &str {
        Self::EVENT_TYPE
    }

    /// 事件的业务标识，缺省时以 `类型-载荷哈希` 作为关联键
    fn event_id(&self) -> Option<String> {
        None
    }
}

/// 无法解析为已注册类型时的回退表示
///
/// 序列化时只写出 `body`，与原始载荷保持同一形态。
#[derive(Debug, Clone, PartialEq)]
pub struct GenericEvent {
    event_type: String,
    body: Value,
}

impl GenericEvent {
    pub fn new(event_type: impl Into<String>, body: Value) -> Self {
        Self {
            event_type: event_type.into(),
            body,
        }
    }

    /// 原始载荷；非 JSON 文本时以字符串形式保留
    pub fn from_payload(event_type: impl Into<String>, payload: &str) -> Self {
        let body = serde_json::from_str(payload).unwrap_or_else(|_| Value::String(payload.into()));
        Self::new(event_type, body)
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl Serialize for GenericEvent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GenericEvent {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let body = Value::deserialize(deserializer)?;
        Ok(Self::new(<Self as Event>::EVENT_TYPE, body))
    }
}

impl Event for GenericEvent {
    const EVENT_TYPE: &'static str = "*";

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn event_id(&self) -> Option<String> {
        match self.body.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// 关联标识：`{key}@{stored_id}#{attempt}`
///
/// `(stored_id, attempt)` 构成分发代次，超时后迟到的完成信号只会命中旧代次，
/// 不会串到同一事件的下一次重试上。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    key: String,
    stored_id: i64,
    attempt: i32,
}

impl CorrelationId {
    pub fn new(key: impl Into<String>, stored_id: i64, attempt: i32) -> Self {
        Self {
            key: key.into(),
            stored_id,
            attempt,
        }
    }

    /// 由事件标识派生；标识缺失时退化为 `类型-载荷哈希`
    pub fn derive(
        identity: Option<String>,
        event_type: &str,
        payload: &str,
        stored_id: i64,
        attempt: i32,
    ) -> Self {
        let key = identity.unwrap_or_else(|| {
            let mut hasher = DefaultHasher::new();
            payload.hash(&mut hasher);
            format!("{event_type}-{:016x}", hasher.finish())
        });
        Self::new(key, stored_id, attempt)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stored_id(&self) -> i64 {
        self.stored_id
    }

    pub fn attempt(&self) -> i32 {
        self.attempt
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.key, self.stored_id, self.attempt)
    }
}
