use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use relay_core::delivery::{BackoffPolicy, EventEngineConfig, TimeoutPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// 演示配置
///
/// 优先级（低到高）：内置默认值、`relay.yaml`、`RELAY_*` 环境变量
/// （嵌套键以 `__` 分隔）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub log_format: LogFormat,
    pub orders: usize,
    pub run_seconds: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_attempts: i32,
    pub backoff_base_ms: u64,
    /// 超时后是否视为成功（缺省视为未完成并重试）
    pub assume_success_on_timeout: bool,
    /// 支付处理器每 N 次调用失败一次；0 表示从不失败
    pub payment_failure_every: usize,
    pub inventory_failure_every: usize,
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            orders: 5,
            run_seconds: 12,
            poll_interval_ms: 1000,
            batch_size: 20,
            concurrency: 5,
            max_attempts: 5,
            backoff_base_ms: 1000,
            assume_success_on_timeout: false,
            payment_failure_every: 3,
            inventory_failure_every: 5,
            database_url: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Yaml::file("relay.yaml"))
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()
            .map_err(Box::new)?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.max_attempts < 1 {
            return Err(SettingsError::Invalid {
                key: "max_attempts",
                reason: format!("must be at least 1, got {}", self.max_attempts),
            });
        }
        if self.backoff_base_ms == 0 {
            return Err(SettingsError::Invalid {
                key: "backoff_base_ms",
                reason: "must be positive".into(),
            });
        }
        self.engine_config()
            .validate()
            .map_err(|e| SettingsError::Invalid {
                key: "engine",
                reason: e.to_string(),
            })
    }

    pub fn engine_config(&self) -> EventEngineConfig {
        EventEngineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            timeout_policy: if self.assume_success_on_timeout {
                TimeoutPolicy::AssumeSuccess
            } else {
                TimeoutPolicy::Retry
            },
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(self.backoff_base_ms))
    }
}
