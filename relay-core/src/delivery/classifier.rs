//! 重试分类器（RetryClassifier）
//!
//! - 注册期登记 `事件类型 -> [处理器名称 + 策略]`；
//! - 分发前给出等待超时（各处理器超时的最大值，缺省 5s）；
//! - 把处理器的执行结果归类为“成功”或“需要重试”，并打开对应闸门。
//!
use super::correlator::{CompletionReporter, ExecutionResult};
use super::handler::{DEFAULT_HANDLER_TIMEOUT, HandlerPolicy};
use crate::error::{RelayError, RelayResult as Result};
use dashmap::DashMap;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerEntry {
    name: String,
    policy: HandlerPolicy,
}

impl HandlerEntry {
    pub fn new(name: impl Into<String>, policy: HandlerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> HandlerPolicy {
        self.policy
    }
}

/// 某一事件类型的分发参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub timeout: Duration,
    /// 是否存在可重试的处理器
    pub retryable: bool,
    pub handlers: usize,
}

#[derive(Debug, Default)]
pub struct RetryClassifier {
    registry: DashMap<String, Vec<HandlerEntry>>,
}

impl RetryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: &str, entry: HandlerEntry) {
        self.registry
            .entry(event_type.to_string())
            .or_default()
            .push(entry);
    }

    pub fn entries(&self, event_type: &str) -> Vec<HandlerEntry> {
        self.registry
            .get(event_type)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// 按事件类型分组的全部登记项
    pub fn registered(&self) -> Vec<Vec<HandlerEntry>> {
        self.registry
            .iter()
            .map(|list| list.value().clone())
            .collect()
    }

    pub fn dispatch_policy(&self, event_type: &str) -> DispatchPolicy {
        let Some(list) = self.registry.get(event_type) else {
            return DispatchPolicy {
                timeout: DEFAULT_HANDLER_TIMEOUT,
                retryable: false,
                handlers: 0,
            };
        };

        DispatchPolicy {
            timeout: list
                .iter()
                .map(|e| e.policy.timeout)
                .max()
                .unwrap_or(DEFAULT_HANDLER_TIMEOUT),
            retryable: list.iter().any(|e| e.policy.retryable),
            handlers: list.len(),
        }
    }

    /// 归类一次执行结果并报告给闸门
    ///
    /// 设置了 `propagate_exception` 的可重试处理器：先记录失败，再返回
    /// `HandlerExecution` 错误交由总线任务处理。
    pub fn classify(
        &self,
        entry: &HandlerEntry,
        outcome: anyhow::Result<()>,
        reporter: Option<&CompletionReporter>,
    ) -> Result<ExecutionResult> {
        let correlation_id = reporter.map(|r| r.correlation_id().to_string());

        let (result, escalate) = match outcome {
            Ok(()) => (ExecutionResult::success(entry.name()), None),
            Err(err) if !entry.policy.retryable => {
                tracing::warn!(
                    handler = entry.name(),
                    correlation_id = correlation_id.as_deref(),
                    error = %err,
                    "non-retryable handler failed, event treated as delivered"
                );
                (ExecutionResult::success(entry.name()), None)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(
                    handler = entry.name(),
                    correlation_id = correlation_id.as_deref(),
                    error = %reason,
                    "retryable handler failed"
                );
                let escalate = entry.policy.propagate_exception.then(|| reason.clone());
                (ExecutionResult::failure(entry.name(), reason), escalate)
            }
        };

        if let Some(reporter) = reporter {
            reporter.report(result.clone());
        }

        match escalate {
            Some(reason) => Err(RelayError::HandlerExecution {
                handler: entry.name().to_string(),
                reason,
            }),
            None => Ok(result),
        }
    }
}
