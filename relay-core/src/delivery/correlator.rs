//! 完成关联器（Correlator）
//!
//! 把一次“分发调用”与其异步执行结果关联起来：
//! - 工作者在分发前 `prepare` 得到 `CompletionGate`，并把其 `CompletionReporter`
//!   随信封交给处理器；
//! - 处理器执行完毕后经 reporter 写入 `ExecutionResult` 并打开闸门；
//! - 工作者 `wait(timeout)` 读取结果，随后释放闸门（Drop 即释放）。
//!
//! 同一事件类型的多个处理器共享一个槽位：首个报告打开闸门，
//! 之后的报告在释放前覆盖已存结果。
//!
use crate::event::CorrelationId;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

/// 一次执行的结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    success: bool,
    error: Option<String>,
    handler: Option<String>,
}

impl ExecutionResult {
    pub fn success(handler: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            handler: Some(handler.into()),
        }
    }

    pub fn failure(handler: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            handler: Some(handler.into()),
        }
    }

    /// 已打开但未记录结果的闸门按成功读取
    fn unattributed() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }
}

/// 等待的结局
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Resolved(ExecutionResult),
    TimedOut,
}

struct CompletionSlot {
    resolved: AtomicBool,
    result: Mutex<Option<ExecutionResult>>,
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl CompletionSlot {
    fn report(&self, result: ExecutionResult) {
        *self.result.lock().unwrap_or_else(|p| p.into_inner()) = Some(result);

        if !self.resolved.swap(true, Ordering::AcqRel)
            && let Some(tx) = self.tx.lock().unwrap_or_else(|p| p.into_inner()).take()
        {
            let _ = tx.send(());
        }
    }

    fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    fn take_result(&self) -> ExecutionResult {
        self.result
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_else(ExecutionResult::unattributed)
    }
}

type SlotTable = DashMap<CorrelationId, Arc<CompletionSlot>>;

/// 引擎级的关联表（克隆体共享同一张表）
#[derive(Clone, Default)]
pub struct Correlator {
    slots: Arc<SlotTable>,
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending())
            .finish()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一次分发登记新的闸门
    pub fn prepare(&self, id: CorrelationId) -> CompletionGate {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(CompletionSlot {
            resolved: AtomicBool::new(false),
            result: Mutex::new(None),
            tx: Mutex::new(Some(tx)),
        });
        self.slots.insert(id.clone(), slot.clone());

        CompletionGate {
            id,
            slot,
            rx: Some(rx),
            table: self.slots.clone(),
        }
    }

    /// 按关联标识报告结果；没有登记闸门时为空操作并返回 false
    pub fn report(&self, id: &CorrelationId, result: ExecutionResult) -> bool {
        let Some(slot) = self.slots.get(id).map(|s| s.value().clone()) else {
            return false;
        };
        slot.report(result);
        true
    }

    /// 仍在等待中的闸门数量
    pub fn pending(&self) -> usize {
        self.slots.len()
    }
}

/// 单次分发的闸门，由发起分发的工作者独占
pub struct CompletionGate {
    id: CorrelationId,
    slot: Arc<CompletionSlot>,
    rx: Option<oneshot::Receiver<()>>,
    table: Arc<SlotTable>,
}

impl fmt::Debug for CompletionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGate")
            .field("id", &self.id)
            .field("resolved", &self.slot.is_resolved())
            .finish()
    }
}

impl CompletionGate {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn reporter(&self) -> CompletionReporter {
        CompletionReporter {
            id: self.id.clone(),
            slot: Arc::downgrade(&self.slot),
        }
    }

    /// 等待完成信号；超时后若闸门恰好已打开仍读取结果
    pub async fn wait(&mut self, timeout: Duration) -> Completion {
        if let Some(rx) = self.rx.as_mut()
            && tokio::time::timeout(timeout, rx).await.is_ok()
        {
            // oneshot 完成后不可再次 poll
            self.rx = None;
        }

        if self.slot.is_resolved() {
            Completion::Resolved(self.slot.take_result())
        } else {
            Completion::TimedOut
        }
    }

    /// 显式释放；等价于 drop
    pub fn release(self) {}
}

impl Drop for CompletionGate {
    fn drop(&mut self) {
        // 只移除自己登记的槽位
        self.table
            .remove_if(&self.id, |_, slot| Arc::ptr_eq(slot, &self.slot));
    }
}

/// 处理器侧的报告句柄；闸门释放后报告为空操作
#[derive(Clone)]
pub struct CompletionReporter {
    id: CorrelationId,
    slot: Weak<CompletionSlot>,
}

impl fmt::Debug for CompletionReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionReporter")
            .field("id", &self.id)
            .finish()
    }
}

impl CompletionReporter {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn report(&self, result: ExecutionResult) -> bool {
        match self.slot.upgrade() {
            Some(slot) => {
                slot.report(result);
                true
            }
            None => false,
        }
    }
}
