//! 可取消定时任务
//!
//! `ScheduledTask::schedule(delay, fut)`：延迟到期后执行 `fut`。
//! `cancel()` 只作用于尚未触发的任务；一旦触发，`fut` 会完整执行，不会在 I/O 中途被打断。

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// 已调度的定时任务句柄
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// 在当前 tokio 运行时上调度
    pub fn schedule<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::schedule_on(&Handle::current(), delay, fut)
    }

    /// 在指定运行时上调度，可从运行时之外的线程调用
    pub fn schedule_on<F>(runtime: &Handle, delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(PENDING));
        let task_token = token.clone();
        let task_state = state.clone();

        let handle = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // 与 cancel() 竞争同一个状态位，二者只有一个能赢
            if task_state
                .compare_exchange(PENDING, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            fut.await;
        });

        Self { token, state, handle }
    }

    /// 取消尚未触发的任务；返回 true 表示确实阻止了一次执行
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.token.cancel();
        }
        won
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    /// 是否已到期触发（执行中或已执行完）
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FIRED
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
