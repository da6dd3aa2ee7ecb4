//! 生命周期管理
//!
//! App 前后台切换时统一通知各模块：
//! - 切到后台：立即推送所有待推送的角色（`PushFlushHook`）
//! - 回到前台：频道处于错误状态时重新订阅（`ChannelResumeHook`）

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;

/// 生命周期回调 Hook
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// App 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// App 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;

    /// 所服务的模块已释放时返回 false，注册新 Hook 时会被清理
    fn is_active(&self) -> bool {
        true
    }
}

/// 生命周期管理器
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.prune_inactive();
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 移除已失效的 Hook，返回移除数量
    pub fn prune_inactive(&mut self) -> usize {
        let before = self.hooks.len();
        self.hooks.retain(|hook| hook.is_active());
        before - self.hooks.len()
    }

    /// 通知所有 Hook：App 切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败时记录错误并继续执行其余 Hook，最后返回第一个错误
    pub async fn notify_background(&self) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到后台");
        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_background().await {
                warn!("⚠️ Hook #{} 后台切换失败: {}", index, e);
                errors.push(e);
            }
        }
        Self::first_error(errors, "后台")
    }

    /// 通知所有 Hook：App 切换到前台
    pub async fn notify_foreground(&self) -> Result<()> {
        info!("🔄 通知所有模块：App 切换到前台");
        let mut errors = Vec::new();
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_foreground().await {
                warn!("⚠️ Hook #{} 前台切换失败: {}", index, e);
                errors.push(e);
            }
        }
        Self::first_error(errors, "前台")
    }

    fn first_error(errors: Vec<crate::error::SyncError>, phase: &str) -> Result<()> {
        let failed = errors.len();
        match errors.into_iter().next() {
            Some(first) => {
                warn!("⚠️ {} 个模块{}切换失败，但所有模块都已尝试执行", failed, phase);
                Err(first)
            }
            None => {
                info!("✅ 所有模块{}切换完成", phase);
                Ok(())
            }
        }
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

mod hooks;
pub use hooks::{ChannelResumeHook, PushFlushHook};
