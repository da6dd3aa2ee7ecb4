//! 内置生命周期 Hook

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::error::Result;
use crate::lifecycle::LifecycleHook;
use crate::scheduler::PushScheduler;
use crate::subscription::{ChannelStatus, SubscriptionManager};

/// 切到后台时立即推送所有待推送的角色，避免进程被挂起后丢失最后一次修改
pub struct PushFlushHook {
    scheduler: Arc<PushScheduler>,
}

impl PushFlushHook {
    pub fn new(scheduler: Arc<PushScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl LifecycleHook for PushFlushHook {
    async fn on_background(&self) -> Result<()> {
        let flushed = self.scheduler.flush_all().await;
        info!("[Push Hook] App 切换到后台，已立即推送 {} 个角色", flushed);
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        Ok(())
    }
}

/// 回到前台时，频道若处于错误状态则重新订阅
///
/// 只持有弱引用：调用方丢弃订阅管理器后频道照常释放
pub struct ChannelResumeHook {
    subscriptions: Weak<SubscriptionManager>,
}

impl ChannelResumeHook {
    pub fn new(subscriptions: &Arc<SubscriptionManager>) -> Self {
        Self {
            subscriptions: Arc::downgrade(subscriptions),
        }
    }
}

#[async_trait]
impl LifecycleHook for ChannelResumeHook {
    async fn on_background(&self) -> Result<()> {
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        let Some(subscriptions) = self.subscriptions.upgrade() else {
            debug!("[Channel Hook] 订阅管理器已释放，跳过");
            return Ok(());
        };
        if subscriptions.status() != ChannelStatus::Error {
            debug!("[Channel Hook] 频道状态正常，无需重新订阅");
            return Ok(());
        }
        let status = subscriptions.reconnect().await;
        info!("[Channel Hook] App 回到前台，重新订阅后状态: {:?}", status);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.subscriptions.strong_count() > 0
    }
}
