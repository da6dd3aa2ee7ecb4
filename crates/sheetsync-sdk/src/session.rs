//! 同步会话：把本地存储接到推送调度器上
//!
//! `attach` 注册存储监听器并对当前已有实体做一次首次观察；
//! `close` 先注销监听器，再销毁调度器（取消所有待触发的推送）。
//! 会话被丢弃时自动关闭。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::entity::Entity;
use crate::scheduler::PushScheduler;
use crate::store::{EntityStore, ListenerId};

pub struct SyncSession {
    store: Arc<dyn EntityStore>,
    scheduler: Arc<PushScheduler>,
    listener: ListenerId,
    closed: AtomicBool,
}

impl SyncSession {
    pub fn attach(store: Arc<dyn EntityStore>, scheduler: Arc<PushScheduler>) -> Self {
        let target = scheduler.clone();
        let listener = store.add_listener(Arc::new(move |entity: &Entity| {
            target.on_entity_changed(entity);
        }));

        let existing = store.entities();
        for entity in &existing {
            scheduler.on_entity_changed(entity);
        }
        info!("✅ 同步会话已建立 ({} 个实体)", existing.len());

        Self {
            store,
            scheduler,
            listener,
            closed: AtomicBool::new(false),
        }
    }

    pub fn scheduler(&self) -> &Arc<PushScheduler> {
        &self.scheduler
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 清理已从存储中移除的实体的同步记录，返回清理数量
    pub fn prune_removed(&self) -> usize {
        let store = &self.store;
        self.scheduler.retain_idle(|id| store.entity(id).is_some())
    }

    /// 关闭会话；重复调用无副作用
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.store.remove_listener(self.listener);
        self.scheduler.dispose();
        info!("同步会话已关闭");
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.close();
    }
}
