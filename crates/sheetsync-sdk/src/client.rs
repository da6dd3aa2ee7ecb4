//! SDK 门面
//!
//! 显式构造并注入后端句柄，不使用全局单例：
//! - 玩家端：`attach_store` 把本地存储接到推送调度器
//! - 主持人端：`observe` / `observe_roster` 创建订阅管理器

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::info;

use crate::backend::{AccessToken, PushTransport, RealtimeBackend, RealtimeWsBackend, RestBackend};
use crate::config::SyncConfig;
use crate::entity::CharacterRow;
use crate::error::Result;
use crate::events::EventManager;
use crate::lifecycle::{ChannelResumeHook, LifecycleManager, PushFlushHook};
use crate::roster::LiveRoster;
use crate::scheduler::PushScheduler;
use crate::session::SyncSession;
use crate::store::EntityStore;
use crate::channel_name::{canonical_ids, is_valid_identifier};
use crate::subscription::{RowChange, SubscriptionManager};
use crate::version::SDK_VERSION;

pub struct SheetSyncClient {
    config: SyncConfig,
    events: Arc<EventManager>,
    transport: Arc<dyn PushTransport>,
    realtime: Arc<dyn RealtimeBackend>,
    access_token: Option<AccessToken>,
    scheduler: Arc<PushScheduler>,
    lifecycle: RwLock<LifecycleManager>,
    subscriptions: Mutex<Vec<Weak<SubscriptionManager>>>,
}

impl SheetSyncClient {
    /// 使用注入的后端创建客户端；必须在 tokio 运行时中调用
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn PushTransport>,
        realtime: Arc<dyn RealtimeBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventManager::new(config.event_buffer_size));
        let scheduler = Arc::new(PushScheduler::new(transport.clone(), &config, events.clone())?);

        let mut lifecycle = LifecycleManager::new();
        lifecycle.register_hook(Arc::new(PushFlushHook::new(scheduler.clone())));

        info!(
            "✅ SheetSync SDK 已初始化 (版本 {}, 静默窗口 {}ms)",
            SDK_VERSION, config.scheduler.quiet_window_ms
        );

        Ok(Self {
            config,
            events,
            transport,
            realtime,
            access_token: None,
            scheduler,
            lifecycle: RwLock::new(lifecycle),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// 使用 REST + WebSocket 后端创建客户端，两者共享会话令牌
    pub fn connect(config: SyncConfig) -> Result<Self> {
        let token = AccessToken::new(config.backend.access_token.clone());
        let transport = Arc::new(RestBackend::with_token(&config.backend, token.clone())?);
        let realtime = Arc::new(RealtimeWsBackend::with_token(&config.backend, token.clone())?);
        let mut client = Self::new(config, transport, realtime)?;
        client.access_token = Some(token);
        Ok(client)
    }

    /// 会话续期后更新令牌；注入的后端自行管理令牌时返回 false
    pub fn set_access_token(&self, token: Option<String>) -> bool {
        match &self.access_token {
            Some(shared) => {
                shared.set(token);
                true
            }
            None => false,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn scheduler(&self) -> &Arc<PushScheduler> {
        &self.scheduler
    }

    /// 玩家端：开始同步本地存储中的角色
    pub fn attach_store(&self, store: Arc<dyn EntityStore>) -> SyncSession {
        SyncSession::attach(store, self.scheduler.clone())
    }

    /// 主持人端：创建订阅管理器，行变更交给 `handler`
    pub async fn observe<F>(&self, handler: F) -> Arc<SubscriptionManager>
    where
        F: Fn(RowChange) + Send + Sync + 'static,
    {
        let manager = Arc::new(SubscriptionManager::new(
            self.realtime.clone(),
            &self.config,
            self.events.clone(),
            handler,
        ));
        self.lifecycle
            .write()
            .await
            .register_hook(Arc::new(ChannelResumeHook::new(&manager)));
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|m| m.strong_count() > 0);
        subscriptions.push(Arc::downgrade(&manager));
        manager
    }

    /// 主持人端：订阅结果直接写入实时角色缓存
    pub async fn observe_roster(&self, roster: &Arc<LiveRoster>) -> Arc<SubscriptionManager> {
        self.observe(roster.handler()).await
    }

    /// 读取已存储的角色行（主持人面板初始加载）
    pub async fn fetch_rows<I, S>(&self, ids: I) -> Result<Vec<CharacterRow>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids: Vec<String> = canonical_ids(ids)
            .into_iter()
            .filter(|id| is_valid_identifier(id))
            .collect();
        self.transport.fetch_rows(&ids).await
    }

    /// 初始加载后放入实时缓存，返回新增的行数
    pub async fn load_roster<I, S>(&self, roster: &LiveRoster, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rows = self.fetch_rows(ids).await?;
        let added = roster.seed(rows);
        info!("📋 初始加载 {} 个角色", added);
        Ok(added)
    }

    /// App 切换到后台
    pub async fn on_background(&self) -> Result<()> {
        self.lifecycle.read().await.notify_background().await
    }

    /// App 切换到前台
    pub async fn on_foreground(&self) -> Result<()> {
        self.lifecycle.read().await.notify_foreground().await
    }

    /// 关闭：取消所有待推送并释放所有频道
    pub async fn shutdown(&self) {
        self.scheduler.dispose();
        let managers: Vec<Arc<SubscriptionManager>> = self
            .subscriptions
            .lock()
            .drain(..)
            .filter_map(|m| m.upgrade())
            .collect();
        for manager in managers {
            manager.shutdown().await;
        }
        info!("SheetSync SDK 已关闭");
    }
}
