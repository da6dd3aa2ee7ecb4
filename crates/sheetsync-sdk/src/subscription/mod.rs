//! 订阅管理器 - 主持人面板的实时频道
//!
//! 每个订阅作用域（实体 ID 集合，与顺序无关）对应唯一一个在线频道：
//! - 作用域变化：先释放旧频道，再以新的频道名重新走 `Idle -> Connecting` 流程
//! - 作用域为空、订阅被禁用或管理器关闭：释放频道后回到 `Idle`
//! - 入站变更按到达顺序逐条同步交给处理器，不缓冲、不重排、不去重
//!
//! 任何时刻最多只有一个在线频道。

pub mod change;
pub mod state;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{ChannelHandle, ChannelRequest, ChannelSignal, RealtimeBackend};
use crate::channel_name::{canonical_ids, is_valid_identifier, resolve_channel_name};
use crate::config::SyncConfig;
use crate::events::{now_millis, EventManager, SyncEvent};

pub use change::{ChangeKind, RowChange};
pub use state::{ChannelPhase, ChannelStats, ChannelStatus};

/// 行变更处理器
pub type ChangeHandler = Arc<dyn Fn(RowChange) + Send + Sync>;

struct ChannelCore {
    phase: ChannelPhase,
    /// 每次开关频道都会递增，旧频道迟到的信号据此丢弃
    generation: u64,
    stats: ChannelStats,
}

struct Shared {
    core: Mutex<ChannelCore>,
    status_tx: watch::Sender<ChannelStatus>,
    events: Arc<EventManager>,
}

impl Shared {
    /// 开始一个新频道，返回其代号
    fn begin(&self, channel: &str, scope_size: usize) -> u64 {
        let (old, generation) = {
            let mut core = self.core.lock();
            core.generation += 1;
            core.stats.channel = Some(channel.to_string());
            core.stats.scope_size = scope_size;
            core.stats.channels_opened += 1;
            core.stats.connected_at = None;
            core.stats.last_error = None;
            let old = std::mem::replace(&mut core.phase, ChannelPhase::Connecting);
            (old, core.generation)
        };
        self.announce(Some(channel.to_string()), old, ChannelPhase::Connecting);
        generation
    }

    fn invalidate(&self) {
        self.core.lock().generation += 1;
    }

    /// 切换阶段；`generation` 不匹配时忽略并返回 false
    fn transition(&self, generation: Option<u64>, phase: ChannelPhase, error: Option<String>) -> bool {
        let (old, channel) = {
            let mut core = self.core.lock();
            if let Some(generation) = generation {
                if core.generation != generation {
                    return false;
                }
            }
            let channel = core.stats.channel.clone();
            let old = std::mem::replace(&mut core.phase, phase);
            match phase {
                ChannelPhase::Connected => core.stats.mark_connected(),
                ChannelPhase::Error => core.stats.last_error = error,
                ChannelPhase::Idle => {
                    core.stats.channel = None;
                    core.stats.scope_size = 0;
                    core.stats.connected_at = None;
                }
                ChannelPhase::Connecting => {}
            }
            (old, channel)
        };
        if old != phase {
            self.announce(channel, old, phase);
        }
        true
    }

    fn announce(&self, channel: Option<String>, old_phase: ChannelPhase, new_phase: ChannelPhase) {
        self.status_tx.send_replace(new_phase.into());
        self.events.emit(SyncEvent::ChannelStatusChanged {
            channel,
            old_phase,
            new_phase,
            timestamp: now_millis(),
        });
    }

    /// 记录一次入站事件；频道已被替换时返回 false
    fn record_event(&self, generation: u64, delivered: bool) -> bool {
        let mut core = self.core.lock();
        if core.generation != generation {
            return false;
        }
        core.stats.mark_event(delivered);
        true
    }
}

struct ActiveChannel {
    handle: ChannelHandle,
    scope: Vec<String>,
    stop: CancellationToken,
    dispatcher: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    active: Option<ActiveChannel>,
    scope: Vec<String>,
    enabled: bool,
    shut_down: bool,
}

/// 订阅管理器
pub struct SubscriptionManager {
    backend: Arc<dyn RealtimeBackend>,
    handler: ChangeHandler,
    namespace: String,
    schema: String,
    table: String,
    shared: Arc<Shared>,
    /// 跨越 subscribe / unsubscribe 的等待持有，保证开关频道串行
    state: tokio::sync::Mutex<ManagerState>,
}

impl SubscriptionManager {
    pub fn new<F>(
        backend: Arc<dyn RealtimeBackend>,
        config: &SyncConfig,
        events: Arc<EventManager>,
        handler: F,
    ) -> Self
    where
        F: Fn(RowChange) + Send + Sync + 'static,
    {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Self {
            backend,
            handler: Arc::new(handler),
            namespace: config.channel_namespace.clone(),
            schema: config.backend.schema.clone(),
            table: config.backend.table.clone(),
            shared: Arc::new(Shared {
                core: Mutex::new(ChannelCore {
                    phase: ChannelPhase::Idle,
                    generation: 0,
                    stats: ChannelStats::default(),
                }),
                status_tx,
                events,
            }),
            state: tokio::sync::Mutex::new(ManagerState::default()),
        }
    }

    /// 设置当前作用域，返回当前连接状态
    ///
    /// 每次作用域或开关变化时调用；相同集合（顺序无关）重复调用不会重建频道。
    /// 不合法的 ID 会被丢弃并打印警告。
    pub async fn watch<I, S>(&self, ids: I, enabled: bool) -> ChannelStatus
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scope = sanitize_scope(ids);
        let mut state = self.state.lock().await;
        if state.shut_down {
            return ChannelStatus::Idle;
        }
        state.scope = scope.clone();
        state.enabled = enabled;

        if scope.is_empty() || !enabled {
            self.teardown(&mut state).await;
            return self.status();
        }

        if state.active.as_ref().map(|a| a.scope == scope).unwrap_or(false) {
            debug!("订阅作用域未变化，保持当前频道");
            return self.status();
        }

        self.teardown(&mut state).await;
        self.open(&mut state, scope).await;
        self.status()
    }

    /// 频道处于错误状态时，按当前作用域重新订阅
    pub async fn reconnect(&self) -> ChannelStatus {
        let mut state = self.state.lock().await;
        if state.shut_down || !state.enabled || state.scope.is_empty() {
            return self.status();
        }
        if self.phase() != ChannelPhase::Error {
            return self.status();
        }
        info!("🔄 重新订阅频道");
        let scope = state.scope.clone();
        self.teardown(&mut state).await;
        self.open(&mut state, scope).await;
        self.status()
    }

    /// 释放频道并停止接受新的作用域
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shut_down = true;
        state.scope.clear();
        self.teardown(&mut state).await;
        info!("订阅管理器已关闭");
    }

    pub fn status(&self) -> ChannelStatus {
        self.phase().into()
    }

    pub fn phase(&self) -> ChannelPhase {
        self.shared.core.lock().phase
    }

    /// 状态变化接收端（界面层可 `changed().await`）
    pub fn status_receiver(&self) -> watch::Receiver<ChannelStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.core.lock().stats.clone()
    }

    /// 当前作用域（已排序去重）
    pub async fn scope(&self) -> Vec<String> {
        self.state.lock().await.scope.clone()
    }

    async fn open(&self, state: &mut ManagerState, scope: Vec<String>) {
        let name = resolve_channel_name(&self.namespace, &scope);
        let generation = self.shared.begin(&name, scope.len());
        let request = ChannelRequest {
            name: name.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
            ids: scope.clone(),
        };
        let (sink, signals) = mpsc::unbounded_channel();

        match self.backend.subscribe(request, sink).await {
            Ok(handle) => {
                let stop = CancellationToken::new();
                let dispatcher = tokio::spawn(dispatch(
                    signals,
                    stop.clone(),
                    generation,
                    name.clone(),
                    scope.iter().cloned().collect(),
                    self.shared.clone(),
                    self.handler.clone(),
                ));
                debug!("频道 {} 已发起订阅 ({} 个实体)", name, scope.len());
                state.active = Some(ActiveChannel { handle, scope, stop, dispatcher });
            }
            Err(e) => {
                warn!("⚠️ 订阅频道 {} 失败: {}", name, e);
                self.shared
                    .transition(Some(generation), ChannelPhase::Error, Some(e.to_string()));
            }
        }
    }

    /// 先释放频道句柄，再回到 Idle
    async fn teardown(&self, state: &mut ManagerState) {
        self.shared.invalidate();
        if let Some(active) = state.active.take() {
            active.stop.cancel();
            if let Err(e) = active.dispatcher.await {
                warn!("频道分发任务异常退出: {}", e);
            }
            let name = active.handle.name().to_string();
            match self.backend.unsubscribe(active.handle).await {
                Ok(()) => debug!("频道 {} 已释放", name),
                Err(e) => warn!("⚠️ 释放频道 {} 失败: {}", name, e),
            }
        }
        self.shared.transition(None, ChannelPhase::Idle, None);
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        let Some(active) = state.active.take() else {
            return;
        };
        active.stop.cancel();
        let backend = self.backend.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = backend.unsubscribe(active.handle).await {
                        warn!("⚠️ 释放频道失败: {}", e);
                    }
                });
            }
            Err(_) => warn!("订阅管理器在运行时之外被丢弃，频道 {} 未能释放", active.handle.name()),
        }
    }
}

fn sanitize_scope<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let valid: Vec<String> = ids
        .into_iter()
        .filter_map(|id| {
            let id = id.as_ref();
            if is_valid_identifier(id) {
                Some(id.to_string())
            } else {
                warn!("⚠️ 忽略不合法的实体 ID: {:?}", id);
                None
            }
        })
        .collect();
    canonical_ids(valid)
}

async fn dispatch(
    mut signals: mpsc::UnboundedReceiver<ChannelSignal>,
    stop: CancellationToken,
    generation: u64,
    channel: String,
    scope: HashSet<String>,
    shared: Arc<Shared>,
    handler: ChangeHandler,
) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            signal = signals.recv() => signal,
        };

        match signal {
            Some(ChannelSignal::Subscribed) => {
                if shared.transition(Some(generation), ChannelPhase::Connected, None) {
                    info!("✅ 频道已连接: {} ({} 个实体)", channel, scope.len());
                }
            }
            Some(ChannelSignal::ChannelError(reason)) => {
                warn!("⚠️ 频道 {} 出错: {}", channel, reason);
                shared.transition(Some(generation), ChannelPhase::Error, Some(reason));
            }
            Some(ChannelSignal::Closed) => {
                warn!("⚠️ 频道 {} 被后端关闭", channel);
                shared.transition(Some(generation), ChannelPhase::Error, Some("channel closed".to_string()));
            }
            Some(ChannelSignal::Change(wire)) => {
                let dropped = match RowChange::from_wire(&wire) {
                    Ok(change) if scope.contains(&change.entity_id) => {
                        if !shared.record_event(generation, true) {
                            break;
                        }
                        shared.events.emit(SyncEvent::RowChanged {
                            channel: channel.clone(),
                            entity_id: change.entity_id.clone(),
                            kind: change.kind,
                            timestamp: now_millis(),
                        });
                        handler(change);
                        None
                    }
                    Ok(change) => Some(format!("实体 {} 不在订阅范围内", change.entity_id)),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(reason) = dropped {
                    debug!("丢弃频道 {} 的行变更: {}", channel, reason);
                    if !shared.record_event(generation, false) {
                        break;
                    }
                    shared.events.emit(SyncEvent::RowDropped {
                        channel: channel.clone(),
                        reason,
                        timestamp: now_millis(),
                    });
                }
            }
            None => {
                debug!("频道 {} 的信号通道已关闭", channel);
                shared.transition(Some(generation), ChannelPhase::Error, Some("channel dropped".to_string()));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend};
    use crate::entity::CharacterRow;
    use crate::error::SyncError;
    use serde_json::json;

    struct Harness {
        backend: Arc<MemoryBackend>,
        manager: SubscriptionManager,
        changes: mpsc::UnboundedReceiver<RowChange>,
    }

    fn harness(backend: MemoryBackend) -> Harness {
        let backend = Arc::new(backend);
        let (tx, changes) = mpsc::unbounded_channel();
        let manager = SubscriptionManager::new(
            backend.clone(),
            &SyncConfig::default(),
            Arc::new(EventManager::default()),
            move |change| {
                let _ = tx.send(change);
            },
        );
        Harness { backend, manager, changes }
    }

    async fn wait_for(manager: &SubscriptionManager, status: ChannelStatus) {
        let mut rx = manager.status_receiver();
        rx.wait_for(|s| *s == status).await.unwrap();
    }

    fn row(id: &str, hp: i64) -> CharacterRow {
        CharacterRow {
            id: id.to_string(),
            owner_id: "u1".to_string(),
            data: json!({"hp": hp}),
            share_code: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_scope_change_replaces_channel() {
        let h = harness(MemoryBackend::new());
        h.manager.watch(["id1", "id2"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;
        let first = resolve_channel_name("rt-chars", ["id1", "id2"]);
        assert_eq!(h.backend.live_channels(), vec![first.clone()]);

        h.manager.watch(["id3", "id2"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;
        let second = resolve_channel_name("rt-chars", ["id2", "id3"]);

        assert_eq!(
            h.backend.calls(),
            vec![
                BackendCall::Subscribe { channel: first.clone(), filter: "id=in.(id1,id2)".into() },
                BackendCall::Unsubscribe { channel: first },
                BackendCall::Subscribe { channel: second.clone(), filter: "id=in.(id2,id3)".into() },
            ]
        );
        assert_eq!(h.backend.live_channels(), vec![second]);
        assert_eq!(h.manager.stats().channels_opened, 2);
    }

    #[tokio::test]
    async fn test_same_set_in_other_order_keeps_channel() {
        let h = harness(MemoryBackend::new());
        h.manager.watch(["b", "a", "c"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;
        let status = h.manager.watch(["c", "b", "a", "a"], true).await;

        assert_eq!(status, ChannelStatus::Connected);
        assert_eq!(h.backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_scope_and_disable_go_idle() {
        let h = harness(MemoryBackend::new());
        h.manager.watch(["id1"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;

        let status = h.manager.watch(Vec::<String>::new(), true).await;
        assert_eq!(status, ChannelStatus::Idle);
        assert!(h.backend.live_channels().is_empty());

        h.manager.watch(["id1"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;
        assert_eq!(h.manager.watch(["id1"], false).await, ChannelStatus::Idle);
        assert!(h.backend.live_channels().is_empty());
        assert_eq!(h.manager.stats().channel, None);
    }

    #[tokio::test]
    async fn test_connecting_reports_idle_until_ack() {
        let h = harness(MemoryBackend::new().with_manual_ack());
        let status = h.manager.watch(["id1"], true).await;
        assert_eq!(status, ChannelStatus::Idle);
        assert_eq!(h.manager.phase(), ChannelPhase::Connecting);

        let name = resolve_channel_name("rt-chars", ["id1"]);
        assert!(h.backend.ack_channel(&name));
        wait_for(&h.manager, ChannelStatus::Connected).await;
        assert!(h.manager.stats().connected_at.is_some());
    }

    #[tokio::test]
    async fn test_channel_error_and_reconnect() {
        let h = harness(MemoryBackend::new());
        h.backend.reject_next_channel("denied");
        h.manager.watch(["id1"], true).await;
        wait_for(&h.manager, ChannelStatus::Error).await;
        assert_eq!(h.manager.stats().last_error.as_deref(), Some("denied"));

        h.manager.reconnect().await;
        wait_for(&h.manager, ChannelStatus::Connected).await;
        assert_eq!(h.backend.live_channels().len(), 1);

        // 已连接时 reconnect 不做任何事
        let calls = h.backend.calls().len();
        h.manager.reconnect().await;
        assert_eq!(h.backend.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_error_status() {
        let h = harness(MemoryBackend::new());
        h.backend.fail_next_subscribe(SyncError::Transport("offline".into()));
        let status = h.manager.watch(["id1"], true).await;
        assert_eq!(status, ChannelStatus::Error);
        assert!(h.backend.live_channels().is_empty());
    }

    #[tokio::test]
    async fn test_changes_dispatched_in_order() {
        let mut h = harness(MemoryBackend::new());
        h.manager.watch(["id1", "id2"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;

        for hp in 1..=5 {
            h.backend.insert_row(row("id1", hp));
        }
        h.backend.insert_row(row("id9", 0));
        h.backend.insert_row(row("id2", 42));

        for hp in 1..=5 {
            let change = h.changes.recv().await.unwrap();
            assert_eq!(change.entity_id, "id1");
            assert_eq!(change.row.unwrap().data["hp"], hp);
        }
        let change = h.changes.recv().await.unwrap();
        assert_eq!(change.entity_id, "id2");
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(h.manager.stats().events_delivered, 6);
    }

    #[tokio::test]
    async fn test_invalid_and_foreign_rows_dropped() {
        let mut h = harness(MemoryBackend::new());
        h.manager.watch(["id1"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;
        let name = resolve_channel_name("rt-chars", ["id1"]);

        h.backend.push_raw(&name, json!({"type": "BOGUS"}));
        h.backend.push_raw(&name, json!({"type": "INSERT", "record": {"id": "id7", "owner_id": "u"}}));
        h.backend.insert_row(row("id1", 3));

        let change = h.changes.recv().await.unwrap();
        assert_eq!(change.entity_id, "id1");
        let stats = h.manager.stats();
        assert_eq!(stats.events_dropped, 2);
        assert_eq!(stats.events_delivered, 1);
    }

    #[tokio::test]
    async fn test_invalid_ids_filtered_from_scope() {
        let h = harness(MemoryBackend::new());
        h.manager.watch(["ok1", "bad id", "x,y"], true).await;
        assert_eq!(h.manager.scope().await, vec!["ok1".to_string()]);
        assert!(matches!(
            &h.backend.calls()[0],
            BackendCall::Subscribe { filter, .. } if filter == "id=in.(ok1)"
        ));

        assert_eq!(h.manager.watch(["", "a b"], true).await, ChannelStatus::Idle);
        assert!(h.backend.live_channels().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_channel() {
        let h = harness(MemoryBackend::new());
        h.manager.watch(["id1"], true).await;
        wait_for(&h.manager, ChannelStatus::Connected).await;

        h.manager.shutdown().await;
        assert!(h.backend.live_channels().is_empty());
        assert_eq!(h.manager.watch(["id1"], true).await, ChannelStatus::Idle);
        assert!(h.backend.live_channels().is_empty());
    }
}
