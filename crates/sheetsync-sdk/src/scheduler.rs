//! 防抖推送调度器
//!
//! 功能包括：
//! - 每次本地修改都调用 `on_entity_changed`，指纹守卫判定无需推送时直接返回
//! - 尾沿防抖：新修改取消尚未触发的定时器，静默窗口结束后推送最后一次观察到的状态
//! - 同一实体任何时刻最多一个推送在途（按实体加推送锁）
//! - 推送失败记录日志后吞掉，已推送标记保持不变；按 `RetryPolicy` 有界重试
//! - 上下文销毁时取消所有待触发的定时器

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::PushTransport;
use crate::config::{SchedulerConfig, SyncConfig};
use crate::entity::{Entity, RevisionMarker};
use crate::error::{Result, SyncError};
use crate::events::{now_millis, EventManager, SyncEvent};
use crate::fingerprint::should_push;
use crate::privacy::PrivacyFilter;
use crate::retry_policy::PushFailureReason;
use crate::timer::ScheduledTask;

/// 已安排但尚未触发的推送
struct PendingPush {
    task: ScheduledTask,
    /// 触发时要推送的快照
    entity: Entity,
    /// 已失败的重试次数
    attempt: u32,
}

/// 单个实体的同步意图
#[derive(Default)]
struct SyncIntent {
    last_pushed: Option<RevisionMarker>,
    pending: Option<PendingPush>,
    in_flight: Option<RevisionMarker>,
    share_code: Option<String>,
    /// 每次重新安排都递增，过期的定时器据此放弃
    generation: u64,
    push_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncIntent {
    fn is_idle(&self) -> bool {
        self.pending.is_none() && self.in_flight.is_none()
    }

    /// 该修订是否已安排或正在推送
    fn is_tracking(&self, revision: &RevisionMarker) -> bool {
        self.pending.as_ref().map(|p| &p.entity.revision) == Some(revision)
            || self.in_flight.as_ref() == Some(revision)
    }
}

struct SchedulerInner {
    transport: Arc<dyn PushTransport>,
    filter: PrivacyFilter,
    config: SchedulerConfig,
    events: Arc<EventManager>,
    runtime: Handle,
    intents: Mutex<HashMap<String, SyncIntent>>,
    disposed: CancellationToken,
}

/// 防抖推送调度器
pub struct PushScheduler {
    inner: Arc<SchedulerInner>,
}

impl PushScheduler {
    /// 创建调度器；必须在 tokio 运行时中调用
    pub fn new(
        transport: Arc<dyn PushTransport>,
        config: &SyncConfig,
        events: Arc<EventManager>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| SyncError::Config("PushScheduler 必须在 tokio 运行时中创建".to_string()))?;

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                transport,
                filter: PrivacyFilter::new(config.privacy.clone()),
                config: config.scheduler.clone(),
                events,
                runtime,
                intents: Mutex::new(HashMap::new()),
                disposed: CancellationToken::new(),
            }),
        })
    }

    /// 本地实体每次被修改时调用
    ///
    /// 同步方法，可在存储监听器中直接调用；从不向调用方返回错误。
    pub fn on_entity_changed(&self, entity: &Entity) {
        let inner = &self.inner;
        if inner.disposed.is_cancelled() {
            debug!("调度器已销毁，忽略实体 {} 的修改", entity.id);
            return;
        }

        let mut cancelled = false;
        {
            let mut intents = inner.intents.lock();
            let intent = intents.entry(entity.id.clone()).or_default();

            if !should_push(entity, intent.last_pushed.as_ref()) {
                debug!("实体 {} 的修订 {} 已推送，跳过", entity.id, entity.revision);
                return;
            }
            if intent.is_tracking(&entity.revision) {
                debug!("实体 {} 的修订 {} 已在推送队列中", entity.id, entity.revision);
                return;
            }

            if let Some(previous) = intent.pending.take() {
                cancelled = previous.task.cancel();
            }

            intent.generation += 1;
            let task = inner.arm(&entity.id, intent.generation, inner.config.quiet_window());
            intent.pending = Some(PendingPush {
                task,
                entity: entity.clone(),
                attempt: 0,
            });
        }

        if cancelled {
            inner.events.emit(SyncEvent::PushCancelled {
                entity_id: entity.id.clone(),
                timestamp: now_millis(),
            });
        }
        inner.events.emit(SyncEvent::PushScheduled {
            entity_id: entity.id.clone(),
            revision: entity.revision.to_string(),
            timestamp: now_millis(),
        });
    }

    /// 立即推送某个实体的待推送状态，不再等待静默窗口
    ///
    /// 返回 false 表示没有待触发的推送（或它已经在途）。
    pub async fn flush(&self, entity_id: &str) -> bool {
        let generation = {
            let intents = self.inner.intents.lock();
            let Some(intent) = intents.get(entity_id) else {
                return false;
            };
            match &intent.pending {
                Some(pending) if pending.task.cancel() => intent.generation,
                _ => return false,
            }
        };
        debug!("立即推送实体 {}", entity_id);
        self.inner.fire(entity_id, generation).await;
        true
    }

    /// 立即推送所有待推送的实体，返回推送的数量
    pub async fn flush_all(&self) -> usize {
        let ids: Vec<String> = {
            let intents = self.inner.intents.lock();
            intents
                .iter()
                .filter(|(_, intent)| intent.pending.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut flushed = 0;
        for id in ids {
            if self.flush(&id).await {
                flushed += 1;
            }
        }
        if flushed > 0 {
            info!("✅ 已立即推送 {} 个实体", flushed);
        }
        flushed
    }

    /// 停止跟踪某个实体（例如所属界面卸载），待触发的推送被取消
    pub fn forget(&self, entity_id: &str) {
        let removed = self.inner.intents.lock().remove(entity_id);
        if let Some(PendingPush { task, .. }) = removed.and_then(|intent| intent.pending) {
            if task.cancel() {
                self.inner.events.emit(SyncEvent::PushCancelled {
                    entity_id: entity_id.to_string(),
                    timestamp: now_millis(),
                });
            }
        }
    }

    /// 清理 `keep` 返回 false 且没有待推送、在途推送的实体，返回清理数量
    pub fn retain_idle<F>(&self, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut intents = self.inner.intents.lock();
        let before = intents.len();
        intents.retain(|id, intent| keep(id) || !intent.is_idle());
        let removed = before - intents.len();
        if removed > 0 {
            debug!("清理 {} 个空闲实体的同步记录", removed);
        }
        removed
    }

    /// 当前跟踪的实体数量
    pub fn tracked_count(&self) -> usize {
        self.inner.intents.lock().len()
    }

    /// 销毁调度器：取消所有待触发的推送，之后的修改通知全部忽略
    ///
    /// 已在途的推送会完整执行，但其结果不再记录。
    pub fn dispose(&self) {
        if self.inner.disposed.is_cancelled() {
            return;
        }
        self.inner.disposed.cancel();

        let drained: Vec<(String, SyncIntent)> = self.inner.intents.lock().drain().collect();
        let mut cancelled = 0;
        for (entity_id, intent) in drained {
            if let Some(pending) = intent.pending {
                if pending.task.cancel() {
                    cancelled += 1;
                    self.inner.events.emit(SyncEvent::PushCancelled {
                        entity_id,
                        timestamp: now_millis(),
                    });
                }
            }
        }
        info!("推送调度器已销毁，取消了 {} 个待推送", cancelled);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.is_cancelled()
    }

    /// 上次成功推送的修订
    pub fn last_pushed(&self, entity_id: &str) -> Option<RevisionMarker> {
        self.inner
            .intents
            .lock()
            .get(entity_id)
            .and_then(|intent| intent.last_pushed.clone())
    }

    /// 后端为该实体生成的短角色码
    pub fn share_code(&self, entity_id: &str) -> Option<String> {
        self.inner
            .intents
            .lock()
            .get(entity_id)
            .and_then(|intent| intent.share_code.clone())
    }

    pub fn is_pending(&self, entity_id: &str) -> bool {
        self.inner
            .intents
            .lock()
            .get(entity_id)
            .map(|intent| intent.pending.is_some())
            .unwrap_or(false)
    }

    /// 待触发的推送数
    pub fn pending_count(&self) -> usize {
        self.inner
            .intents
            .lock()
            .values()
            .filter(|intent| intent.pending.is_some())
            .count()
    }
}

impl Drop for PushScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl SchedulerInner {
    /// 为实体安排一次定时推送
    fn arm(self: &Arc<Self>, entity_id: &str, generation: u64, delay: Duration) -> ScheduledTask {
        let weak: Weak<SchedulerInner> = Arc::downgrade(self);
        let entity_id = entity_id.to_string();
        ScheduledTask::schedule_on(&self.runtime, delay, async move {
            if let Some(inner) = weak.upgrade() {
                inner.fire(&entity_id, generation).await;
            }
        })
    }

    async fn fire(self: &Arc<Self>, entity_id: &str, generation: u64) {
        let push_lock = {
            let intents = self.intents.lock();
            match intents.get(entity_id) {
                Some(intent) if intent.generation == generation => intent.push_lock.clone(),
                _ => return,
            }
        };

        // 等待同一实体上一次推送结束
        let _guard = push_lock.lock().await;

        let (entity, attempt) = {
            let mut intents = self.intents.lock();
            if self.disposed.is_cancelled() {
                return;
            }
            let Some(intent) = intents.get_mut(entity_id) else {
                return;
            };
            if intent.generation != generation {
                debug!("实体 {} 的推送已被更新的修改取代", entity_id);
                return;
            }
            let Some(pending) = intent.pending.take() else {
                return;
            };
            intent.in_flight = Some(pending.entity.revision.clone());
            (pending.entity, pending.attempt)
        };

        let view = self.filter.to_publishable(&entity);
        let result = self.transport.upsert(&entity.id, &entity.owner_id, &view).await;
        self.complete(entity, generation, attempt, result);
    }

    fn complete(
        self: &Arc<Self>,
        entity: Entity,
        generation: u64,
        attempt: u32,
        result: Result<crate::backend::UpsertReceipt>,
    ) {
        let event = {
            let mut intents = self.intents.lock();
            let Some(intent) = intents.get_mut(&entity.id) else {
                debug!("实体 {} 已不再跟踪，忽略推送结果", entity.id);
                return;
            };
            intent.in_flight = None;

            match result {
                Ok(receipt) => {
                    intent.last_pushed = Some(entity.revision.clone());
                    if receipt.share_code.is_some() {
                        intent.share_code = receipt.share_code;
                    }
                    info!("✅ 角色 {} 已同步 (修订 {})", entity.id, entity.revision);
                    SyncEvent::PushSucceeded {
                        entity_id: entity.id.clone(),
                        revision: entity.revision.to_string(),
                        share_code: intent.share_code.clone(),
                        timestamp: now_millis(),
                    }
                }
                Err(error) => {
                    let reason = PushFailureReason::from(&error);
                    let superseded = intent.generation != generation || intent.pending.is_some();
                    let retry_in = if superseded || self.disposed.is_cancelled() {
                        None
                    } else {
                        self.config.retry.next_delay(attempt, &reason)
                    };

                    match retry_in {
                        Some(delay) => warn!(
                            "⚠️ 角色 {} 推送失败: {}，{}ms 后第 {} 次重试",
                            entity.id,
                            error,
                            delay.as_millis(),
                            attempt + 1
                        ),
                        None => warn!("⚠️ 角色 {} 推送失败: {}，等待下一次修改", entity.id, error),
                    }

                    if let Some(delay) = retry_in {
                        intent.generation += 1;
                        let task = self.arm(&entity.id, intent.generation, delay);
                        intent.pending = Some(PendingPush {
                            task,
                            entity: entity.clone(),
                            attempt: attempt + 1,
                        });
                    }

                    SyncEvent::PushFailed {
                        entity_id: entity.id.clone(),
                        revision: entity.revision.to_string(),
                        error: error.to_string(),
                        retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
                        timestamp: now_millis(),
                    }
                }
            }
        };
        self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend, UpsertReceipt};
    use crate::entity::{Attachment, PublishableView};
    use crate::retry_policy::RetryPolicy;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler_with(backend: Arc<MemoryBackend>, retry: RetryPolicy) -> PushScheduler {
        let config = SyncConfig::builder().retry_policy(retry).build();
        PushScheduler::new(backend, &config, Arc::new(EventManager::default())).unwrap()
    }

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1_000,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    fn character(revision: &str, hp: i64) -> Entity {
        Entity::new("c1", "u1", json!({"name": "Aria", "hp": hp}))
            .with_revision(RevisionMarker::new(revision))
    }

    fn pushed_payloads(backend: &MemoryBackend) -> Vec<Value> {
        backend
            .upsert_calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Upsert { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_push_after_quiet_window() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));

        let entity = Entity::new("c1", "u1", json!({"name": "Aria", "notes": "secret plan"}))
            .with_revision(RevisionMarker::new("t0"))
            .with_attachment(Attachment::shared("inventory", json!(["rope"])))
            .with_attachment(Attachment::private("journal", json!("diary")));
        scheduler.on_entity_changed(&entity);
        assert!(scheduler.is_pending("c1"));

        advance(1_999).await;
        assert_eq!(backend.upsert_count(), 0);

        advance(2).await;
        assert_eq!(
            backend.upsert_calls(),
            vec![BackendCall::Upsert {
                entity_id: "c1".to_string(),
                owner_id: "u1".to_string(),
                payload: json!({"name": "Aria", "_inventory": ["rope"]}),
            }]
        );
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t0")));
        assert!(scheduler.share_code("c1").is_some());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_marker_never_pushes_again() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));
        let entity = character("t0", 10);

        // 窗口内重复通知不会重新计时
        scheduler.on_entity_changed(&entity);
        advance(1_500).await;
        scheduler.on_entity_changed(&entity);
        advance(600).await;
        assert_eq!(backend.upsert_count(), 1);

        for _ in 0..5 {
            scheduler.on_entity_changed(&entity);
        }
        advance(10_000).await;
        assert_eq!(backend.upsert_count(), 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_last_state() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));

        for i in 0..10 {
            scheduler.on_entity_changed(&character(&format!("t{}", i), i));
            advance(100).await;
        }
        advance(2_000).await;

        assert_eq!(pushed_payloads(&backend), vec![json!({"name": "Aria", "hp": 9})]);
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t9")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_pending_push() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));

        scheduler.on_entity_changed(&character("t0", 1));
        advance(500).await;
        scheduler.dispose();
        advance(10_000).await;
        assert_eq!(backend.upsert_count(), 0);

        scheduler.on_entity_changed(&character("t1", 2));
        advance(10_000).await;
        assert_eq!(backend.upsert_count(), 0);
        assert!(scheduler.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_retry_waits_for_next_notification() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), RetryPolicy::disabled());
        backend.fail_next_upserts([SyncError::Transport("offline".into())]);

        let entity = character("t0", 1);
        scheduler.on_entity_changed(&entity);
        advance(60_000).await;
        assert_eq!(backend.upsert_count(), 1);
        assert_eq!(scheduler.last_pushed("c1"), None);

        // 标记仍未推送，同样的快照会再次被推送
        scheduler.on_entity_changed(&entity);
        advance(2_001).await;
        assert_eq!(backend.upsert_count(), 2);
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t0")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(2));
        let mut events = scheduler.inner.events.subscribe();
        backend.fail_next_upserts([
            SyncError::Transport("offline".into()),
            SyncError::Transport("offline".into()),
        ]);

        scheduler.on_entity_changed(&character("t0", 1));

        // 网络不可用的延迟倍数为 2：第一次重试 2000ms，第二次 4000ms
        advance(2_001).await;
        assert_eq!(backend.upsert_count(), 1);
        assert_eq!(scheduler.last_pushed("c1"), None);
        assert!(scheduler.is_pending("c1"));

        advance(2_000).await;
        assert_eq!(backend.upsert_count(), 2);

        advance(4_000).await;
        assert_eq!(backend.upsert_count(), 3);
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t0")));

        let mut retry_delays = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::PushFailed { retry_in_ms, .. } = event {
                retry_delays.push(retry_in_ms);
            }
        }
        assert_eq!(retry_delays, vec![Some(2_000), Some(4_000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(3));
        backend.fail_next_upserts([SyncError::from_status(422, "bad row")]);

        scheduler.on_entity_changed(&character("t0", 1));
        advance(60_000).await;
        assert_eq!(backend.upsert_count(), 1);
        assert!(!scheduler.is_pending("c1"));
        assert_eq!(scheduler.last_pushed("c1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_mutation_supersedes_retry() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(3));
        backend.fail_next_upserts([SyncError::Transport("offline".into())]);

        scheduler.on_entity_changed(&character("t0", 1));
        advance(2_001).await;
        assert_eq!(backend.upsert_count(), 1);

        scheduler.on_entity_changed(&character("t1", 2));
        advance(10_000).await;
        assert_eq!(
            pushed_payloads(&backend),
            vec![json!({"name": "Aria", "hp": 1}), json!({"name": "Aria", "hp": 2})]
        );
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pushes_immediately() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));
        scheduler.on_entity_changed(&character("t0", 1));
        scheduler.on_entity_changed(
            &Entity::new("c2", "u2", json!({})).with_revision(RevisionMarker::new("t0")),
        );

        assert!(scheduler.flush("c1").await);
        assert_eq!(backend.upsert_count(), 1);
        assert!(!scheduler.flush("c1").await);

        assert_eq!(scheduler.flush_all().await, 1);
        assert_eq!(backend.upsert_count(), 2);

        advance(5_000).await;
        assert_eq!(backend.upsert_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forget_cancels_only_that_entity() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));
        scheduler.on_entity_changed(&character("t0", 1));
        scheduler.on_entity_changed(
            &Entity::new("c2", "u2", json!({})).with_revision(RevisionMarker::new("t0")),
        );
        scheduler.forget("c1");
        advance(3_000).await;

        assert!(matches!(
            backend.upsert_calls().as_slice(),
            [BackendCall::Upsert { entity_id, .. }] if entity_id == "c2"
        ));
    }

    /// 每次 upsert 耗时 3 秒，记录最大并发数
    #[derive(Default)]
    struct SlowTransport {
        active: AtomicUsize,
        max_active: AtomicUsize,
        payloads: parking_lot::Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl PushTransport for SlowTransport {
        async fn upsert(
            &self,
            _entity_id: &str,
            _owner_id: &str,
            view: &PublishableView,
        ) -> Result<UpsertReceipt> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3)).await;
            self.payloads.lock().push(view.payload().clone());
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(UpsertReceipt::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_push_in_flight() {
        let transport = Arc::new(SlowTransport::default());
        let scheduler =
            PushScheduler::new(transport.clone(), &SyncConfig::default(), Arc::new(EventManager::default()))
                .unwrap();

        scheduler.on_entity_changed(&character("t0", 1));
        advance(2_500).await;
        // 第一次推送在途（2000ms ~ 5000ms）
        scheduler.on_entity_changed(&character("t0", 1));
        scheduler.on_entity_changed(&character("t1", 2));
        advance(10_000).await;

        assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(
            *transport.payloads.lock(),
            vec![json!({"name": "Aria", "hp": 1}), json!({"name": "Aria", "hp": 2})]
        );
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retain_idle_keeps_busy_entities() {
        let backend = Arc::new(MemoryBackend::new());
        let scheduler = scheduler_with(backend.clone(), no_jitter(0));

        scheduler.on_entity_changed(&character("t1", 10));
        advance(2_100).await;
        assert_eq!(scheduler.last_pushed("c1"), Some(RevisionMarker::new("t1")));

        let mut pending = character("t1", 4);
        pending.id = "c2".to_string();
        scheduler.on_entity_changed(&pending);
        assert_eq!(scheduler.tracked_count(), 2);

        // c1 已从存储中移除，c2 仍有待推送
        assert_eq!(scheduler.retain_idle(|_| false), 1);
        assert_eq!(scheduler.tracked_count(), 1);
        assert!(scheduler.is_pending("c2"));
        assert_eq!(scheduler.last_pushed("c1"), None);

        advance(2_100).await;
        assert_eq!(backend.upsert_count(), 2);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = PushScheduler::new(
            Arc::new(MemoryBackend::new()),
            &SyncConfig::default(),
            Arc::new(EventManager::default()),
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
