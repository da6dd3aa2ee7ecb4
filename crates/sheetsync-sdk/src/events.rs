//! 事件系统模块 - 同步引擎对外的可观察性出口
//!
//! 功能包括：
//! - 推送调度 / 成功 / 失败 / 取消事件
//! - 频道状态变更事件
//! - 入站行变更事件与边界校验丢弃事件
//! - 事件广播和订阅机制

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::subscription::{ChangeKind, ChannelPhase};

/// 同步事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    /// 已为实体安排一次推送（防抖计时开始）
    PushScheduled {
        entity_id: String,
        revision: String,
        timestamp: u64,
    },
    /// 推送成功
    PushSucceeded {
        entity_id: String,
        revision: String,
        share_code: Option<String>,
        timestamp: u64,
    },
    /// 推送失败（已记录日志并吞掉）
    PushFailed {
        entity_id: String,
        revision: String,
        error: String,
        /// 下一次自动重试的等待时间；None 表示等待下一次修改
        retry_in_ms: Option<u64>,
        timestamp: u64,
    },
    /// 待触发的推送被取消（被新修改取代或上下文销毁）
    PushCancelled {
        entity_id: String,
        timestamp: u64,
    },
    /// 频道状态变更
    ChannelStatusChanged {
        channel: Option<String>,
        old_phase: ChannelPhase,
        new_phase: ChannelPhase,
        timestamp: u64,
    },
    /// 收到行变更并已交给处理器
    RowChanged {
        channel: String,
        entity_id: String,
        kind: ChangeKind,
        timestamp: u64,
    },
    /// 入站行变更在边界校验中被丢弃
    RowDropped {
        channel: String,
        reason: String,
        timestamp: u64,
    },
}

impl SyncEvent {
    /// 获取事件类型字符串
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::PushScheduled { .. } => "push_scheduled",
            SyncEvent::PushSucceeded { .. } => "push_succeeded",
            SyncEvent::PushFailed { .. } => "push_failed",
            SyncEvent::PushCancelled { .. } => "push_cancelled",
            SyncEvent::ChannelStatusChanged { .. } => "channel_status_changed",
            SyncEvent::RowChanged { .. } => "row_changed",
            SyncEvent::RowDropped { .. } => "row_dropped",
        }
    }

    /// 获取事件关联的实体ID
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            SyncEvent::PushScheduled { entity_id, .. }
            | SyncEvent::PushSucceeded { entity_id, .. }
            | SyncEvent::PushFailed { entity_id, .. }
            | SyncEvent::PushCancelled { entity_id, .. }
            | SyncEvent::RowChanged { entity_id, .. } => Some(entity_id),
            _ => None,
        }
    }

    /// 获取事件时间戳（UTC 毫秒）
    pub fn timestamp(&self) -> u64 {
        match self {
            SyncEvent::PushScheduled { timestamp, .. }
            | SyncEvent::PushSucceeded { timestamp, .. }
            | SyncEvent::PushFailed { timestamp, .. }
            | SyncEvent::PushCancelled { timestamp, .. }
            | SyncEvent::ChannelStatusChanged { timestamp, .. }
            | SyncEvent::RowChanged { timestamp, .. }
            | SyncEvent::RowDropped { timestamp, .. } => *timestamp,
        }
    }
}

/// 当前 UTC 毫秒时间戳
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// 事件过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// 事件类型过滤器
    pub event_types: Option<Vec<String>>,
    /// 实体ID过滤器
    pub entity_ids: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_entity_ids(mut self, entity_ids: Vec<String>) -> Self {
        self.entity_ids = Some(entity_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &SyncEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref ids) = self.entity_ids {
            match event.entity_id() {
                Some(id) if ids.iter().any(|i| i == id) => {}
                _ => return false, // 事件没有实体ID但过滤器要求有
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Box<dyn Fn(&SyncEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<u64>,
}

/// 事件管理器
pub struct EventManager {
    sender: broadcast::Sender<SyncEvent>,
    listeners: Arc<parking_lot::RwLock<HashMap<String, Vec<EventListener>>>>,
    stats: Arc<parking_lot::RwLock<EventStats>>,
}

impl EventManager {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            listeners: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            stats: Arc::new(parking_lot::RwLock::new(EventStats::default())),
        }
    }

    /// 发布事件
    ///
    /// 同步方法：推送调度与频道分发都在非 async 上下文中调用它。
    pub fn emit(&self, event: SyncEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats.events_by_type.entry(event.event_type().to_string()).or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景，仅打 debug
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        let listeners = self.listeners.read();
        if let Some(event_listeners) = listeners.get(event.event_type()) {
            for listener in event_listeners {
                listener(&event);
            }
        }
        if let Some(general_listeners) = listeners.get("*") {
            for listener in general_listeners {
                listener(&event);
            }
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器，`"*"` 监听所有事件
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write();
        listeners.entry(event_type.to_string()).or_default().push(Box::new(listener));

        let mut stats = self.stats.write();
        stats.listener_count = listeners.values().map(|v| v.len()).sum();

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;
        info!("Cleared all event listeners");
    }

    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 带过滤的事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<SyncEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    fn new(receiver: broadcast::Receiver<SyncEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件；发送端关闭时返回 None
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Filtered receiver lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
