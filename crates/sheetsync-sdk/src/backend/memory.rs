//! 进程内后端：同时实现推送与实时频道
//!
//! upsert 会像真实后端一样扇出给所有过滤条件命中的在线频道（线上格式与实时服务一致），
//! 并记录每一次调用，便于断言"恰好一次 upsert / 先退订再订阅"之类的时序。
//! 支持注入 upsert 失败、订阅失败与手动确认。

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

use super::{
    ChannelHandle, ChannelRequest, ChannelSignal, ChannelSink, PushTransport, RealtimeBackend,
    UpsertReceipt,
};
use crate::entity::{CharacterRow, PublishableView};
use crate::error::{Result, SyncError};

/// 后端收到的调用记录
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Upsert { entity_id: String, owner_id: String, payload: Value },
    Subscribe { channel: String, filter: String },
    Unsubscribe { channel: String },
}

struct LiveChannel {
    request: ChannelRequest,
    sink: ChannelSink,
}

#[derive(Default)]
struct MemoryState {
    rows: HashMap<String, CharacterRow>,
    channels: HashMap<Uuid, LiveChannel>,
    calls: Vec<BackendCall>,
    upsert_failures: VecDeque<SyncError>,
    subscribe_failures: VecDeque<SyncError>,
    reject_channels: VecDeque<String>,
    manual_ack: bool,
}

/// 进程内后端
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅后不自动确认，需调用 `ack_channel`
    pub fn with_manual_ack(self) -> Self {
        self.state.lock().manual_ack = true;
        self
    }

    /// 让接下来的 upsert 依次失败
    pub fn fail_next_upserts<I>(&self, errors: I)
    where
        I: IntoIterator<Item = SyncError>,
    {
        self.state.lock().upsert_failures.extend(errors);
    }

    /// 让下一次 subscribe 调用本身失败（例如网络不可达）
    pub fn fail_next_subscribe(&self, error: SyncError) {
        self.state.lock().subscribe_failures.push_back(error);
    }

    /// 让下一次订阅被后端以频道错误拒绝
    pub fn reject_next_channel(&self, reason: impl Into<String>) {
        self.state.lock().reject_channels.push_back(reason.into());
    }

    /// 手动确认某个在线频道
    pub fn ack_channel(&self, name: &str) -> bool {
        self.signal_channel(name, ChannelSignal::Subscribed)
    }

    /// 向某个在线频道报告频道级失败
    pub fn fail_channel(&self, name: &str, reason: impl Into<String>) -> bool {
        self.signal_channel(name, ChannelSignal::ChannelError(reason.into()))
    }

    /// 向某个在线频道注入原始行变更（用于测试边界校验）
    pub fn push_raw(&self, name: &str, data: Value) -> bool {
        self.signal_channel(name, ChannelSignal::Change(data))
    }

    /// 直接写入一行（模拟其他客户端写入或初始数据）
    pub fn insert_row(&self, row: CharacterRow) {
        let mut state = self.state.lock();
        let kind = if state.rows.contains_key(&row.id) { "UPDATE" } else { "INSERT" };
        let wire = change_wire(kind, &row);
        fan_out(&state, &row.id, wire);
        state.rows.insert(row.id.clone(), row);
    }

    /// 删除一行并扇出 DELETE
    pub fn delete_row(&self, id: &str) -> Option<CharacterRow> {
        let mut state = self.state.lock();
        let removed = state.rows.remove(id)?;
        let wire = json!({
            "type": "DELETE",
            "schema": "public",
            "table": "characters",
            "commit_timestamp": now_rfc3339(),
            "record": {},
            "old_record": {"id": removed.id},
        });
        fan_out(&state, id, wire);
        Some(removed)
    }

    pub fn row(&self, id: &str) -> Option<CharacterRow> {
        self.state.lock().rows.get(id).cloned()
    }

    /// 按 ID 批量读取（主持人面板初始加载）
    pub fn rows_for<I, S>(&self, ids: I) -> Vec<CharacterRow>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let state = self.state.lock();
        ids.into_iter()
            .filter_map(|id| state.rows.get(id.as_ref()).cloned())
            .collect()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn upsert_calls(&self) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::Upsert { .. }))
            .collect()
    }

    pub fn upsert_count(&self) -> usize {
        self.upsert_calls().len()
    }

    /// 当前在线频道名
    pub fn live_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .channels
            .values()
            .map(|c| c.request.name.clone())
            .collect();
        names.sort();
        names
    }

    fn signal_channel(&self, name: &str, signal: ChannelSignal) -> bool {
        let state = self.state.lock();
        let mut delivered = false;
        for channel in state.channels.values().filter(|c| c.request.name == name) {
            delivered |= channel.sink.send(signal.clone()).is_ok();
        }
        delivered
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn change_wire(kind: &str, row: &CharacterRow) -> Value {
    json!({
        "type": kind,
        "schema": "public",
        "table": "characters",
        "commit_timestamp": now_rfc3339(),
        "record": row,
        "old_record": {"id": row.id},
    })
}

fn fan_out(state: &MemoryState, id: &str, wire: Value) {
    for channel in state.channels.values() {
        if channel.request.ids.iter().any(|i| i == id) {
            if channel.sink.send(ChannelSignal::Change(wire.clone())).is_err() {
                debug!("频道 {} 的接收端已关闭", channel.request.name);
            }
        }
    }
}

fn new_share_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

#[async_trait]
impl PushTransport for MemoryBackend {
    async fn upsert(
        &self,
        entity_id: &str,
        owner_id: &str,
        view: &PublishableView,
    ) -> Result<UpsertReceipt> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Upsert {
            entity_id: entity_id.to_string(),
            owner_id: owner_id.to_string(),
            payload: view.payload().clone(),
        });

        if let Some(error) = state.upsert_failures.pop_front() {
            return Err(error);
        }

        let existing = state.rows.get(entity_id);
        let kind = if existing.is_some() { "UPDATE" } else { "INSERT" };
        let share_code = existing
            .and_then(|r| r.share_code.clone())
            .unwrap_or_else(new_share_code);

        let row = CharacterRow {
            id: entity_id.to_string(),
            owner_id: owner_id.to_string(),
            data: view.payload().clone(),
            share_code: Some(share_code),
            updated_at: Some(now_rfc3339()),
        };
        fan_out(&state, entity_id, change_wire(kind, &row));

        let receipt = UpsertReceipt {
            share_code: row.share_code.clone(),
            updated_at: row.updated_at.clone(),
        };
        state.rows.insert(row.id.clone(), row);
        Ok(receipt)
    }

    async fn fetch_rows(&self, ids: &[String]) -> Result<Vec<CharacterRow>> {
        Ok(self.rows_for(ids))
    }
}

#[async_trait]
impl RealtimeBackend for MemoryBackend {
    async fn subscribe(&self, request: ChannelRequest, sink: ChannelSink) -> Result<ChannelHandle> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Subscribe {
            channel: request.name.clone(),
            filter: request.filter(),
        });

        if let Some(error) = state.subscribe_failures.pop_front() {
            return Err(error);
        }

        let handle = ChannelHandle::new(request.name.clone());
        if let Some(reason) = state.reject_channels.pop_front() {
            let _ = sink.send(ChannelSignal::ChannelError(reason));
        } else if !state.manual_ack {
            let _ = sink.send(ChannelSignal::Subscribed);
        }
        state.channels.insert(handle.id(), LiveChannel { request, sink });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::Unsubscribe { channel: handle.name().to_string() });
        match state.channels.remove(&handle.id()) {
            Some(_) => Ok(()),
            None => Err(SyncError::Channel(format!("频道不存在: {}", handle.name()))),
        }
    }
}
