//! 后端协作方边界
//!
//! - `PushTransport`：把可发布视图 upsert 到 `characters` 表（按 id 最后写入者胜）
//! - `RealtimeBackend`：按过滤条件打开/关闭实时频道，信号经 `ChannelSink` 回传
//!
//! 客户端句柄显式构造并注入，测试用 `memory::MemoryBackend` 替换。

pub mod memory;
pub mod realtime_ws;
pub mod rest;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel_name::channel_filter;
use crate::entity::{CharacterRow, PublishableView};
use crate::error::Result;

pub use memory::{BackendCall, MemoryBackend};
pub use realtime_ws::RealtimeWsBackend;
pub use rest::RestBackend;

/// 推送与频道共用的会话令牌
///
/// 续期由外部负责；更新一次后，后续的 upsert 与新的频道加入都使用新令牌。
#[derive(Debug, Clone, Default)]
pub struct AccessToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl AccessToken {
    pub fn new(token: Option<String>) -> Self {
        Self { inner: Arc::new(RwLock::new(token)) }
    }

    pub fn set(&self, token: Option<String>) {
        *self.inner.write() = token;
    }

    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }

    /// 没有会话令牌时退回到 API key
    pub fn bearer(&self, api_key: &str) -> String {
        self.get().unwrap_or_else(|| api_key.to_string())
    }
}

/// upsert 回执
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReceipt {
    /// 后端生成的短角色码
    pub share_code: Option<String>,
    pub updated_at: Option<String>,
}

/// 推送传输适配器
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// 幂等写入；同一 id 以最后一次写入为准
    async fn upsert(
        &self,
        entity_id: &str,
        owner_id: &str,
        view: &PublishableView,
    ) -> Result<UpsertReceipt>;

    /// 按 ID 批量读取已存储的行（主持人面板初始加载）
    ///
    /// 只写的传输返回空列表
    async fn fetch_rows(&self, _ids: &[String]) -> Result<Vec<CharacterRow>> {
        Ok(Vec::new())
    }
}

/// 频道订阅请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub name: String,
    pub schema: String,
    pub table: String,
    /// 已排序去重的实体 ID
    pub ids: Vec<String>,
}

impl ChannelRequest {
    /// 行过滤条件，例如 `id=in.(a,b)`
    pub fn filter(&self) -> String {
        channel_filter(&self.ids)
    }
}

/// 后端回传给订阅方的原始信号
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// 后端确认频道已生效
    Subscribed,
    /// 频道级失败
    ChannelError(String),
    /// 后端关闭了频道
    Closed,
    /// 行变更（未校验的线上格式）
    Change(Value),
}

pub type ChannelSink = mpsc::UnboundedSender<ChannelSignal>;

/// 频道句柄
///
/// 只归创建它的订阅管理器所有，不可克隆；交还给 `unsubscribe` 即释放。
#[derive(Debug, PartialEq, Eq)]
pub struct ChannelHandle {
    id: Uuid,
    name: String,
}

impl ChannelHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 实时频道后端
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// 打开频道；确认与失败通过 `sink` 异步回传
    async fn subscribe(&self, request: ChannelRequest, sink: ChannelSink) -> Result<ChannelHandle>;

    /// 释放频道
    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<()>;
}
