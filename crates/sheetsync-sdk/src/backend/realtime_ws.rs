//! WebSocket 实时频道适配器（Phoenix channel 协议）
//!
//! 每个频道一条连接：
//! - 连接后发送 `phx_join`，携带 `postgres_changes` 过滤配置
//! - `phx_reply` 中 status=ok → `Subscribed`，status=error → `ChannelError`
//! - `postgres_changes` → `Change(payload.data)`
//! - 定时发送 `heartbeat`；`unsubscribe` 时发送 `phx_leave` 并关闭连接

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    AccessToken, ChannelHandle, ChannelRequest, ChannelSignal, ChannelSink, RealtimeBackend,
};
use crate::config::BackendConfig;
use crate::error::{Result, SyncError};

const PROTOCOL_VSN: &str = "1.0.0";
const HEARTBEAT_TOPIC: &str = "phoenix";

/// Phoenix 协议帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

struct WsChannel {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// WebSocket 实时后端
pub struct RealtimeWsBackend {
    config: BackendConfig,
    access_token: AccessToken,
    channels: Mutex<HashMap<Uuid, WsChannel>>,
    next_ref: Arc<AtomicU64>,
}

impl RealtimeWsBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Self::with_token(config, AccessToken::new(config.access_token.clone()))
    }

    /// 与推送后端共享令牌，续期后新的频道加入使用新令牌
    pub fn with_token(config: &BackendConfig, access_token: AccessToken) -> Result<Self> {
        let backend = Self {
            config: config.clone(),
            access_token,
            channels: Mutex::new(HashMap::new()),
            next_ref: Arc::new(AtomicU64::new(1)),
        };
        // 提前校验地址
        backend.socket_url()?;
        Ok(backend)
    }

    fn socket_url(&self) -> Result<Url> {
        let base = self
            .config
            .resolved_realtime_url()
            .ok_or_else(|| SyncError::Config("缺少 realtime_url / rest_url".to_string()))?;
        let mut url = Url::parse(&format!("{}/realtime/v1/websocket", base))
            .map_err(|e| SyncError::Config(format!("realtime_url 无效: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.config.api_key)
            .append_pair("vsn", PROTOCOL_VSN);
        Ok(url)
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// 当前打开的连接数
    pub fn open_channels(&self) -> usize {
        self.channels.lock().len()
    }
}

pub(crate) fn topic_for(channel_name: &str) -> String {
    format!("realtime:{}", channel_name)
}

pub(crate) fn join_message(request: &ChannelRequest, access_token: &str, join_ref: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic_for(&request.name),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": {"self": false},
                "presence": {"key": ""},
                "postgres_changes": [{
                    "event": "*",
                    "schema": request.schema,
                    "table": request.table,
                    "filter": request.filter(),
                }],
            },
            "access_token": access_token,
        }),
        msg_ref: Some(join_ref.to_string()),
        join_ref: Some(join_ref.to_string()),
    }
}

fn control_message(topic: &str, event: &str, msg_ref: String) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: event.to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref),
        join_ref: None,
    }
}

/// 把入站帧翻译成频道信号；与本频道无关的帧返回 None
pub(crate) fn interpret(message: &PhoenixMessage, topic: &str, join_ref: &str) -> Option<ChannelSignal> {
    if message.topic != topic {
        return None;
    }
    match message.event.as_str() {
        "phx_reply" if message.msg_ref.as_deref() == Some(join_ref) => {
            match message.payload.get("status").and_then(Value::as_str) {
                Some("ok") => Some(ChannelSignal::Subscribed),
                _ => Some(ChannelSignal::ChannelError(reason_of(&message.payload))),
            }
        }
        "system" => match message.payload.get("status").and_then(Value::as_str) {
            Some("error") => Some(ChannelSignal::ChannelError(reason_of(&message.payload))),
            _ => None,
        },
        "postgres_changes" => message
            .payload
            .get("data")
            .cloned()
            .map(ChannelSignal::Change),
        "phx_error" => Some(ChannelSignal::ChannelError("channel crashed".to_string())),
        "phx_close" => Some(ChannelSignal::Closed),
        _ => None,
    }
}

fn reason_of(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("subscription rejected")
        .to_string()
}

fn encode(message: &PhoenixMessage) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(message)?))
}

#[async_trait]
impl RealtimeBackend for RealtimeWsBackend {
    async fn subscribe(&self, request: ChannelRequest, sink: ChannelSink) -> Result<ChannelHandle> {
        let url = self.socket_url()?;
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SyncError::Timeout(format!("连接实时服务超时: {}", request.name)))??;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let topic = topic_for(&request.name);
        let join_ref = self.next_ref();
        let token = self.access_token.bearer(&self.config.api_key);
        let join = join_message(&request, &token, &join_ref);
        ws_sender.send(encode(&join)?).await?;

        let handle = ChannelHandle::new(request.name.clone());
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let next_ref = self.next_ref.clone();
        let heartbeat_every = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        let channel_name = request.name.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_every);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_shutdown.cancelled() => {
                        let leave = control_message(&topic, "phx_leave", next_ref.fetch_add(1, Ordering::SeqCst).to_string());
                        if let Ok(frame) = encode(&leave) {
                            let _ = ws_sender.send(frame).await;
                        }
                        let _ = ws_sender.close().await;
                        debug!("频道 {} 已离开", channel_name);
                        break;
                    }
                    _ = ticker.tick() => {
                        let heartbeat = control_message(HEARTBEAT_TOPIC, "heartbeat", next_ref.fetch_add(1, Ordering::SeqCst).to_string());
                        let sent = match encode(&heartbeat) {
                            Ok(frame) => ws_sender.send(frame).await.is_ok(),
                            Err(_) => false,
                        };
                        if !sent {
                            let _ = sink.send(ChannelSignal::ChannelError("heartbeat failed".to_string()));
                            break;
                        }
                    }
                    incoming = ws_receiver.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<PhoenixMessage>(&text) {
                                    Ok(message) => {
                                        if let Some(signal) = interpret(&message, &topic, &join_ref) {
                                            let _ = sink.send(signal);
                                        }
                                    }
                                    Err(e) => warn!("频道 {} 收到无法解析的帧: {}", channel_name, e),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = sink.send(ChannelSignal::Closed);
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = sink.send(ChannelSignal::ChannelError(e.to_string()));
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        });

        self.channels
            .lock()
            .insert(handle.id(), WsChannel { shutdown, task });
        info!("📡 已发送频道订阅请求: {}", request.name);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<()> {
        let channel = self.channels.lock().remove(&handle.id());
        match channel {
            Some(channel) => {
                channel.shutdown.cancel();
                if tokio::time::timeout(Duration::from_secs(2), channel.task).await.is_err() {
                    warn!("频道 {} 关闭超时", handle.name());
                }
                Ok(())
            }
            None => Err(SyncError::Channel(format!("频道不存在: {}", handle.name()))),
        }
    }
}
