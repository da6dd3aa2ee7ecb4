//! SheetSync SDK - 角色卡同步与实时分发引擎
//!
//! 玩家设备上的角色卡是唯一可信源；本 SDK 负责让后端记录最终与之一致，
//! 并把多个玩家的实时更新分发给观察会话的主持人，同时保证私有数据不离开设备：
//! - 🧬 指纹守卫：修订标记未变化时不推送
//! - ⏱️ 防抖推送：静默窗口内的多次修改合并为一次写入，同一实体最多一个推送在途
//! - 🔐 隐私过滤：私有字段与私有侧数据在推送前剔除
//! - 📡 订阅管理：按实体 ID 集合维护唯一的实时频道，作用域变化时先退订再订阅
//! - 🔁 有界重试：失败推送按退避策略重试，新修改总是取代旧的重试
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use sheetsync_sdk::{Entity, LiveRoster, MemoryEntityStore, SheetSyncClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .rest_url("https://project.example.com")
//!         .api_key("anon-key")
//!         .build();
//!     let client = SheetSyncClient::connect(config)?;
//!
//!     // 玩家端：每次修改都会在静默窗口后推送
//!     let store = Arc::new(MemoryEntityStore::new());
//!     let _session = client.attach_store(store.clone());
//!     store.insert(Entity::new("char-1", "user-1", json!({"name": "Aria", "hp": {"current": 12}})));
//!     store.update("char-1", |data| data["hp"]["current"] = json!(9))?;
//!
//!     // 主持人端：订阅玩家角色的实时变更
//!     let roster = Arc::new(LiveRoster::new());
//!     let channel = client.observe_roster(&roster).await;
//!     let status = channel.watch(["char-1", "char-2"], true).await;
//!     println!("频道状态: {:?}", status);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod channel_name;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod lifecycle;
pub mod logging;
pub mod privacy;
pub mod retry_policy;
pub mod roster;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod subscription;
pub mod timer;
pub mod version;

// 重新导出核心类型，方便使用
pub use backend::{
    AccessToken, ChannelHandle, ChannelRequest, ChannelSignal, MemoryBackend, PushTransport,
    RealtimeBackend, RealtimeWsBackend, RestBackend, UpsertReceipt,
};
pub use channel_name::{resolve_channel_name, DEFAULT_CHANNEL_NAMESPACE};
pub use client::SheetSyncClient;
pub use config::{BackendConfig, SchedulerConfig, SyncConfig, SyncConfigBuilder};
pub use entity::{Attachment, CharacterRow, Entity, PublishableView, RevisionMarker, Visibility};
pub use error::{Result, SyncError};
pub use events::{EventFilter, EventManager, SyncEvent};
pub use fingerprint::should_push;
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use logging::init_tracing;
pub use privacy::{PrivacyFilter, PrivacyPolicy};
pub use retry_policy::{PushFailureReason, RetryPolicy};
pub use roster::{CharacterSummary, LiveRoster};
pub use scheduler::PushScheduler;
pub use session::SyncSession;
pub use store::{EntityStore, MemoryEntityStore};
pub use subscription::{
    ChangeKind, ChannelPhase, ChannelStats, ChannelStatus, RowChange, SubscriptionManager,
};
pub use timer::ScheduledTask;
pub use version::{BUILD_TIME, SDK_VERSION};
