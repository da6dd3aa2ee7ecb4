//! 同步数据模型
//!
//! - `Entity`：角色卡，本地唯一可信源，由所有者单写
//! - `RevisionMarker`：每次可观察修改都会前进的修订标记（时间戳字符串）
//! - `Attachment`：不在角色记录内、但与其一起同步的侧数据（法术位、资源、背包、笔记…）
//! - `PublishableView`：隐私过滤后的可发布视图，只能由 `PrivacyFilter` 构造
//! - `CharacterRow`：后端 `characters` 表的一行

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 修订标记
///
/// 约定：实体每次可观察修改都必须刷新标记，且只有修改才刷新。
/// 指纹守卫完全信任这一约定，不比较实体内容。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionMarker(String);

impl RevisionMarker {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// 当前时刻（RFC3339，微秒精度，UTC）
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// 生成严格晚于 `previous` 的新标记
    ///
    /// 同一微秒内的两次修改也会得到不同标记；`previous` 无法解析时直接取当前时刻。
    pub fn next_after(previous: Option<&RevisionMarker>) -> Self {
        let now = Utc::now();
        let floor = previous
            .and_then(|p| DateTime::parse_from_rfc3339(p.as_str()).ok())
            .map(|p| p.with_timezone(&Utc) + Duration::microseconds(1));
        match floor {
            Some(floor) if floor > now => Self::from_datetime(floor),
            _ => Self::from_datetime(now),
        }
    }

    fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 侧数据可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// 随角色一起发布给主持人
    Shared,
    /// 仅所有者可见（例如个人笔记），永不离开设备
    OwnerPrivate,
}

/// 与角色记录一起同步的侧数据切片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub key: String,
    pub visibility: Visibility,
    pub data: Value,
}

impl Attachment {
    pub fn shared(key: impl Into<String>, data: Value) -> Self {
        Self { key: key.into(), visibility: Visibility::Shared, data }
    }

    pub fn private(key: impl Into<String>, data: Value) -> Self {
        Self { key: key.into(), visibility: Visibility::OwnerPrivate, data }
    }

    /// 合并进可发布视图时使用的字段名
    pub fn payload_key(&self) -> String {
        attachment_payload_key(&self.key)
    }
}

pub(crate) fn attachment_payload_key(key: &str) -> String {
    format!("_{}", key)
}

/// 可同步的角色实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub owner_id: String,
    pub revision: RevisionMarker,
    pub payload: Value,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Entity {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            revision: RevisionMarker::now(),
            payload,
            attachments: Vec::new(),
        }
    }

    pub fn with_revision(mut self, revision: RevisionMarker) -> Self {
        self.revision = revision;
        self
    }

    /// 添加或替换同名侧数据
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.set_attachment(attachment);
        self
    }

    pub fn set_attachment(&mut self, attachment: Attachment) {
        match self.attachments.iter_mut().find(|a| a.key == attachment.key) {
            Some(existing) => *existing = attachment,
            None => self.attachments.push(attachment),
        }
    }

    pub fn attachment(&self, key: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.key == key)
    }
}

/// 隐私过滤后的可发布视图
///
/// 不持久化，每次推送都从当前实体重新计算。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PublishableView {
    payload: Value,
}

impl PublishableView {
    pub(crate) fn new(payload: Value) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// 后端 `characters` 表的行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRow {
    pub id: String,
    pub owner_id: String,
    #[serde(default)]
    pub data: Value,
    /// 可分享的短角色码（由后端生成）
    #[serde(default)]
    pub share_code: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}
