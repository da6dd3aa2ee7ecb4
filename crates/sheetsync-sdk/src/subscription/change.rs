//! 入站行变更
//!
//! 实时后端推来的原始 JSON 在这里校验成 `RowChange`，之后才交给应用代码。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel_name::is_valid_identifier;
use crate::entity::CharacterRow;
use crate::error::{Result, SyncError};

/// 行变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// 已校验的行变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    pub kind: ChangeKind,
    /// 变更所属实体
    pub entity_id: String,
    /// 新行；删除时为 None
    pub row: Option<CharacterRow>,
    pub commit_timestamp: Option<String>,
}

impl RowChange {
    /// 从线上格式解析
    ///
    /// 接受 `type`/`eventType`、`record`/`new`、`old_record`/`old` 两种写法。
    pub fn from_wire(wire: &Value) -> Result<Self> {
        let object = wire
            .as_object()
            .ok_or_else(|| SyncError::InvalidPayload("行变更不是 JSON 对象".to_string()))?;

        let kind = object
            .get("type")
            .or_else(|| object.get("eventType"))
            .and_then(Value::as_str)
            .and_then(ChangeKind::parse)
            .ok_or_else(|| SyncError::InvalidPayload("缺少或无法识别的变更类型".to_string()))?;

        let commit_timestamp = object
            .get("commit_timestamp")
            .and_then(Value::as_str)
            .map(String::from);

        let change = match kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let record = object
                    .get("record")
                    .or_else(|| object.get("new"))
                    .cloned()
                    .ok_or_else(|| SyncError::InvalidPayload("缺少 record".to_string()))?;
                let row: CharacterRow = serde_json::from_value(record)
                    .map_err(|e| SyncError::InvalidPayload(format!("record 格式错误: {}", e)))?;
                RowChange {
                    kind,
                    entity_id: row.id.clone(),
                    row: Some(row),
                    commit_timestamp,
                }
            }
            ChangeKind::Delete => {
                let id = object
                    .get("old_record")
                    .or_else(|| object.get("old"))
                    .and_then(|old| old.get("id"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| SyncError::InvalidPayload("删除事件缺少 old_record.id".to_string()))?;
                RowChange {
                    kind,
                    entity_id: id.to_string(),
                    row: None,
                    commit_timestamp,
                }
            }
        };

        if !is_valid_identifier(&change.entity_id) {
            return Err(SyncError::InvalidIdentifier(change.entity_id));
        }
        Ok(change)
    }
}
