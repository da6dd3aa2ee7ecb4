//! 主持人面板的实时角色缓存
//!
//! 初始加载的行通过 `seed` 放入，但不会覆盖已经收到的实时行；
//! 之后的插入/更新直接覆盖，删除移除。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::entity::CharacterRow;
use crate::subscription::{ChangeKind, RowChange};

/// 角色卡片摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSummary {
    pub id: String,
    pub name: Option<String>,
    pub class: Option<String>,
    pub level: u32,
    pub hp_current: i64,
    pub hp_max: i64,
    pub hp_temp: i64,
    pub conditions: Vec<String>,
    pub share_code: Option<String>,
    pub updated_at: Option<String>,
}

impl CharacterSummary {
    pub fn from_row(row: &CharacterRow) -> Self {
        let data = &row.data;
        let int = |pointer: &str| data.pointer(pointer).and_then(Value::as_i64).unwrap_or(0);
        let text = |key: &str| data.get(key).and_then(Value::as_str).map(String::from);

        let conditions = data
            .get("conditions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(name) => Some(name.clone()),
                        other => other.get("condition").and_then(Value::as_str).map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: row.id.clone(),
            name: text("name"),
            class: text("class"),
            level: int("/level").clamp(0, u32::MAX as i64) as u32,
            hp_current: int("/hp/current"),
            hp_max: int("/hp/max"),
            hp_temp: int("/hp/temp"),
            conditions,
            share_code: row.share_code.clone(),
            updated_at: row.updated_at.clone(),
        }
    }

    /// 当前生命值百分比（0-100），最大值未知时为 0
    pub fn hp_percent(&self) -> f64 {
        if self.hp_max <= 0 {
            return 0.0;
        }
        (self.hp_current as f64 / self.hp_max as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// 实时角色缓存
#[derive(Default)]
pub struct LiveRoster {
    rows: RwLock<HashMap<String, CharacterRow>>,
}

impl LiveRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入初始加载的行；已有实时行的角色保持不变
    pub fn seed<I>(&self, rows: I) -> usize
    where
        I: IntoIterator<Item = CharacterRow>,
    {
        let mut cache = self.rows.write();
        let mut added = 0;
        for row in rows {
            if !cache.contains_key(&row.id) {
                cache.insert(row.id.clone(), row);
                added += 1;
            }
        }
        added
    }

    /// 应用一条行变更
    pub fn apply(&self, change: RowChange) {
        let mut cache = self.rows.write();
        match (change.kind, change.row) {
            (ChangeKind::Delete, _) => {
                cache.remove(&change.entity_id);
            }
            (_, Some(row)) => {
                cache.insert(row.id.clone(), row);
            }
            (kind, None) => debug!("忽略缺少行数据的 {:?} 变更: {}", kind, change.entity_id),
        }
    }

    /// 生成可直接交给订阅管理器的处理器
    pub fn handler(self: &Arc<Self>) -> impl Fn(RowChange) + Send + Sync + 'static {
        let roster = self.clone();
        move |change| roster.apply(change)
    }

    pub fn get(&self, id: &str) -> Option<CharacterRow> {
        self.rows.read().get(id).cloned()
    }

    pub fn summary(&self, id: &str) -> Option<CharacterSummary> {
        self.rows.read().get(id).map(CharacterSummary::from_row)
    }

    /// 所有角色摘要，按 ID 排序
    pub fn summaries(&self) -> Vec<CharacterSummary> {
        let mut summaries: Vec<CharacterSummary> =
            self.rows.read().values().map(CharacterSummary::from_row).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}
