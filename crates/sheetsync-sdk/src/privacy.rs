//! 隐私过滤：从完整本地状态派生可发布视图
//!
//! 过滤的完整性是与数据模型之间的约定，不只是单个对象上的字段掩码：
//! - 记录本身中的私有字段（JSON Pointer 或任意深度的键名）
//! - 记录之外的侧数据（`Attachment`）中被标记为仅所有者可见的部分

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::{attachment_payload_key, Entity, PublishableView, Visibility};

/// 隐私策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyPolicy {
    /// 按 JSON Pointer 移除的字段，例如 `/backstory/secret`
    #[serde(default)]
    pub private_pointers: Vec<String>,
    /// 在任意深度移除的键名
    #[serde(default)]
    pub private_keys: Vec<String>,
    /// 无论标记为何种可见性都视为私有的侧数据
    #[serde(default)]
    pub private_attachments: Vec<String>,
}

impl Default for PrivacyPolicy {
    fn default() -> Self {
        Self {
            private_pointers: Vec::new(),
            private_keys: vec!["notes".to_string(), "personalNotes".to_string()],
            private_attachments: vec!["notes".to_string()],
        }
    }
}

impl PrivacyPolicy {
    /// 不做任何额外屏蔽（仍然尊重 `Visibility::OwnerPrivate`）
    pub fn permissive() -> Self {
        Self {
            private_pointers: Vec::new(),
            private_keys: Vec::new(),
            private_attachments: Vec::new(),
        }
    }

    pub fn with_private_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.private_pointers.push(pointer.into());
        self
    }

    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_keys.push(key.into());
        self
    }

    pub fn with_private_attachment(mut self, key: impl Into<String>) -> Self {
        self.private_attachments.push(key.into());
        self
    }
}

/// 隐私过滤器（纯函数，总是成功）
#[derive(Debug, Clone, Default)]
pub struct PrivacyFilter {
    policy: PrivacyPolicy,
}

impl PrivacyFilter {
    pub fn new(policy: PrivacyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PrivacyPolicy {
        &self.policy
    }

    /// 生成可发布视图
    ///
    /// 先移除私有侧数据在记录中的副本，再合并共享侧数据，
    /// 最后对合并后的整体应用 JSON Pointer 与键名屏蔽。
    pub fn to_publishable(&self, entity: &Entity) -> PublishableView {
        let mut payload = entity.payload.clone();

        match payload {
            Value::Object(ref mut map) => {
                // 之前打包同步留下的 `_<key>` 副本，不论实体是否还带着该侧数据
                for key in &self.policy.private_attachments {
                    map.remove(&attachment_payload_key(key));
                }
                for attachment in &entity.attachments {
                    let key = attachment_payload_key(&attachment.key);
                    if self.is_private_attachment(&attachment.key, attachment.visibility) {
                        map.remove(&key);
                        continue;
                    }
                    map.insert(key, attachment.data.clone());
                }
            }
            _ => {
                if !entity.attachments.is_empty() {
                    debug!(
                        "实体 {} 的记录不是对象，跳过 {} 个侧数据",
                        entity.id,
                        entity.attachments.len()
                    );
                }
            }
        }

        for pointer in &self.policy.private_pointers {
            remove_pointer(&mut payload, pointer);
        }
        if !self.policy.private_keys.is_empty() {
            strip_keys(&mut payload, &self.policy.private_keys);
        }

        PublishableView::new(payload)
    }

    fn is_private_attachment(&self, key: &str, visibility: Visibility) -> bool {
        visibility == Visibility::OwnerPrivate
            || self.policy.private_attachments.iter().any(|k| k == key)
    }
}

/// 按 RFC 6901 JSON Pointer 删除字段，不存在时忽略
fn remove_pointer(value: &mut Value, pointer: &str) {
    if pointer.is_empty() || !pointer.starts_with('/') {
        return;
    }
    let (parent, last) = match pointer.rfind('/') {
        Some(idx) => (&pointer[..idx], &pointer[idx + 1..]),
        None => return,
    };
    let token = last.replace("~1", "/").replace("~0", "~");
    match value.pointer_mut(parent) {
        Some(Value::Object(map)) => {
            map.remove(&token);
        }
        Some(Value::Array(items)) => {
            if let Ok(index) = token.parse::<usize>() {
                if index < items.len() {
                    items.remove(index);
                }
            }
        }
        _ => {}
    }
}

/// 递归删除任意深度的指定键
fn strip_keys(value: &mut Value, keys: &[String]) {
    match value {
        Value::Object(map) => {
            retain_public(map, keys);
            for child in map.values_mut() {
                strip_keys(child, keys);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                strip_keys(child, keys);
            }
        }
        _ => {}
    }
}

fn retain_public(map: &mut Map<String, Value>, keys: &[String]) {
    map.retain(|k, _| !keys.iter().any(|private| private == k));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Attachment;
    use serde_json::json;

    fn crafted_entity() -> Entity {
        Entity::new(
            "c1",
            "u1",
            json!({
                "name": "Aria",
                "hp": {"current": 7, "max": 12},
                "personalNotes": "the DM is plotting something",
                "backstory": {"public": "farmhand", "secret": "heir to the throne"},
                "traits": [{"id": "t1", "notes": "only I know"}],
                "_notes": [{"title": "stale copy"}]
            }),
        )
        .with_attachment(Attachment::shared("inventory", json!({"gold": 12, "notes": "hidden stash"})))
        .with_attachment(Attachment::shared("magicState", json!({"slots": [2, 1]})))
        .with_attachment(Attachment::private("journal", json!([{"title": "session 3"}])))
        .with_attachment(Attachment::shared("notes", json!([{"title": "npc names"}])))
    }

    #[test]
    fn test_private_data_never_published() {
        let filter = PrivacyFilter::new(PrivacyPolicy::default().with_private_pointer("/backstory/secret"));
        let view = filter.to_publishable(&crafted_entity());
        let text = serde_json::to_string(view.payload()).unwrap();

        assert!(!text.contains("the DM is plotting"));
        assert!(!text.contains("heir to the throne"));
        assert!(!text.contains("only I know"));
        assert!(!text.contains("hidden stash"));
        assert!(!text.contains("session 3"));
        assert!(!text.contains("npc names"));
        assert!(!text.contains("stale copy"));
        assert!(view.payload().get("_journal").is_none());
        assert!(view.payload().get("_notes").is_none());
    }

    #[test]
    fn test_stale_private_copy_without_attachment_is_removed() {
        // 从早期打包同步加载的记录：带着 `_notes` 但实体上没有 notes 侧数据
        let entity = Entity::new(
            "c1",
            "u1",
            json!({"name": "Aria", "_notes": [{"title": "secret"}]}),
        );
        let view = PrivacyFilter::default().to_publishable(&entity);
        assert_eq!(view.payload(), &json!({"name": "Aria"}));

        let policy = PrivacyPolicy::permissive().with_private_attachment("magicState");
        let entity = Entity::new(
            "c1",
            "u1",
            json!({"name": "Aria", "_magicState": {"slots": [1]}, "_inventory": ["rope"]}),
        );
        let view = PrivacyFilter::new(policy).to_publishable(&entity);
        assert!(view.payload().get("_magicState").is_none());
        assert_eq!(view.payload()["_inventory"], json!(["rope"]));
    }

    #[test]
    fn test_stale_copy_of_owner_private_attachment_is_removed() {
        let entity = Entity::new(
            "c1",
            "u1",
            json!({"name": "Aria", "_journal": [{"title": "old entry"}]}),
        )
        .with_attachment(Attachment::private("journal", json!([{"title": "new entry"}])));
        let view = PrivacyFilter::new(PrivacyPolicy::permissive()).to_publishable(&entity);
        let text = serde_json::to_string(view.payload()).unwrap();
        assert!(!text.contains("old entry"));
        assert!(!text.contains("new entry"));
    }

    #[test]
    fn test_pointer_into_shared_attachment() {
        let policy = PrivacyPolicy::permissive().with_private_pointer("/_inventory/stash");
        let entity = Entity::new("c1", "u1", json!({"name": "Aria"}))
            .with_attachment(Attachment::shared("inventory", json!({"gold": 1, "stash": "hidden"})));
        let view = PrivacyFilter::new(policy).to_publishable(&entity);
        assert_eq!(
            view.payload(),
            &json!({"name": "Aria", "_inventory": {"gold": 1}})
        );
    }

    #[test]
    fn test_shared_data_is_bundled() {
        let view = PrivacyFilter::default().to_publishable(&crafted_entity());
        let payload = view.payload();

        assert_eq!(payload["name"], "Aria");
        assert_eq!(payload["hp"]["max"], 12);
        assert_eq!(payload["_inventory"]["gold"], 12);
        assert_eq!(payload["_magicState"]["slots"], json!([2, 1]));
        assert_eq!(payload["backstory"]["public"], "farmhand");
    }

    #[test]
    fn test_owner_private_respected_by_permissive_policy() {
        let view = PrivacyFilter::new(PrivacyPolicy::permissive()).to_publishable(&crafted_entity());
        assert!(view.payload().get("_journal").is_none());
        assert!(view.payload().get("_notes").is_some());
    }

    #[test]
    fn test_missing_pointer_and_non_object_payload() {
        let filter = PrivacyFilter::new(PrivacyPolicy::default().with_private_pointer("/does/not/exist"));
        let entity = Entity::new("c1", "u1", json!(["notes", 1]))
            .with_attachment(Attachment::shared("inventory", json!({})));
        let view = filter.to_publishable(&entity);
        assert_eq!(view.payload(), &json!(["notes", 1]));
    }

    #[test]
    fn test_pointer_into_array() {
        let mut value = json!({"list": [1, 2, 3], "a/b": true});
        remove_pointer(&mut value, "/list/1");
        remove_pointer(&mut value, "/a~1b");
        assert_eq!(value, json!({"list": [1, 3]}));
    }
}
