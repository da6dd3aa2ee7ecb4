//! 本地实体存储边界
//!
//! 同步引擎只读取实体并订阅其变更通知；实体的持久化不在这里。
//! `MemoryEntityStore` 是进程内实现：每次修改都会推进修订标记，然后通知监听器。

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::entity::{Attachment, Entity, RevisionMarker};
use crate::error::{Result, SyncError};

/// 监听器 ID
pub type ListenerId = u64;

/// 实体变更监听器
pub type EntityListener = Arc<dyn Fn(&Entity) + Send + Sync>;

/// 本地实体存储
pub trait EntityStore: Send + Sync {
    /// 当前完整状态
    fn entity(&self, id: &str) -> Option<Entity>;

    /// 存储中的所有实体
    fn entities(&self) -> Vec<Entity>;

    /// 注册变更监听器
    fn add_listener(&self, listener: EntityListener) -> ListenerId;

    /// 注销监听器；返回是否确实移除了
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// 进程内实体存储
#[derive(Default)]
pub struct MemoryEntityStore {
    entities: RwLock<HashMap<String, Entity>>,
    listeners: RwLock<Vec<(ListenerId, EntityListener)>>,
    next_listener_id: AtomicU64,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入实体（原样保存，不改动修订标记）并通知
    pub fn insert(&self, entity: Entity) {
        self.entities.write().insert(entity.id.clone(), entity.clone());
        self.notify(&entity);
    }

    /// 修改实体负载；修订标记自动前进
    pub fn update<F>(&self, id: &str, mutate: F) -> Result<Entity>
    where
        F: FnOnce(&mut Value),
    {
        self.modify(id, |entity| mutate(&mut entity.payload))
    }

    /// 添加或替换侧数据；修订标记自动前进
    pub fn set_attachment(&self, id: &str, attachment: Attachment) -> Result<Entity> {
        self.modify(id, |entity| entity.set_attachment(attachment))
    }

    /// 移除实体（不通知）
    pub fn remove(&self, id: &str) -> Option<Entity> {
        self.entities.write().remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn modify<F>(&self, id: &str, change: F) -> Result<Entity>
    where
        F: FnOnce(&mut Entity),
    {
        let updated = {
            let mut entities = self.entities.write();
            let entity = entities
                .get_mut(id)
                .ok_or_else(|| SyncError::InvalidIdentifier(format!("实体不存在: {}", id)))?;
            change(entity);
            entity.revision = RevisionMarker::next_after(Some(&entity.revision));
            entity.clone()
        };
        debug!("实体 {} 已修改，修订 {}", updated.id, updated.revision);
        self.notify(&updated);
        Ok(updated)
    }

    fn notify(&self, entity: &Entity) {
        let listeners: Vec<EntityListener> =
            self.listeners.read().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(entity);
        }
    }
}

impl EntityStore for MemoryEntityStore {
    fn entity(&self, id: &str) -> Option<Entity> {
        self.entities.read().get(id).cloned()
    }

    fn entities(&self) -> Vec<Entity> {
        self.entities.read().values().cloned().collect()
    }

    fn add_listener(&self, listener: EntityListener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_advances_revision_and_notifies() {
        let store = MemoryEntityStore::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.add_listener(Arc::new(move |entity: &Entity| {
            sink.lock().push(entity.revision.clone());
        }));

        store.insert(Entity::new("c1", "u1", json!({"hp": 10})));
        let first = store.entity("c1").unwrap().revision;
        let updated = store
            .update("c1", |payload| payload["hp"] = json!(7))
            .unwrap();
        let again = store
            .set_attachment("c1", Attachment::shared("inventory", json!([])))
            .unwrap();

        assert!(updated.revision > first);
        assert!(again.revision > updated.revision);
        assert_eq!(updated.payload["hp"], 7);
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_remove_listener() {
        let store = MemoryEntityStore::new();
        let id = store.add_listener(Arc::new(|_: &Entity| {}));
        assert_eq!(store.listener_count(), 1);
        assert!(store.remove_listener(id));
        assert!(!store.remove_listener(id));
        assert!(store.update("missing", |_| {}).is_err());
    }
}
