//! 指纹守卫：判断实体快照是否需要同步

use crate::entity::{Entity, RevisionMarker};

/// 实体的修订标记与上次成功推送的标记不同时才需要推送
///
/// 首次观察（尚无推送记录）总是返回 true。不比较实体内容：
/// 若上游违反"每次修改都刷新标记"的约定，推送会被静默跳过。
pub fn should_push(entity: &Entity, last_pushed: Option<&RevisionMarker>) -> bool {
    match last_pushed {
        Some(marker) => entity.revision != *marker,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity_at(marker: &str) -> Entity {
        Entity::new("c1", "u1", json!({})).with_revision(RevisionMarker::new(marker))
    }

    #[test]
    fn test_first_observation_pushes() {
        assert!(should_push(&entity_at("t0"), None));
    }

    #[test]
    fn test_unchanged_marker_skips() {
        let pushed = RevisionMarker::new("t0");
        assert!(!should_push(&entity_at("t0"), Some(&pushed)));
    }

    #[test]
    fn test_changed_marker_pushes() {
        let pushed = RevisionMarker::new("t0");
        assert!(should_push(&entity_at("t1"), Some(&pushed)));
    }

    #[test]
    fn test_body_is_not_compared() {
        let pushed = RevisionMarker::new("t0");
        let mut entity = entity_at("t0");
        entity.payload = json!({"hp": {"current": 1}});
        assert!(!should_push(&entity, Some(&pushed)));
    }
}
