//! 主持人面板演示
//!
//! 使用进程内后端：两个玩家修改角色，主持人实时看到过滤后的摘要。

use serde_json::json;
use sheetsync_sdk::{
    Attachment, Entity, LiveRoster, MemoryBackend, MemoryEntityStore, SheetSyncClient, SyncConfig,
    SyncEvent,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("========================================");
    println!("主持人面板实时同步演示");
    println!("========================================\n");

    let backend = Arc::new(MemoryBackend::new());
    let config = SyncConfig::builder().quiet_window_ms(500).build();

    let player = SheetSyncClient::new(config.clone(), backend.clone(), backend.clone())?;
    let master = SheetSyncClient::new(config, backend.clone(), backend.clone())?;

    player.events().add_listener("push_succeeded", |event| {
        if let SyncEvent::PushSucceeded { entity_id, share_code, .. } = event {
            println!("📤 {} 已推送 (角色码: {})", entity_id, share_code.as_deref().unwrap_or("-"));
        }
    });

    // === 1. 主持人订阅 ===
    let roster = Arc::new(LiveRoster::new());
    let channel = master.observe_roster(&roster).await;
    let status = channel.watch(["aria", "borin"], true).await;
    println!("🔌 订阅已发起，当前状态: {:?}", status);
    sleep(Duration::from_millis(50)).await;
    println!("✅ 频道状态: {:?}\n", channel.status());

    // === 2. 玩家修改角色 ===
    let store = Arc::new(MemoryEntityStore::new());
    let _session = player.attach_store(store.clone());

    store.insert(
        Entity::new(
            "aria",
            "player-1",
            json!({
                "name": "Aria",
                "class": "Bard",
                "level": 3,
                "hp": {"current": 21, "max": 21, "temp": 0},
                "notes": "秘密：欠了旅店老板钱",
            }),
        )
        .with_attachment(Attachment::shared("inventory", json!(["鲁特琴", "绳子"])))
        .with_attachment(Attachment::private("journal", json!("第一天"))),
    );
    store.insert(Entity::new(
        "borin",
        "player-2",
        json!({"name": "Borin", "class": "Fighter", "level": 4, "hp": {"current": 38, "max": 38}}),
    ));

    for damage in [3, 5, 4] {
        sleep(Duration::from_millis(100)).await;
        store.update("aria", |data| {
            let current = data["hp"]["current"].as_i64().unwrap_or(0);
            data["hp"]["current"] = json!(current - damage);
        })?;
    }
    store.update("borin", |data| {
        data["conditions"] = json!([{"condition": "poisoned"}]);
    })?;

    sleep(Duration::from_millis(800)).await;

    // === 3. 主持人面板 ===
    println!("\n📋 主持人面板:");
    for summary in roster.summaries() {
        println!(
            "  {} [{} Lv{}] HP {}/{} ({:.0}%) 状态: {:?}",
            summary.name.as_deref().unwrap_or("无角色"),
            summary.class.as_deref().unwrap_or("-"),
            summary.level,
            summary.hp_current,
            summary.hp_max,
            summary.hp_percent(),
            summary.conditions,
        );
    }
    if let Some(row) = roster.get("aria") {
        println!("\n🔐 私有字段是否泄露: notes={}, _journal={}", row.data.get("notes").is_some(), row.data.get("_journal").is_some());
    }
    println!("\n{}", channel.stats().summary(channel.phase()));

    player.shutdown().await;
    master.shutdown().await;
    println!("\n✅ 演示结束");
    Ok(())
}
