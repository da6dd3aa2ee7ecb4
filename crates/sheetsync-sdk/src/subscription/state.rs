//! 频道状态与统计

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 频道内部阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelPhase {
    /// 无频道
    Idle,
    /// 已发起订阅，等待后端确认
    Connecting,
    /// 后端已确认
    Connected,
    /// 频道级失败
    Error,
}

impl std::fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelPhase::Idle => write!(f, "空闲"),
            ChannelPhase::Connecting => write!(f, "连接中"),
            ChannelPhase::Connected => write!(f, "已连接"),
            ChannelPhase::Error => write!(f, "错误"),
        }
    }
}

/// 对界面暴露的连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Idle,
    Connected,
    Error,
}

impl From<ChannelPhase> for ChannelStatus {
    fn from(phase: ChannelPhase) -> Self {
        match phase {
            ChannelPhase::Idle | ChannelPhase::Connecting => ChannelStatus::Idle,
            ChannelPhase::Connected => ChannelStatus::Connected,
            ChannelPhase::Error => ChannelStatus::Error,
        }
    }
}

/// 当前频道的统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// 当前频道名
    pub channel: Option<String>,
    /// 当前作用域内的实体数
    pub scope_size: usize,
    /// 已分发给处理器的事件数
    pub events_delivered: u64,
    /// 边界校验中丢弃的事件数
    pub events_dropped: u64,
    /// 累计打开过的频道数
    pub channels_opened: u64,
    /// 连接建立时间（UTC毫秒时间戳）
    pub connected_at: Option<i64>,
    /// 最后一次收到事件的时间（UTC毫秒时间戳）
    pub last_event_at: Option<i64>,
    /// 最近一次频道错误
    pub last_error: Option<String>,
}

impl ChannelStats {
    pub(crate) fn mark_connected(&mut self) {
        self.connected_at = Some(Utc::now().timestamp_millis());
        self.last_error = None;
    }

    pub(crate) fn mark_event(&mut self, delivered: bool) {
        if delivered {
            self.events_delivered += 1;
        } else {
            self.events_dropped += 1;
        }
        self.last_event_at = Some(Utc::now().timestamp_millis());
    }

    /// 连接持续时间（秒）
    pub fn connection_duration_secs(&self) -> Option<i64> {
        self.connected_at
            .map(|connected_at| (Utc::now().timestamp_millis() - connected_at) / 1000)
    }

    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self, phase: ChannelPhase) -> String {
        let duration = match self.connection_duration_secs() {
            Some(secs) if secs >= 60 => format!("{}分{}秒", secs / 60, secs % 60),
            Some(secs) => format!("{}秒", secs),
            None => "未连接".to_string(),
        };
        format!(
            "【频道状态】 频道: {} | 状态: {} | 实体数: {} | 已分发: {} | 已丢弃: {} | 已连接: {}",
            self.channel.as_deref().unwrap_or("-"),
            phase,
            self.scope_size,
            self.events_delivered,
            self.events_dropped,
            duration,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connecting_maps_to_idle() {
        assert_eq!(ChannelStatus::from(ChannelPhase::Connecting), ChannelStatus::Idle);
        assert_eq!(ChannelStatus::from(ChannelPhase::Connected), ChannelStatus::Connected);
        assert_eq!(ChannelStatus::from(ChannelPhase::Error), ChannelStatus::Error);
        assert_eq!(serde_json::to_string(&ChannelStatus::Connected).unwrap(), "\"connected\"");
    }

    #[test]
    fn test_stats_summary() {
        let mut stats = ChannelStats {
            channel: Some("rt-chars-1".to_string()),
            scope_size: 2,
            ..ChannelStats::default()
        };
        stats.mark_event(true);
        stats.mark_event(false);
        let summary = stats.summary(ChannelPhase::Connecting);
        assert!(summary.contains("rt-chars-1"));
        assert!(summary.contains("已分发: 1"));
        assert!(summary.contains("未连接"));
    }
}
