use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SyncError;

/// 推送失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PushFailureReason {
    /// 网络超时 - 可重试
    NetworkTimeout,
    /// 网络不可用 - 等待恢复后重试
    NetworkUnavailable,
    /// 服务端错误 - 5xx 可重试
    ServerError(u16),
    /// 认证失败 - 会话续期由外部负责，续期后可重试
    AuthFailure,
    /// 后端拒绝（4xx）- 不重试
    Rejected(u16),
    /// 数据无效 - 不重试
    InvalidPayload,
    /// 上下文已销毁 - 不重试
    Disposed,
    /// 未知错误
    Unknown(String),
}

impl PushFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            PushFailureReason::NetworkTimeout => true,
            PushFailureReason::NetworkUnavailable => true,
            PushFailureReason::ServerError(code) => (500..600).contains(code),
            PushFailureReason::AuthFailure => true,
            PushFailureReason::Rejected(_) => false,
            PushFailureReason::InvalidPayload => false,
            PushFailureReason::Disposed => false,
            PushFailureReason::Unknown(_) => true, // 保守策略：未知错误可重试
        }
    }

    /// 获取重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            PushFailureReason::NetworkUnavailable => 2.0,
            PushFailureReason::ServerError(_) => 1.5,
            PushFailureReason::AuthFailure => 3.0, // 给外部续期会话留出时间
            _ => 1.0,
        }
    }
}

impl From<&SyncError> for PushFailureReason {
    fn from(error: &SyncError) -> Self {
        match error {
            SyncError::Timeout(_) => PushFailureReason::NetworkTimeout,
            SyncError::Transport(_) => PushFailureReason::NetworkUnavailable,
            SyncError::Unauthorized(_) => PushFailureReason::AuthFailure,
            SyncError::Server { status, .. } => PushFailureReason::ServerError(*status),
            SyncError::Rejected { status, .. } => PushFailureReason::Rejected(*status),
            SyncError::InvalidPayload(_) | SyncError::Json(_) => PushFailureReason::InvalidPayload,
            SyncError::Disposed => PushFailureReason::Disposed,
            other => PushFailureReason::Unknown(other.to_string()),
        }
    }
}

/// 推送重试策略
///
/// `max_retries = 0` 时不自动重试，失败的推送只会在下一次修改时重新尝试。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 不自动重试
    pub fn disabled() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// 检查是否应该重试
    pub fn should_retry(&self, retry_count: u32, reason: &PushFailureReason) -> bool {
        retry_count < self.max_retries && reason.is_retryable()
    }

    /// 计算第 `retry_count` 次重试前的等待时间，不应重试时返回 None
    pub fn next_delay(&self, retry_count: u32, reason: &PushFailureReason) -> Option<Duration> {
        if !self.should_retry(retry_count, reason) {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ retry_count)
        let base = self.base_delay_ms as f64 * self.backoff_factor.powf(retry_count as f64);
        let capped = (base * reason.delay_multiplier()).min(self.max_delay_ms as f64);

        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * (rand::random::<f64>() - 0.5)
        } else {
            0.0
        };
        let final_ms = (capped + jitter).max(0.0);

        Some(Duration::from_millis(final_ms as u64))
    }
}
