use thiserror::Error;

/// SDK 统一错误类型
///
/// 同步入口（`PushScheduler::on_entity_changed`、`SubscriptionManager::watch`）从不向调用方抛错，
/// 这里的错误只在适配器、构造函数与内部流程之间传递。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 网络不可达、连接被重置等传输层错误
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// 会话无效或过期（401/403），会话续期由外部负责
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// 后端拒绝写入（4xx，不可重试）
    #[error("Rejected by backend [{status}]: {message}")]
    Rejected { status: u16, message: String },

    /// 后端内部错误（5xx，可重试）
    #[error("Server error [{status}]: {message}")]
    Server { status: u16, message: String },

    /// 频道级错误（订阅被拒绝、频道关闭）
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Config error: {0}")]
    Config(String),

    /// 所属上下文已销毁
    #[error("Sync context disposed")]
    Disposed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// 由 HTTP 状态码构造错误
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => SyncError::Unauthorized(message),
            408 => SyncError::Timeout(message),
            500..=599 => SyncError::Server { status, message },
            _ => SyncError::Rejected { status, message },
        }
    }

    /// 是否为认证类错误
    pub fn is_auth_error(&self) -> bool {
        matches!(self, SyncError::Unauthorized(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            SyncError::Timeout(error.to_string())
        } else if let Some(status) = error.status() {
            SyncError::from_status(status.as_u16(), error.to_string())
        } else if error.is_decode() {
            SyncError::InvalidPayload(error.to_string())
        } else {
            SyncError::Transport(error.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Channel(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
