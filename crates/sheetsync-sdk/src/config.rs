//! SDK 配置
//!
//! 所有结构都支持 serde，缺省字段取默认值，可直接从 JSON 加载：
//!
//! ```rust
//! use sheetsync_sdk::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .rest_url("https://project.example.com")
//!     .api_key("anon-key")
//!     .quiet_window_ms(2_000)
//!     .build();
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channel_name::DEFAULT_CHANNEL_NAMESPACE;
use crate::error::{Result, SyncError};
use crate::privacy::PrivacyPolicy;
use crate::retry_policy::RetryPolicy;

/// 防抖静默窗口默认值（毫秒）
pub const DEFAULT_QUIET_WINDOW_MS: u64 = 2_000;

/// 推送调度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 最后一次修改之后等待多久再推送（毫秒）
    pub quiet_window_ms: u64,
    /// 失败重试策略
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quiet_window_ms: DEFAULT_QUIET_WINDOW_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms)
    }
}

/// 后端连接配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// REST 基础地址，例如 https://project.example.com
    pub rest_url: Option<String>,
    /// 实时频道地址；不提供时由 rest_url 推导（http→ws, https→wss）
    pub realtime_url: Option<String>,
    /// 项目公开 API key
    pub api_key: String,
    /// 用户会话令牌（续期由外部负责）
    pub access_token: Option<String>,
    pub schema: String,
    pub table: String,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 实时频道心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            rest_url: None,
            realtime_url: None,
            api_key: String::new(),
            access_token: None,
            schema: "public".to_string(),
            table: "characters".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            heartbeat_interval_secs: 30,
        }
    }
}

impl BackendConfig {
    /// 实时频道地址（显式配置优先）
    pub fn resolved_realtime_url(&self) -> Option<String> {
        if let Some(url) = &self.realtime_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        let rest = self.rest_url.as_deref()?.trim_end_matches('/');
        if let Some(rest) = rest.strip_prefix("https://") {
            Some(format!("wss://{}", rest))
        } else {
            rest.strip_prefix("http://").map(|rest| format!("ws://{}", rest))
        }
    }
}

/// SDK 总配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub scheduler: SchedulerConfig,
    pub privacy: PrivacyPolicy,
    pub backend: BackendConfig,
    /// 频道名前缀
    pub channel_namespace: String,
    /// 事件缓冲区大小
    pub event_buffer_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            privacy: PrivacyPolicy::default(),
            backend: BackendConfig::default(),
            channel_namespace: DEFAULT_CHANNEL_NAMESPACE.to_string(),
            event_buffer_size: 256,
        }
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// 从 JSON 字符串加载（缺省字段取默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.quiet_window_ms == 0 {
            return Err(SyncError::Config("quiet_window_ms 必须大于 0".to_string()));
        }
        if self.backend.table.trim().is_empty() {
            return Err(SyncError::Config("backend.table 不能为空".to_string()));
        }
        if self.backend.schema.trim().is_empty() {
            return Err(SyncError::Config("backend.schema 不能为空".to_string()));
        }
        if self.channel_namespace.trim().is_empty() {
            return Err(SyncError::Config("channel_namespace 不能为空".to_string()));
        }
        if let Some(url) = &self.backend.rest_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SyncError::Config(format!("rest_url 必须是 http(s) 地址: {}", url)));
            }
        }
        if let Some(url) = &self.backend.realtime_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(SyncError::Config(format!("realtime_url 必须是 ws(s) 地址: {}", url)));
            }
        }
        Ok(())
    }
}

/// 配置构建器
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self { config: SyncConfig::default() }
    }

    pub fn quiet_window_ms(mut self, ms: u64) -> Self {
        self.config.scheduler.quiet_window_ms = ms;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.scheduler.retry = policy;
        self
    }

    pub fn privacy_policy(mut self, policy: PrivacyPolicy) -> Self {
        self.config.privacy = policy;
        self
    }

    pub fn rest_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend.rest_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn realtime_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.backend.realtime_url = Some(url.into());
        self
    }

    pub fn api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.backend.api_key = key.into();
        self
    }

    pub fn access_token<S: Into<String>>(mut self, token: S) -> Self {
        self.config.backend.access_token = Some(token.into());
        self
    }

    pub fn table<S: Into<String>>(mut self, table: S) -> Self {
        self.config.backend.table = table.into();
        self
    }

    pub fn channel_namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.config.channel_namespace = namespace.into();
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.scheduler.quiet_window(), Duration::from_millis(2_000));
        assert_eq!(config.backend.table, "characters");
        assert_eq!(config.channel_namespace, "rt-chars");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = SyncConfig::from_json_str(
            r#"{"scheduler": {"quiet_window_ms": 500}, "backend": {"rest_url": "https://db.example.com"}}"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.quiet_window_ms, 500);
        assert_eq!(config.scheduler.retry, RetryPolicy::default());
        assert_eq!(
            config.backend.resolved_realtime_url().as_deref(),
            Some("wss://db.example.com")
        );
    }

    #[test]
    fn test_validation_errors() {
        assert!(SyncConfig::builder().quiet_window_ms(0).build().validate().is_err());
        assert!(SyncConfig::builder().table(" ").build().validate().is_err());
        assert!(SyncConfig::builder().rest_url("ftp://x").build().validate().is_err());
        assert!(SyncConfig::builder().realtime_url("https://x").build().validate().is_err());
    }
}
