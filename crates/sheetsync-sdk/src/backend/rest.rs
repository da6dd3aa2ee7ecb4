//! REST 推送适配器 - PostgREST 风格的 upsert
//!
//! `POST {rest_url}/rest/v1/{table}?on_conflict=id`，
//! `Prefer: resolution=merge-duplicates,return=representation`，以 id 为冲突键，最后写入者胜。

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use super::{AccessToken, PushTransport, UpsertReceipt};
use crate::channel_name::channel_filter;
use crate::config::BackendConfig;
use crate::entity::{CharacterRow, PublishableView};
use crate::error::{Result, SyncError};
use crate::version::client_info;

/// REST 后端
pub struct RestBackend {
    client: Client,
    config: BackendConfig,
    access_token: AccessToken,
}

impl RestBackend {
    /// 创建新的 REST 客户端
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Self::with_token(config, AccessToken::new(config.access_token.clone()))
    }

    /// 使用与实时后端共享的令牌创建
    pub fn with_token(config: &BackendConfig, access_token: AccessToken) -> Result<Self> {
        let rest_url = config
            .rest_url
            .as_deref()
            .ok_or_else(|| SyncError::Config("缺少 backend.rest_url".to_string()))?;
        Url::parse(rest_url).map_err(|e| SyncError::Config(format!("rest_url 无效: {}", e)))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(client_info())
            .build()
            .map_err(|e| SyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ REST 后端已创建 (rest_url: {})", rest_url);

        Ok(Self {
            client,
            access_token,
            config: config.clone(),
        })
    }

    /// 会话续期后由外部更新令牌
    pub fn set_access_token(&self, token: Option<String>) {
        self.access_token.set(token);
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    fn base_url(&self) -> &str {
        self.config.rest_url.as_deref().unwrap_or_default().trim_end_matches('/')
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url(), self.config.table)
    }

    pub(crate) fn upsert_url(&self) -> String {
        format!("{}?on_conflict=id", self.table_url())
    }

    fn bearer(&self) -> String {
        self.access_token.bearer(&self.config.api_key)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.bearer())
            .header("Content-Profile", &self.config.schema)
            .header("Accept-Profile", &self.config.schema)
    }
}

#[async_trait]
impl PushTransport for RestBackend {
    async fn upsert(
        &self,
        entity_id: &str,
        owner_id: &str,
        view: &PublishableView,
    ) -> Result<UpsertReceipt> {
        let body = json!([{
            "id": entity_id,
            "owner_id": owner_id,
            "data": view.payload(),
        }]);

        debug!("upsert {} -> {}", entity_id, self.upsert_url());
        let response = self
            .request(self.client.post(self.upsert_url()))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), body));
        }

        let rows: Vec<CharacterRow> = response.json().await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidPayload("upsert 未返回任何行".to_string()))?;

        Ok(UpsertReceipt {
            share_code: row.share_code,
            updated_at: row.updated_at,
        })
    }

    async fn fetch_rows(&self, ids: &[String]) -> Result<Vec<CharacterRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = channel_filter(ids);
        let in_clause = filter.strip_prefix("id=").unwrap_or(&filter).to_string();
        let response = self
            .request(self.client.get(self.table_url()))
            .query(&[("select", "*"), ("id", in_clause.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::from_status(status.as_u16(), body));
        }
        Ok(response.json::<Vec<CharacterRow>>().await?)
    }
}
