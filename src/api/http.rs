//! HTTP 实现：reqwest + Bearer 令牌
//!
//! 访问令牌每次请求时从持久化存储读取，登出后自然失效。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use super::{ApiError, NewItem, Organization, VaultApi, VaultItem};
use crate::storage::{KeyValueStore, ACCESS_TOKEN};

pub struct HttpVaultApi {
    client: Client,
    base_url: String,
    durable: Arc<dyn KeyValueStore>,
}

impl HttpVaultApi {
    /// 客户端构建失败时返回错误，不退回到无超时的默认客户端
    pub fn new(base_url: &str, timeout_secs: u64, durable: Arc<dyn KeyValueStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("passgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(format!("http client init failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            durable,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn authorize(&self, req: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self
            .durable
            .get(ACCESS_TOKEN)
            .await
            .map_err(|e| ApiError::Network(format!("token store unavailable: {}", e)))?
            .and_then(|v| v.as_str().map(str::to_string));
        match token {
            Some(token) => Ok(req.bearer_auth(token)),
            None => Err(ApiError::Unauthorized(401)),
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = self
            .authorize(req)
            .await?
            .send()
            .await
            // reqwest 的错误信息只含 URL，不含请求头
            .map_err(|e| ApiError::Network(e.without_url().to_string()))?;
        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.without_url().to_string()))
    }
}

#[async_trait]
impl VaultApi for HttpVaultApi {
    async fn list_organizations(&self) -> Result<Vec<Organization>, ApiError> {
        self.send(self.client.get(self.url("organizations"))).await
    }

    async fn list_items(&self, org_id: &str, domains: &[String]) -> Result<Vec<VaultItem>, ApiError> {
        let mut query: Vec<(&str, &str)> = vec![("organizationId", org_id)];
        query.extend(domains.iter().map(|d| ("domain", d.as_str())));
        self.send(self.client.get(self.url("items")).query(&query))
            .await
    }

    async fn get_item(&self, item_id: &str) -> Result<VaultItem, ApiError> {
        self.send(self.client.get(self.url(&format!("items/{}", item_id))))
            .await
    }

    async fn create_item(&self, item: NewItem) -> Result<VaultItem, ApiError> {
        self.send(self.client.post(self.url("items")).json(&item))
            .await
    }

    async fn update_item(&self, item_id: &str, item: NewItem) -> Result<VaultItem, ApiError> {
        self.send(
            self.client
                .put(self.url(&format!("items/{}", item_id)))
                .json(&item),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_missing_token_is_unauthorized_without_network() {
        let api = HttpVaultApi::new("http://127.0.0.1:1/api/", 1, Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(api.url("/items"), "http://127.0.0.1:1/api/items");
        let err = api.list_organizations().await.unwrap_err();
        assert_eq!(err, ApiError::Unauthorized(401));
    }
}
