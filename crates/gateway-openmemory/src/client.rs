use crate::{
    MemoryBackend, OpenMemoryError, SearchRequest, SearchResult, StoreRequest, StoreResult,
};
use std::time::Duration;

/// HTTP-backed client for the OpenMemory vector-memory service.
#[derive(Debug, Clone)]
pub struct OpenMemoryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenMemoryClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout_seconds: u64,
        max_retries: u32,
    ) -> Result<Self, OpenMemoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| OpenMemoryError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key,
            max_retries,
        })
    }

    fn store_url(&self) -> String {
        format!("{}/v1/memories", self.base_url.trim_end_matches('/'))
    }

    fn search_url(&self) -> String {
        format!("{}/v1/memories/search", self.base_url.trim_end_matches('/'))
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send_with_retries(
        &self,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OpenMemoryError> {
        let mut attempt = 0;
        loop {
            match make_request().send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < self.max_retries && (e.is_timeout() || e.is_connect()) => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(OpenMemoryError::Connection(e.to_string())),
            }
        }
    }
}

#[async_trait::async_trait]
impl MemoryBackend for OpenMemoryClient {
    async fn store(&self, req: StoreRequest<'_>) -> Result<StoreResult, OpenMemoryError> {
        let url = self.store_url();
        let resp = self
            .send_with_retries(|| self.authed(self.http.post(&url).json(&req)))
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OpenMemoryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<StoreResult>()
            .await
            .map_err(|e| OpenMemoryError::Decode(e.to_string()))
    }

    async fn search(&self, req: SearchRequest<'_>) -> Result<SearchResult, OpenMemoryError> {
        let url = self.search_url();
        let resp = self
            .send_with_retries(|| self.authed(self.http.post(&url).json(&req)))
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OpenMemoryError::Api {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<SearchResult>()
            .await
            .map_err(|e| OpenMemoryError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn store_success_decodes_memory_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/memories");
            then.status(200)
                .json_body(serde_json::json!({"memory_id": "mem-1"}));
        });

        let client = OpenMemoryClient::new(server.base_url(), None, 5, 0).unwrap();
        let result = client
            .store(StoreRequest {
                target_space: "team:alpha",
                payload_md: "# note",
                user_id: None,
                tags: None,
                metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(result.memory_id, "mem-1");
        mock.assert();
    }

    #[tokio::test]
    async fn store_api_error_carries_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/memories");
            then.status(500).body("boom");
        });

        let client = OpenMemoryClient::new(server.base_url(), None, 5, 0).unwrap();
        let err = client
            .store(StoreRequest {
                target_space: "team:alpha",
                payload_md: "# note",
                user_id: None,
                tags: None,
                metadata: None,
            })
            .await
            .unwrap_err();

        match err {
            OpenMemoryError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn search_decodes_hits() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/memories/search");
            then.status(200).json_body(serde_json::json!({
                "hits": [{"memory_id": "mem-1", "content_md": "hi", "score": 0.9}]
            }));
        });

        let client = OpenMemoryClient::new(server.base_url(), None, 5, 0).unwrap();
        let result = client
            .search(SearchRequest {
                query: "hi",
                target_space: "team:alpha",
                limit: 5,
                user_id: None,
                filters: None,
            })
            .await
            .unwrap();

        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].memory_id, "mem-1");
    }
}
