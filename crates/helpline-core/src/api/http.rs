//! HTTP implementation of the support API

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{ApiError, SupportApi, ThreadDetail};
use crate::models::{Message, Thread};

/// Support API over HTTP
///
/// Endpoints, relative to the base URL:
/// - `GET    /threads`
/// - `GET    /threads/{id}`
/// - `POST   /threads`              `{"subject"}`
/// - `POST   /threads/{id}/messages` `{"content"}`
/// - `POST   /threads/{id}/close`
#[derive(Debug, Clone)]
pub struct HttpSupportApi {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpSupportApi {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    /// Use a preconfigured client (timeouts, proxies)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SupportApi for HttpSupportApi {
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        debug!("GET /threads");
        self.send_json(self.client.get(self.url("/threads"))).await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail, ApiError> {
        debug!("GET /threads/{}", thread_id);
        self.send_json(self.client.get(self.url(&format!("/threads/{}", thread_id))))
            .await
    }

    async fn create_thread(&self, subject: &str) -> Result<Thread, ApiError> {
        debug!("POST /threads");
        let request = self
            .client
            .post(self.url("/threads"))
            .json(&json!({ "subject": subject }));
        self.send_json(request).await
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<Message, ApiError> {
        debug!("POST /threads/{}/messages", thread_id);
        let request = self
            .client
            .post(self.url(&format!("/threads/{}/messages", thread_id)))
            .json(&json!({ "content": content }));
        let mut message: Message = self.send_json(request).await?;
        if message.thread_id.is_empty() {
            message.thread_id = thread_id.to_string();
        }
        Ok(message)
    }

    async fn close_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        debug!("POST /threads/{}/close", thread_id);
        self.send(
            self.client
                .post(self.url(&format!("/threads/{}/close", thread_id))),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpSupportApi::new("https://support.example.com/api/", None);
        assert_eq!(
            api.url("/threads"),
            "https://support.example.com/api/threads"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let api = HttpSupportApi::new("http://127.0.0.1:9", None);
        let err = api.list_threads().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
