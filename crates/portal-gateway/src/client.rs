use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use portal_core::errors::TransportError;
use portal_core::gateway::{ChatGateway, ChatRequest, ChunkStream};

const API_KEY_HEADER: &str = "X-API-Key";

/// Streams `POST /chat` responses over HTTP.
pub struct HttpChatGateway {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
}

impl HttpChatGateway {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::NetworkError(format!("failed to build HTTP client: {e}")))?;

        let api_key = api_key
            .map(|raw| sanitize_api_key(&raw))
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Keep only visible ASCII (0x21..=0x7E); anything else would make the
/// header value invalid or leak whitespace pasted along with the key.
pub fn sanitize_api_key(raw: &str) -> String {
    raw.chars().filter(|c| ('\x21'..='\x7e').contains(c)).collect()
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl ChatGateway for HttpChatGateway {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(model_id = %request.model_id, messages = request.messages.len()))]
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key.expose_secret());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(TransportError::RateLimited {
                    retry_after: retry_after(&resp),
                });
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status.as_u16(), body));
        }
        debug!(status = status.as_u16(), "chat stream opened");

        let body = resp
            .bytes_stream()
            .map_err(|e| TransportError::StreamInterrupted(e.to_string()));
        Ok(Box::pin(body))
    }
}
