use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};

use super::error::AnthropicError;
use super::types::{MessagesRequest, MessagesResponse};

pub const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Transporte de mensagens. Implementado pelo cliente HTTP e por mocks de teste.
pub trait MessageSender: Send + Sync {
    fn send_message(
        &self,
        req: &MessagesRequest,
    ) -> impl Future<Output = Result<MessagesResponse, AnthropicError>> + Send;
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_key: String,
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Result<Self, AnthropicError> {
        Self::with_base_url(api_key, API_URL.to_string())
    }

    /// Cliente apontando para uma URL customizada (útil para testes).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, AnthropicError> {
        if api_key.trim().is_empty() {
            return Err(AnthropicError::MissingApiKey);
        }
        Ok(Self {
            api_key,
            client: http_client(DEFAULT_TIMEOUT)?,
            base_url,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Substitui o timeout total de cada requisição.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AnthropicError> {
        self.client = http_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    fn transport_error(&self, err: reqwest::Error) -> AnthropicError {
        if err.is_timeout() {
            AnthropicError::Timeout(self.timeout)
        } else {
            AnthropicError::NetworkError(err)
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn http_client(timeout: Duration) -> Result<Client, AnthropicError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()?)
}

impl MessageSender for AnthropicClient {
    #[instrument(skip_all, fields(model = %req.model))]
    async fn send_message(
        &self,
        req: &MessagesRequest,
    ) -> Result<MessagesResponse, AnthropicError> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        debug!(status = status.as_u16(), "messages endpoint replied");

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(AnthropicError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AnthropicError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| self.transport_error(e))?;
        if body.text().trim().is_empty() {
            return Err(AnthropicError::EmptyResponse { id: body.id });
        }
        debug!(
            input_tokens = body.usage.input_tokens,
            output_tokens = body.usage.output_tokens,
            "usage"
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "msg_1",
            "content": [{"type": "text", "text": text}],
            "model": "claude-sonnet-4-5-20250929",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        })
    }

    fn request() -> MessagesRequest {
        MessagesRequest::user("claude-sonnet-4-5-20250929", 64, "ping")
    }

    #[test]
    fn blank_key_is_rejected() {
        assert!(matches!(
            AnthropicClient::new("  ".into()),
            Err(AnthropicError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn sends_headers_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("pong")))
            .expect(1)
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("test-key".into(), server.uri()).unwrap();
        let resp = client.send_message(&request()).await.unwrap();
        assert_eq!(resp.text(), "pong");
        assert_eq!(resp.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri()).unwrap();
        let err = client.send_message(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            AnthropicError::RateLimited {
                retry_after_ms: 3000
            }
        ));
    }

    #[tokio::test]
    async fn maps_error_status_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri()).unwrap();
        match client.send_message(&request()).await.unwrap_err() {
            AnthropicError::ApiError { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid x-api-key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_server_reports_configured_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri())
            .unwrap()
            .with_timeout(Duration::from_millis(50))
            .unwrap();
        let err = client.send_message(&request()).await.unwrap_err();
        assert!(matches!(err, AnthropicError::Timeout(d) if d == Duration::from_millis(50)));
        assert_eq!(err.to_string(), "request timed out after 50ms");
    }

    #[tokio::test]
    async fn empty_text_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("   ")))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_base_url("k".into(), server.uri()).unwrap();
        let err = client.send_message(&request()).await.unwrap_err();
        assert!(matches!(err, AnthropicError::EmptyResponse { .. }));
    }
}
