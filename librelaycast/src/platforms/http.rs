//! Generic JSON-over-HTTP platform adapter
//!
//! Posts the formatted payload to the endpoint declared in `PlatformConfig`
//! and maps the HTTP response into the delivery error taxonomy: 2xx succeeds
//! with the post id from the body, 429 becomes a rate limit with the
//! Retry-After value, other 4xx are permanent, 5xx and connection trouble
//! are transient. `X-RateLimit-Remaining`/`X-RateLimit-Reset` headers are
//! captured for the adaptive rate limiter.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::debug;

use crate::config::PlatformConfig;
use crate::error::DeliveryError;
use crate::platforms::Platform;
use crate::rate_limiter::RateLimitHint;
use crate::types::PlatformPayload;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub struct HttpPlatform {
    name: String,
    endpoint: String,
    verify_endpoint: Option<String>,
    client: reqwest::Client,
    last_hint: Mutex<Option<RateLimitHint>>,
}

impl HttpPlatform {
    /// Build an adapter from a platform config carrying an endpoint.
    pub fn from_config(
        config: &PlatformConfig,
        request_timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            DeliveryError::permanent(
                None,
                format!("platform '{}' has no endpoint configured", config.name),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DeliveryError::permanent(None, format!("http client setup: {e}")))?;

        Ok(Self {
            name: config.name.clone(),
            endpoint,
            verify_endpoint: config.verify_endpoint.clone(),
            client,
            last_hint: Mutex::new(None),
        })
    }

    fn capture_hint(&self, headers: &HeaderMap) {
        let remaining = header_u64(headers, "x-ratelimit-remaining");
        let reset = header_u64(headers, "x-ratelimit-reset");
        if let (Some(remaining), Some(reset)) = (remaining, reset) {
            debug!(
                platform = self.name.as_str(),
                remaining, reset, "captured platform rate headers"
            );
            *self.last_hint.lock().unwrap() = Some(RateLimitHint {
                remaining: remaining as u32,
                reset_after: Duration::from_secs(reset),
            });
        }
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn post(&self, payload: &PlatformPayload) -> Result<String, DeliveryError> {
        let body = serde_json::json!({
            "text": payload.rendered_text(),
            "media": payload.media,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;

        self.capture_hint(response.headers());
        let status = response.status();

        if status.is_success() {
            let value: Value = response
                .json()
                .await
                .map_err(|e| DeliveryError::transient(format!("unreadable response body: {e}")))?;
            return extract_post_id(&value).ok_or_else(|| {
                DeliveryError::permanent(
                    Some(status.as_u16()),
                    "response body carried no post id",
                )
            });
        }

        if status.as_u16() == 429 {
            let retry_after = header_u64(response.headers(), "retry-after")
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(DeliveryError::rate_limited(retry_after));
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(DeliveryError::transient(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text
            )))
        } else {
            Err(DeliveryError::permanent(Some(status.as_u16()), text))
        }
    }

    async fn validate_credentials(&self) -> bool {
        let Some(url) = &self.verify_endpoint else {
            return true;
        };
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rate_limit_hint(&self) -> Option<RateLimitHint> {
        *self.last_hint.lock().unwrap()
    }
}

fn map_request_error(error: reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::timeout(0)
    } else {
        DeliveryError::transient(format!("request failed: {error}"))
    }
}

/// Platforms disagree on the id field; accept the common spellings.
fn extract_post_id(value: &Value) -> Option<String> {
    for key in ["id", "external_id", "post_id"] {
        match value.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> PlatformPayload {
        PlatformPayload {
            platform: "mastodon".to_string(),
            body: "Hello World".to_string(),
            trailing_hashtags: vec!["rust".to_string()],
            media: Vec::new(),
        }
    }

    async fn adapter(server: &MockServer) -> HttpPlatform {
        let mut config = PlatformConfig::new("mastodon");
        config.endpoint = Some(format!("{}/statuses", server.uri()));
        HttpPlatform::from_config(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn success_returns_post_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/statuses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "109501"
            })))
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        let id = platform.post(&payload()).await.unwrap();
        assert_eq!(id, "109501");
    }

    #[tokio::test]
    async fn numeric_id_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": 4242 })),
            )
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        assert_eq!(platform.post(&payload()).await.unwrap(), "4242");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        let err = platform.post(&payload()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transient { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("duplicate status"))
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        let err = platform.post(&payload()).await.unwrap_err();
        match err {
            DeliveryError::Permanent { status, .. } => assert_eq!(status, Some(422)),
            other => panic!("expected permanent, got {:?}", other),
        }
        assert!(!platform
            .post(&payload())
            .await
            .unwrap_err()
            .is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        let err = platform.post(&payload()).await.unwrap_err();
        assert_eq!(err.retry_after_secs(), Some(120));
    }

    #[tokio::test]
    async fn rate_headers_captured_as_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ratelimit-remaining", "7")
                    .insert_header("x-ratelimit-reset", "300")
                    .set_body_json(serde_json::json!({ "id": "1" })),
            )
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        assert!(platform.rate_limit_hint().is_none());
        platform.post(&payload()).await.unwrap();

        let hint = platform.rate_limit_hint().expect("hint should be captured");
        assert_eq!(hint.remaining, 7);
        assert_eq!(hint.reset_after, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn missing_post_id_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true
            })))
            .mount(&server)
            .await;

        let platform = adapter(&server).await;
        let err = platform.post(&payload()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permanent { .. }));
    }

    #[tokio::test]
    async fn missing_endpoint_rejected_at_construction() {
        let config = PlatformConfig::new("mastodon");
        let result = HttpPlatform::from_config(&config, Duration::from_secs(5));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn credentials_check_uses_verify_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut config = PlatformConfig::new("mastodon");
        config.endpoint = Some(format!("{}/statuses", server.uri()));
        config.verify_endpoint = Some(format!("{}/verify", server.uri()));
        let platform = HttpPlatform::from_config(&config, Duration::from_secs(5)).unwrap();

        assert!(platform.validate_credentials().await);
    }

    #[tokio::test]
    async fn credentials_check_defaults_to_true_without_verify_endpoint() {
        let server = MockServer::start().await;
        let platform = adapter(&server).await;
        assert!(platform.validate_credentials().await);
    }
}
