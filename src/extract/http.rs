//! Model-backed extractor behind an HTTP endpoint.
//!
//! POSTs `{"text": ...}` and expects an [`Extraction`]-shaped JSON body back.
//! Transient failures (timeouts, connection errors, 5xx) are retried with
//! exponential backoff up to `extractor.max_retries` extra attempts.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Extraction, ExtractionError, SemanticExtractor};
use crate::config::ExtractorConfig;

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

pub struct HttpExtractor {
    endpoint: String,
    client: Client,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl HttpExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        info!(endpoint = %config.endpoint, timeout_ms = config.timeout_ms, "http extractor initialized");
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        })
    }

    async fn attempt(&self, text: &str) -> Result<Extraction, ExtractionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ExtractRequest { text })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ExtractionError::Transport(format!("endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(ExtractionError::Malformed(format!("endpoint returned {status}")));
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let extraction: Extraction = serde_json::from_str(&body)
            .map_err(|e| ExtractionError::Malformed(e.to_string()))?;
        Ok(extraction.normalized())
    }

    fn classify(&self, e: reqwest::Error) -> ExtractionError {
        if e.is_timeout() {
            ExtractionError::Timeout(self.timeout)
        } else {
            ExtractionError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl SemanticExtractor for HttpExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction, ExtractionError> {
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty);
        }

        let mut attempt = 0;
        loop {
            match self.attempt(text).await {
                Ok(extraction) => return Ok(extraction),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying extractor call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempts = attempt + 1, error = %e, "extractor call failed");
                    return Err(e);
                }
            }
        }
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/extract")
    }

    fn config(endpoint: String) -> ExtractorConfig {
        ExtractorConfig {
            provider: "http".into(),
            endpoint,
            timeout_ms: 500,
            max_retries: 2,
            backoff_ms: 5,
        }
    }

    #[tokio::test]
    async fn parses_and_normalizes_response() {
        let app = Router::new().route(
            "/extract",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["text"], "at the Gym with Sam");
                Json(serde_json::json!({
                    "location": "The Gym",
                    "activity_type": "Exercise",
                    "participants": ["Sam"],
                    "confidence": 0.9,
                    "energy_level": 8
                }))
            }),
        );
        let extractor = HttpExtractor::new(&config(spawn(app).await)).unwrap();

        let x = extractor.extract("at the Gym with Sam").await.unwrap();
        assert_eq!(x.location.as_deref(), Some("the gym"));
        assert_eq!(x.activity_type.as_deref(), Some("exercise"));
        assert_eq!(x.participants, vec!["sam".to_string()]);
        assert_eq!(x.scores.energy_level, Some(8));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/extract",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"location": "home", "confidence": 0.6})))
                    }
                }
            }),
        );
        let extractor = HttpExtractor::new(&config(spawn(app).await)).unwrap();

        let x = extractor.extract("back home").await.unwrap();
        assert_eq!(x.location.as_deref(), Some("home"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_body_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let app = Router::new().route(
            "/extract",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "not json" }
            }),
        );
        let extractor = HttpExtractor::new(&config(spawn(app).await)).unwrap();

        let err = extractor.extract("anything").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let mut cfg = config("http://127.0.0.1:1/extract".into());
        cfg.max_retries = 0;
        let extractor = HttpExtractor::new(&cfg).unwrap();

        let err = extractor.extract("anything").await.unwrap_err();
        assert!(err.is_transient());
    }
}
