//! HTTP gateway over reqwest

use super::{HttpGateway, HttpOutcome};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Production HTTP gateway backed by a shared reqwest client (rustls TLS).
#[derive(Debug, Clone)]
pub struct ReqwestGateway {
    client: reqwest::Client,
}

impl ReqwestGateway {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with these options");
        Self { client }
    }
}

impl Default for ReqwestGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpGateway for ReqwestGateway {
    async fn request(&self, url: &str, body: Option<&str>) -> HttpOutcome {
        let request = match body {
            Some(payload) => self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .body(payload.to_string()),
            None => self.client.get(url),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return HttpOutcome::Failure(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return HttpOutcome::Failure(format!("HTTP status {status}"));
        }

        match response.text().await {
            Ok(text) if text.is_empty() => HttpOutcome::Empty,
            Ok(text) => {
                debug!(url, bytes = text.len(), "HTTP exchange complete");
                HttpOutcome::Success(text)
            }
            Err(e) => HttpOutcome::Failure(e.to_string()),
        }
    }
}
