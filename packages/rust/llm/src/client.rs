//! OpenAI-compatible chat completions client.
//!
//! The pipeline treats the model as an unreliable text source: every failure
//! (rate limit, connection, server error, malformed body) is logged and turned
//! into an empty string, which callers read as "no usable output".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use exposecast_shared::{ExposecastError, LlmConfig, Result, resolve_secret};

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("exposecast/", env!("CARGO_PKG_VERSION"));

/// Base delay for retry backoff; doubled on every further attempt.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on a server-requested `Retry-After` wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(20);

/// The `{system, user} -> text` contract the pipeline consumes.
///
/// Implementations never fail: an empty string means no usable output.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> String;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat completions client for OpenAI and API-compatible providers.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiClient {
    /// Create a client from config, reading the API key from its env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = resolve_secret(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    /// Create a client with an explicit API key.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ExposecastError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Override the base backoff delay between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send one chat completion, retrying rate limits and server errors.
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let mut attempt = 0;
        loop {
            let outcome = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let retry_after = match outcome {
                Ok(response) if response.status().is_success() => {
                    let parsed: ChatResponse = response.json().await.map_err(|e| {
                        ExposecastError::parse(format!("invalid chat completion body: {e}"))
                    })?;
                    let content = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.message.content)
                        .unwrap_or_default();
                    return Ok(content.trim().to_string());
                }
                Ok(response) if is_retryable(response.status()) => {
                    let status = response.status();
                    if attempt >= self.max_retries {
                        return Err(ExposecastError::Network(format!("{url}: HTTP {status}")));
                    }
                    debug!(%status, attempt, "retryable model response");
                    retry_after_header(&response)
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ExposecastError::Network(format!(
                        "{url}: HTTP {status}: {}",
                        body.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    debug!(error = %e, attempt, "model request failed, retrying");
                    None
                }
                Err(e) => return Err(ExposecastError::Network(format!("{url}: {e}"))),
            };

            let backoff = self.retry_delay * 2u32.saturating_pow(attempt);
            tokio::time::sleep(retry_after.unwrap_or(backoff)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl TextModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str) -> String {
        match self.chat(system, user).await {
            Ok(text) => {
                debug!(chars = text.len(), "model responded");
                text
            }
            Err(e) => {
                warn!(error = %e, "model request failed, degrading to empty output");
                String::new()
            }
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, max_retries: u32) -> OpenAiClient {
        let config = LlmConfig {
            base_url: format!("{}/v1", server.uri()),
            model: "test-model".into(),
            max_retries,
            ..Default::default()
        };
        OpenAiClient::new(&config, "sk-test")
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
    }

    #[tokio::test]
    async fn complete_returns_trimmed_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  Investors \n")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        assert_eq!(client.complete("be terse", "hello").await, "Investors");
    }

    #[tokio::test]
    async fn server_errors_degrade_to_empty_after_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        assert_eq!(client.complete("s", "u").await, "");
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        assert_eq!(client.complete("s", "u").await, "ok");
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        assert_eq!(client.complete("s", "u").await, "");
    }

    #[tokio::test]
    async fn malformed_body_degrades_to_empty() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        assert_eq!(client.complete("s", "u").await, "");
    }

    #[tokio::test]
    async fn unreachable_host_degrades_to_empty() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            connect_timeout_secs: 1,
            max_retries: 0,
            ..Default::default()
        };
        let client = OpenAiClient::new(&config, "sk-test").unwrap();
        assert_eq!(client.complete("s", "u").await, "");
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }
}
