//! Gemini `generateContent` provider
//!
//! Each call is a single-turn request: the user's text is the only content
//! sent, so the model has no memory of earlier turns.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ProviderError, ReplyFetcher};

/// Reply used when the response carries no candidate text
pub const NO_REPLY: &str = "[No reply]";

/// Reply used when a successful response has an empty body
pub const NO_RESPONSE: &str = "[No response]";

const MAX_DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

impl<'a> GenerateContentRequest<'a> {
    fn single_turn(text: &'a str) -> Self {
        Self {
            contents: [RequestContent {
                parts: [RequestPart { text }],
            }],
        }
    }
}

// Every level is optional; anything missing means "no reply".
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_reply(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .next()?
            .text
    }
}

/// Why a reply could not be produced
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("{}", describe(.0))]
    Transport(reqwest::Error),

    #[error("{}", describe(.0))]
    Decode(#[from] serde_json::Error),

    #[error("empty response body")]
    EmptyBody,
}

impl FetchError {
    /// Short category name shown in the placeholder
    pub fn category(&self) -> &'static str {
        match self {
            FetchError::Status { .. } => "http",
            FetchError::Transport(e) if e.is_timeout() => "timeout",
            FetchError::Transport(e) if e.is_connect() => "connect",
            FetchError::Transport(e) if e.is_body() || e.is_decode() => "body",
            FetchError::Transport(_) => "request",
            FetchError::Decode(_) => "decode",
            FetchError::EmptyBody => "empty",
        }
    }

    /// Text that stands in for the assistant reply
    pub fn placeholder(&self) -> String {
        match self {
            FetchError::Status { status, body } => {
                format!("[Gemini HTTP error: {} - {}]", status.as_u16(), body)
            }
            FetchError::EmptyBody => NO_RESPONSE.to_string(),
            other => format!(
                "[Gemini {} error: {}]",
                other.category(),
                truncate(&other.to_string(), MAX_DESCRIPTION_CHARS)
            ),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the API key.
        FetchError::Transport(err.without_url())
    }
}

/// Error message followed by its source chain
fn describe(err: &dyn StdError) -> String {
    let mut description = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub struct GeminiProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model
            ),
            api_key,
        })
    }

    /// Perform the request. `Ok(None)` means the response had no reply text.
    pub async fn try_generate(&self, user_text: &str) -> Result<Option<String>, FetchError> {
        let request = GenerateContentRequest::single_turn(user_text);

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status { status, body });
        }

        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;
        Ok(parsed.into_reply())
    }
}

#[async_trait]
impl ReplyFetcher for GeminiProvider {
    async fn fetch_reply(&self, user_text: &str) -> String {
        match self.try_generate(user_text).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                tracing::warn!("Gemini response had no candidate text");
                NO_REPLY.to_string()
            }
            Err(e) => {
                tracing::warn!(category = e.category(), error = %e, "Gemini request failed");
                e.placeholder()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const API_KEY: &str = "test-key";
    const GENERATE_PATH: &str = "/models/gemini-pro:generateContent";

    fn provider_for(base_url: &str, timeout: Duration) -> GeminiProvider {
        GeminiProvider::new(base_url, "gemini-pro", API_KEY.to_string(), timeout).unwrap()
    }

    async fn mount(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", API_KEY))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(GenerateContentRequest::single_turn("hi")).unwrap();
        assert_eq!(body, json!({"contents": [{"parts": [{"text": "hi"}]}]}));
    }

    #[tokio::test]
    async fn test_successful_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", API_KEY))
            .and(body_json(json!({"contents": [{"parts": [{"text": "hi"}]}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hello!"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        assert_eq!(provider.fetch_reply("hi").await, "Hello!");
    }

    #[tokio::test]
    async fn test_unknown_fields_are_ignored() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "first"}, {"text": "second"}], "role": "model"},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"totalTokenCount": 12}
            })),
        )
        .await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        assert_eq!(provider.fetch_reply("hi").await, "first");
    }

    #[tokio::test]
    async fn test_http_error_embeds_status_and_body() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(500).set_body_string("server error")).await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        let reply = provider.fetch_reply("hi").await;

        assert!(reply.contains("500"));
        assert!(reply.contains("server error"));
        assert_eq!(reply, "[Gemini HTTP error: 500 - server error]");
    }

    #[tokio::test]
    async fn test_empty_candidates_is_no_reply() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"candidates": []})),
        )
        .await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        assert_eq!(provider.fetch_reply("hi").await, NO_REPLY);
    }

    #[tokio::test]
    async fn test_missing_parts_is_no_reply() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model"}}]
            })),
        )
        .await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        assert_eq!(provider.try_generate("hi").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_body_is_no_response() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(200)).await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        assert_eq!(provider.fetch_reply("hi").await, NO_RESPONSE);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_diagnostic() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(200).set_body_string("not json")).await;

        let provider = provider_for(&server.uri(), Duration::from_secs(5));
        let reply = provider.fetch_reply("hi").await;
        assert!(reply.starts_with("[Gemini decode error: "), "{reply}");
    }

    #[tokio::test]
    async fn test_connection_refused_is_diagnostic() {
        // Nothing listens on a port once its listener is dropped.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let provider = provider_for(&uri, Duration::from_secs(5));
        let err = provider.try_generate("hi").await.unwrap_err();
        let reply = err.placeholder();

        assert!(matches!(err, FetchError::Transport(_)));
        assert!(reply.starts_with("[Gemini "), "{reply}");
        assert!(reply.contains(err.category()));
        assert!(!reply.contains(API_KEY));
    }

    #[tokio::test]
    async fn test_timeout_is_diagnostic() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(json!({"candidates": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let provider = provider_for(&server.uri(), Duration::from_millis(50));
        let reply = provider.fetch_reply("hi").await;
        assert!(reply.starts_with("[Gemini timeout error: "), "{reply}");
    }

    #[test]
    fn test_description_is_truncated() {
        let long = "é".repeat(500);
        let truncated = truncate(&long, MAX_DESCRIPTION_CHARS);
        assert_eq!(truncated.chars().count(), MAX_DESCRIPTION_CHARS);

        let err = FetchError::Decode(serde_json::from_str::<u8>(&long).unwrap_err());
        let placeholder = err.placeholder();
        let description = placeholder
            .trim_start_matches("[Gemini decode error: ")
            .trim_end_matches(']');
        assert!(description.chars().count() <= MAX_DESCRIPTION_CHARS);
    }
}
