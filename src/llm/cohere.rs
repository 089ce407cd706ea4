//! Cohere v2 chat provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::llm::GenerativeProvider;
use crate::llm::prompt::user_prompt;

const COHERE_CHAT_URL: &str = "https://api.cohere.com/v2/chat";
const PROVIDER_NAME: &str = "cohere";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Calls Cohere's chat endpoint.
pub struct CohereProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    temperature: f32,
}

impl CohereProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.into(),
            temperature,
        }
    }
}

#[async_trait]
impl GenerativeProvider for CohereProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn complete(
        &self,
        system_prompt: &str,
        context_lines: &[String],
    ) -> Result<String, ProviderError> {
        let user = user_prompt(context_lines);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
        };

        debug!(model = %self.model, lines = context_lines.len(), "Cohere request");

        let response = self
            .client
            .post(COHERE_CHAT_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &detail));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("malformed body: {e}"),
            }
        })?;

        extract_text(parsed)
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            provider: PROVIDER_NAME.to_string(),
            after: Duration::ZERO,
        }
    } else {
        ProviderError::Transient {
            provider: PROVIDER_NAME.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Map an unsuccessful HTTP status to the provider error taxonomy.
fn classify_status(status: StatusCode, retry_after: Option<Duration>, detail: &str) -> ProviderError {
    let provider = PROVIDER_NAME.to_string();
    let reason = format!("HTTP {status}: {}", truncate(detail, 200));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthFailed { provider },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            provider,
            retry_after,
        },
        StatusCode::REQUEST_TIMEOUT => ProviderError::Timeout {
            provider,
            after: Duration::ZERO,
        },
        s if s.is_server_error() => ProviderError::Transient { provider, reason },
        _ => ProviderError::InvalidRequest { provider, reason },
    }
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn extract_text(response: ChatResponse) -> Result<String, ProviderError> {
    let text = response
        .message
        .into_iter()
        .flat_map(|m| m.content)
        .filter_map(|block| block.text)
        .find(|t| !t.trim().is_empty());

    text.ok_or_else(|| ProviderError::InvalidResponse {
        provider: PROVIDER_NAME.to_string(),
        reason: "no text content".to_string(),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_non_retryable() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = classify_status(status, None, "");
            assert!(matches!(err, ProviderError::AuthFailed { .. }));
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn throttling_keeps_retry_after() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            "slow down",
        );
        match err {
            ProviderError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_status(StatusCode::BAD_GATEWAY, None, "upstream");
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_invalid_requests() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            let err = classify_status(status, None, "bad model");
            assert!(matches!(err, ProviderError::InvalidRequest { .. }));
        }
    }

    #[test]
    fn retry_after_parses_seconds_only() {
        assert_eq!(parse_retry_after(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn extracts_first_text_block() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"id":"x","message":{"role":"assistant","content":[{"type":"text","text":"Yes! What time?"}]}}"#,
        )
        .unwrap();
        assert_eq!(extract_text(body).unwrap(), "Yes! What time?");
    }

    #[test]
    fn missing_text_is_invalid_response() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":[]}}"#).unwrap();
        assert!(matches!(
            extract_text(body),
            Err(ProviderError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn request_body_shape() {
        let req = ChatRequest {
            model: "command-a-03-2025",
            messages: vec![ChatMessage {
                role: "system",
                content: "be nice",
            }],
            temperature: 0.75,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "command-a-03-2025");
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("नमस्ते दुनिया", 3), "नमस...");
        assert_eq!(truncate("short", 10), "short");
    }
}
