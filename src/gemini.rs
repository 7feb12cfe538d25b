use std::future::Future;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::AppConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TEMPERATURE: f32 = 0.7;
const MAX_OUTPUT_TOKENS: u32 = 500;

/// Outcome of a single generateContent attempt, classified by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Reply(String),
    /// 2xx but no usable candidate text. Not retried.
    EmptyReply,
    /// 503 from the upstream, worth a short backoff.
    Overloaded,
    /// 429 from the upstream, worth a longer backoff.
    RateLimited,
    /// Any other failure, including network faults (status None). Terminal.
    Fatal(Option<u16>),
}

/// Terminal result of a full retried call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Reply(String),
    EmptyReply,
    Exhausted,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub overload_backoff: Duration,
    pub rate_limit_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            overload_backoff: Duration::from_secs(2),
            rate_limit_backoff: Duration::from_secs(4),
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Drives one chat call to completion. Every call starts a fresh attempt
/// budget; there is no breaker or backoff state shared across requests.
pub async fn run_with_retry<S, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &S,
    mut attempt_fn: F,
) -> ChatOutcome
where
    S: Sleeper + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    for attempt in 1..=policy.max_attempts {
        match attempt_fn().await {
            AttemptOutcome::Reply(text) => return ChatOutcome::Reply(text),
            AttemptOutcome::EmptyReply => {
                warn!(attempt, "language model returned no usable reply");
                return ChatOutcome::EmptyReply;
            }
            AttemptOutcome::Overloaded => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    "language model overloaded"
                );
                if attempt < policy.max_attempts {
                    sleeper.sleep(policy.overload_backoff).await;
                }
            }
            AttemptOutcome::RateLimited => {
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    "language model rate limit hit"
                );
                if attempt < policy.max_attempts {
                    sleeper.sleep(policy.rate_limit_backoff).await;
                }
            }
            AttemptOutcome::Fatal(status) => {
                error!(attempt, status, "language model call failed, not retrying");
                return ChatOutcome::Aborted;
            }
        }
    }

    error!(
        max_attempts = policy.max_attempts,
        "language model still unavailable after all attempts"
    );
    ChatOutcome::Exhausted
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model_id: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build the Gemini HTTP client")?;

        Ok(Self {
            http,
            base_url: config.gemini_base_url.clone(),
            model_id: config.model_id.clone(),
            api_key: config.gemini_api_key.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Issues a single generateContent POST and classifies the result.
    /// Network faults are terminal for the whole call, so they come back as
    /// Fatal rather than a retryable condition.
    pub async fn generate(&self, prompt: &str) -> AttemptOutcome {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model_id, self.api_key
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let response = match self.http.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "request to the language model failed");
                return AttemptOutcome::Fatal(None);
            }
        };

        let status = response.status();
        if status.is_success() {
            let parsed: GenerateResponse = match response.json().await {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = %err, "language model response did not parse");
                    return AttemptOutcome::EmptyReply;
                }
            };
            return match parsed.reply_text() {
                Some(text) if !text.trim().is_empty() => {
                    AttemptOutcome::Reply(text.trim().to_string())
                }
                _ => AttemptOutcome::EmptyReply,
            };
        }

        match status {
            StatusCode::SERVICE_UNAVAILABLE => AttemptOutcome::Overloaded,
            StatusCode::TOO_MANY_REQUESTS => AttemptOutcome::RateLimited,
            _ => {
                let body = response.text().await.unwrap_or_default();
                error!(
                    status = status.as_u16(),
                    body = %body,
                    "language model returned a non-retryable status"
                );
                AttemptOutcome::Fatal(Some(status.as_u16()))
            }
        }
    }
}

// generateContent wire structures. Replies are parsed into strict structs
// with Option fields so a missing candidate or part is detected explicitly.

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    fn reply_text(&self) -> Option<&str> {
        let content = self.candidates.first()?.content.as_ref()?;
        content.parts.first().map(|part| part.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Mutex;

    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                slept: Mutex::new(Vec::new()),
            }
        }

        fn durations(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    async fn run_script(script: Vec<AttemptOutcome>) -> (ChatOutcome, usize, Vec<Duration>) {
        let total = script.len();
        let remaining = RefCell::new(script);
        let sleeper = RecordingSleeper::new();
        let outcome = run_with_retry(&RetryPolicy::default(), &sleeper, || {
            let next = remaining.borrow_mut().remove(0);
            async move { next }
        })
        .await;
        let attempts = total - remaining.borrow().len();
        (outcome, attempts, sleeper.durations())
    }

    #[tokio::test]
    async fn recovers_after_two_overloads() {
        let (outcome, attempts, slept) = run_script(vec![
            AttemptOutcome::Overloaded,
            AttemptOutcome::Overloaded,
            AttemptOutcome::Reply("all good".to_string()),
        ])
        .await;

        assert_eq!(outcome, ChatOutcome::Reply("all good".to_string()));
        assert_eq!(attempts, 3);
        assert_eq!(slept, vec![Duration::from_secs(2), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn exhausts_exactly_three_attempts_when_always_overloaded() {
        let (outcome, attempts, slept) = run_script(vec![
            AttemptOutcome::Overloaded,
            AttemptOutcome::Overloaded,
            AttemptOutcome::Overloaded,
        ])
        .await;

        assert_eq!(outcome, ChatOutcome::Exhausted);
        assert_eq!(attempts, 3);
        // No backoff after the final attempt.
        assert_eq!(slept, vec![Duration::from_secs(2), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn rate_limits_wait_longer_than_overloads() {
        let (outcome, attempts, slept) = run_script(vec![
            AttemptOutcome::RateLimited,
            AttemptOutcome::Reply("ok".to_string()),
        ])
        .await;

        assert_eq!(outcome, ChatOutcome::Reply("ok".to_string()));
        assert_eq!(attempts, 2);
        assert_eq!(slept, vec![Duration::from_secs(4)]);
    }

    #[tokio::test]
    async fn client_error_aborts_on_the_first_attempt() {
        let (outcome, attempts, slept) =
            run_script(vec![AttemptOutcome::Fatal(Some(400))]).await;

        assert_eq!(outcome, ChatOutcome::Aborted);
        assert_eq!(attempts, 1);
        assert!(slept.is_empty());
    }

    #[tokio::test]
    async fn empty_reply_is_not_retried() {
        let (outcome, attempts, slept) = run_script(vec![AttemptOutcome::EmptyReply]).await;

        assert_eq!(outcome, ChatOutcome::EmptyReply);
        assert_eq!(attempts, 1);
        assert!(slept.is_empty());
    }

    fn test_client(base_url: String) -> GeminiClient {
        GeminiClient::new(&AppConfig {
            database_url: "postgres://unused".to_string(),
            gemini_api_key: "test-key".to_string(),
            gemini_base_url: base_url,
            model_id: "gemini-1.5-flash".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn classifies_a_successful_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"candidates":[{"content":{"parts":[{"text":"  Hello from the clinic  "}]}}]}"#,
            )
            .create_async()
            .await;

        let client = test_client(server.url());
        let outcome = client.generate("hi").await;

        mock.assert_async().await;
        assert_eq!(
            outcome,
            AttemptOutcome::Reply("Hello from the clinic".to_string())
        );
    }

    #[tokio::test]
    async fn missing_candidates_count_as_an_empty_reply() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{}"#)
            .create_async()
            .await;

        let client = test_client(server.url());
        assert_eq!(client.generate("hi").await, AttemptOutcome::EmptyReply);
    }

    #[tokio::test]
    async fn overload_and_rate_limit_statuses_are_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = test_client(server.url());
        assert_eq!(client.generate("hi").await, AttemptOutcome::Overloaded);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let client = test_client(server.url());
        assert_eq!(client.generate("hi").await, AttemptOutcome::RateLimited);
    }

    #[tokio::test]
    async fn auth_errors_are_fatal_with_the_real_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/models/gemini-1.5-flash:generateContent")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = test_client(server.url());
        assert_eq!(
            client.generate("hi").await,
            AttemptOutcome::Fatal(Some(403))
        );
    }

    #[test]
    fn reply_extraction_requires_every_nested_field() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{}]}"#).unwrap();
        assert_eq!(parsed.reply_text(), None);

        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"content":{"parts":[]}}]}"#).unwrap();
        assert_eq!(parsed.reply_text(), None);
    }

    #[test]
    fn request_body_matches_the_generate_content_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "hello".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 500);
    }
}
