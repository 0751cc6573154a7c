//! Chat-completion client with exponential backoff.
//!
//! - [`AskAsync`]: send one prompt, get the model's raw text back
//! - [`ChatClient`]: OpenAI-compatible `/chat/completions` implementation
//! - [`RetryAsk`]: decorator adding retries with backoff and jitter
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to every delay
//! - No retry when the endpoint answers with a status that will not change
//!   on its own (see [`ApiStatus::is_transient`])

use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// A non-success HTTP answer from the chat endpoint.
#[derive(Debug, thiserror::Error)]
#[error("chat endpoint answered HTTP {status}: {body}")]
pub struct ApiStatus {
    pub status: u16,
    /// Start of the response body, for the log.
    pub body: String,
}

impl ApiStatus {
    /// Timeouts, rate limits and server errors may clear up; a bad key or a
    /// malformed request will not.
    pub fn is_transient(&self) -> bool {
        matches!(self.status, 408 | 429) || self.status >= 500
    }
}

/// Whether retrying after `e` can help. Only a non-transient [`ApiStatus`]
/// says no; network failures and unreadable answers are retried.
fn is_retryable(e: &(dyn Error + 'static)) -> bool {
    e.downcast_ref::<ApiStatus>().is_none_or(ApiStatus::is_transient)
}

/// Async access to a text-generation model.
pub trait AskAsync {
    type Response;

    /// Send `text` as the user message and return the model's answer.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`] implementation.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        self.base_delay.saturating_mul(1 << shift).min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !is_retryable(&*e) {
                        error!(
                            attempt,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() failed with a permanent error; not retrying"
                        );
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = self.backoff(attempt) + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: StdDuration,
}

impl ChatConfig {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.4,
            timeout: StdDuration::from_secs(90),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatAnswer,
}

#[derive(Debug, Deserialize)]
struct ChatAnswer {
    #[serde(default)]
    content: Option<String>,
}

/// Minimal chat-completions client over `reqwest`.
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatConfig,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the key
        f.debug_struct("ChatClient")
            .field("api_base", &self.config.api_base)
            .field("model", &self.config.model)
            .finish()
    }
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, Box<dyn Error>> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }
}

impl AskAsync for ChatClient {
    type Response = String;

    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: text,
            }],
            temperature: self.config.temperature,
        };

        let resp = self
            .http
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Box::new(ApiStatus {
                status: status.as_u16(),
                body: truncate_for_log(&text, 200),
            }));
        }
        let parsed: ChatResponse = resp.json().await?;
        let dt = t0.elapsed();

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or("model returned no choices")?;
        info!(elapsed_ms = dt.as_millis() as u64, bytes = content.len(), "Model answered");
        Ok(content.trim().to_string())
    }
}

/// Ask `asker` with up to 5 retries (1s base delay).
#[instrument(level = "info", skip_all)]
pub async fn ask_with_backoff<A>(asker: &A, prompt: &str) -> Result<String, Box<dyn Error>>
where
    A: AskAsync<Response = String> + fmt::Debug,
{
    let t0 = Instant::now();
    let api = RetryAsk::new(Borrowed(asker), 5, StdDuration::from_secs(1));
    let res = api.ask(prompt).await;
    let dt = t0.elapsed();

    match &res {
        Ok(_) => info!(elapsed_ms_total = dt.as_millis() as u64, "ask_with_backoff succeeded"),
        Err(e) => error!(
            elapsed_ms_total = dt.as_millis() as u64,
            error = %e,
            "ask_with_backoff failed"
        ),
    }
    res
}

/// Lets a borrowed client sit inside [`RetryAsk`].
#[derive(Debug)]
struct Borrowed<'a, A>(&'a A);

impl<A: AskAsync> AskAsync for Borrowed<'_, A> {
    type Response = A::Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        self.0.ask(text).await
    }
}
