//! Reasoning-provider backends for the guarded external decision call.
//!
//! [`ReasoningProvider`] decouples the guarded client from transport. Each
//! backend classifies its own failures into [`ProviderFailure`] so the guard
//! can decide what to retry. Tests use scripted providers instead.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{CommandProviderConfig, HttpProviderConfig};
use crate::io::process::run_with_timeout;

pub const SYSTEM_PROMPT: &str = "You advise an auto-battler player. Reply with exactly one JSON \
object describing the next action, optionally inside a ```json fence.";

/// One reasoning call.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub prompt: String,
    /// The backend must give up after this long.
    pub timeout: Duration,
}

/// Backend failure taxonomy consumed by the retry loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    #[error("timed out")]
    TimedOut,
    /// Worth retrying (network blip, rate limit, server error).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help (bad credentials, malformed request).
    #[error("fatal: {0}")]
    Fatal(String),
}

pub trait ReasoningProvider {
    /// Return the provider's raw text response.
    fn complete(&self, request: &ReasoningRequest) -> Result<String, ProviderFailure>;
}

impl<P: ReasoningProvider + ?Sized> ReasoningProvider for Box<P> {
    fn complete(&self, request: &ReasoningRequest) -> Result<String, ProviderFailure> {
        (**self).complete(request)
    }
}

/// Runs a local command: prompt on stdin, response on stdout.
pub struct CommandProvider {
    config: CommandProviderConfig,
}

impl CommandProvider {
    pub fn new(config: CommandProviderConfig) -> Self {
        Self { config }
    }
}

impl ReasoningProvider for CommandProvider {
    #[instrument(skip_all, fields(timeout_ms = request.timeout.as_millis() as u64))]
    fn complete(&self, request: &ReasoningRequest) -> Result<String, ProviderFailure> {
        let output = run_with_timeout(
            &self.config.argv,
            request.prompt.as_bytes(),
            request.timeout,
            self.config.output_limit_bytes,
        )
        .map_err(|err| ProviderFailure::Fatal(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ProviderFailure::TimedOut);
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "reasoning command failed");
            return Err(ProviderFailure::Transient(format!(
                "command exited with {:?}: {}",
                output.status.code(),
                output.stderr_tail()
            )));
        }
        debug!(bytes = output.stdout.len(), "reasoning command completed");
        Ok(output.stdout_text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    Anthropic,
    OpenAi,
}

impl ApiFormat {
    pub fn detect(api_url: &str) -> Self {
        if api_url.contains("anthropic.com") {
            Self::Anthropic
        } else {
            Self::OpenAi
        }
    }
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: String,
}

/// Calls an Anthropic or OpenAI-compatible chat endpoint.
pub struct HttpProvider {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    format: ApiFormat,
}

impl HttpProvider {
    pub fn new(api_url: String, api_key: String, model: String, max_tokens: u32) -> Result<Self> {
        let client = Client::builder().build().context("build http client")?;
        let format = ApiFormat::detect(&api_url);
        Ok(Self {
            client,
            api_url,
            api_key,
            model,
            max_tokens,
            format,
        })
    }

    /// Build from config, reading the key from the configured variable.
    pub fn from_config(config: &HttpProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("read api key from ${}", config.api_key_env))?;
        info!(api_url = %config.api_url, model = %config.model, "using http reasoning provider");
        Self::new(
            config.api_url.clone(),
            api_key,
            config.model.clone(),
            config.max_tokens,
        )
    }

    fn send(&self, request: &ReasoningRequest) -> Result<String, ProviderFailure> {
        let builder = self.client.post(&self.api_url).timeout(request.timeout);
        let builder = match self.format {
            ApiFormat::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&AnthropicRequest {
                    model: &self.model,
                    max_tokens: self.max_tokens,
                    system: SYSTEM_PROMPT,
                    messages: vec![Message {
                        role: "user",
                        content: &request.prompt,
                    }],
                }),
            ApiFormat::OpenAi => builder.bearer_auth(&self.api_key).json(&OpenAiRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                messages: vec![
                    Message {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    Message {
                        role: "user",
                        content: &request.prompt,
                    },
                ],
            }),
        };

        let response = builder.send().map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response.text());
            return Err(classify_status(status, &body));
        }
        let text = match self.format {
            ApiFormat::Anthropic => {
                let body: AnthropicResponse = response.json().map_err(classify_transport)?;
                body.content.into_iter().next().map(|content| content.text)
            }
            ApiFormat::OpenAi => {
                let body: OpenAiResponse = response.json().map_err(classify_transport)?;
                body.choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
            }
        };
        text.ok_or_else(|| ProviderFailure::Fatal("empty completion".to_string()))
    }
}

impl ReasoningProvider for HttpProvider {
    #[instrument(skip_all, fields(model = %self.model, timeout_ms = request.timeout.as_millis() as u64))]
    fn complete(&self, request: &ReasoningRequest) -> Result<String, ProviderFailure> {
        let result = self.send(request);
        if let Err(failure) = &result {
            warn!(%failure, "http reasoning call failed");
        }
        result
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderFailure {
    if err.is_timeout() {
        ProviderFailure::TimedOut
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ProviderFailure::Transient(err.to_string())
    } else {
        ProviderFailure::Fatal(err.to_string())
    }
}

/// Body of a failed response, or why it could not be read.
fn error_body<E: std::fmt::Display>(read: Result<String, E>) -> String {
    read.unwrap_or_else(|err| format!("<unreadable body: {err}>"))
}

/// 429 and 5xx are retryable; other errors are not.
pub fn classify_status(status: StatusCode, body: &str) -> ProviderFailure {
    let message = format!("{status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderFailure::Transient(message)
    } else {
        ProviderFailure::Fatal(message)
    }
}
