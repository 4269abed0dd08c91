//! OpenAI Responses API client
//!
//! Sends one stored-prompt request per work item:
//!
//! ```json
//! {"prompt": {"id": "pmpt_...", "version": "2",
//!             "variables": {"artist_name": "...", "artist_data": "..."}}}
//! ```
//!
//! The client makes exactly one HTTP request per call; retry policy lives in
//! the call executor.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CompletionService, ServiceError, ServiceFailure, ServiceReply};
use crate::quota::headers::{feedback_from_headers, retry_after};
use crate::WorkItem;

/// Production endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Header selecting the billed organization
pub const ORGANIZATION_HEADER: &str = "OpenAI-Organization";

/// Sent as `artist_data` when an item has no payload
pub const NO_PAYLOAD_PLACEHOLDER: &str = "No additional data provided";

#[derive(Debug, Deserialize)]
struct ResponseBody {
    id: Option<String>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// OpenAI Responses API client.
#[derive(Debug, Clone)]
pub struct OpenAiService {
    client: Client,
    base_url: String,
    api_key: String,
    prompt_id: String,
    prompt_version: Option<String>,
    organization: Option<String>,
}

impl OpenAiService {
    /// Create a client against the production endpoint.
    pub fn new(
        api_key: impl Into<String>,
        prompt_id: impl Into<String>,
        prompt_version: Option<String>,
    ) -> Result<Self, ServiceError> {
        Self::with_base_url(api_key, prompt_id, prompt_version, DEFAULT_BASE_URL, DEFAULT_TIMEOUT)
    }

    /// Create a client against `base_url`.
    pub fn with_base_url(
        api_key: impl Into<String>,
        prompt_id: impl Into<String>,
        prompt_version: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let api_key = api_key.into();
        let prompt_id = prompt_id.into();
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingConfig("OPENAI_API_KEY"));
        }
        if prompt_id.trim().is_empty() {
            return Err(ServiceError::MissingConfig("OPENAI_PROMPT_ID"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            prompt_id,
            prompt_version: prompt_version.filter(|v| !v.trim().is_empty()),
            organization: None,
        })
    }

    /// Bill requests to `organization` instead of the key's default.
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = organization.filter(|o| !o.trim().is_empty());
        self
    }

    fn request_body(&self, item: &WorkItem) -> serde_json::Value {
        request_body(&self.prompt_id, self.prompt_version.as_deref(), item)
    }
}

/// Request body for `item` against a stored prompt.
pub fn request_body(prompt_id: &str, prompt_version: Option<&str>, item: &WorkItem) -> serde_json::Value {
    let mut prompt = json!({
        "id": prompt_id,
        "variables": {
            "artist_name": item.name,
            "artist_data": item
                .payload
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(NO_PAYLOAD_PLACEHOLDER),
        },
    });
    if let Some(version) = prompt_version.filter(|v| !v.trim().is_empty()) {
        prompt["version"] = json!(version);
    }
    json!({ "prompt": prompt })
}

#[async_trait]
impl CompletionService for OpenAiService {
    async fn complete(&self, item: &WorkItem) -> Result<ServiceReply, ServiceFailure> {
        let url = format!("{}/responses", self.base_url);
        debug!(item_id = %item.id, url = %url, "Sending request");

        let mut request = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key));
        if let Some(organization) = &self.organization {
            request = request.header(ORGANIZATION_HEADER, organization);
        }
        let response = request
            .json(&self.request_body(item))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let headers = response.headers().clone();
        let mut feedback = feedback_from_headers(&headers);
        let body = response.text().await.map_err(|e| {
            transport_failure(e).with_feedback(feedback.clone())
        })?;

        if !status.is_success() {
            return Err(error_failure(status.as_u16(), &headers, &body).with_feedback(feedback));
        }

        let (text, response_id, tokens) = parse_reply(&body)
            .map_err(|message| ServiceFailure::http(status.as_u16(), message).with_feedback(feedback.clone()))?;
        feedback.tokens_consumed = tokens;

        Ok(ServiceReply {
            text,
            response_id,
            feedback,
        })
    }
}

fn transport_failure(e: reqwest::Error) -> ServiceFailure {
    let mut failure = if e.is_timeout() {
        ServiceFailure::transport(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ServiceFailure::transport(format!("connection failed: {e}"))
    } else {
        ServiceFailure::transport(e.to_string())
    };
    // A status on a reqwest error means a response did arrive.
    if let Some(status) = e.status() {
        failure.status = Some(status.as_u16());
        failure.transport = false;
    }
    failure
}

fn error_failure(status: u16, headers: &HeaderMap, body: &str) -> ServiceFailure {
    let mut failure = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let message = envelope
                .error
                .message
                .unwrap_or_else(|| "no error message".to_string());
            let mut failure = ServiceFailure::http(status, message);
            // Some responses carry the quota signal in `type` rather than `code`.
            failure.code = envelope.error.code.or(envelope.error.kind);
            failure
        }
        Err(_) => ServiceFailure::http(status, truncate(body, 200)),
    };
    failure.retry_after = retry_after(headers, Utc::now());
    failure
}

/// Text, response id and billed tokens from a success body.
fn parse_reply(body: &str) -> Result<(String, Option<String>, Option<u64>), String> {
    let parsed: ResponseBody = serde_json::from_str(body)
        .map_err(|e| format!("unparsable response body: {e}"))?;

    let text = match parsed.output_text {
        Some(text) => text,
        None => parsed
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join(""),
    };
    if text.trim().is_empty() {
        return Err("response contained no output text".to_string());
    }

    Ok((
        text,
        parsed.id,
        parsed.usage.and_then(|usage| usage.total_tokens),
    ))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
