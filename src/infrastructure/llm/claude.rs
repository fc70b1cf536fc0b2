//! Premium reviewer adapter: Anthropic's Messages API, grounded on
//! `claude_reviewer.py`'s Claude-as-second-opinion role in the cheap-then-premium chain.

use crate::domain::ports::{ReviewPrompt, SignalReviewer};
use crate::domain::review::ReviewResponse;
use crate::infrastructure::llm::deepseek::parse_review_response;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SYSTEM_PROMPT: &str =
    "You are a professional crypto derivatives position and signal reviewer. Review the \
     supplied context and respond with a single JSON object: \
     {\"approved\": bool, \"confidence\": number 0-1, \"side\": \"long\"|\"short\", \"reasoning\": string}. \
     Respond with JSON only, no commentary.";

pub struct ClaudeReviewer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ClaudeReviewer {
    pub fn new(api_key: String, base_url: String, model: String, timeout_sec: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, api_key, base_url, model }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[async_trait]
impl SignalReviewer for ClaudeReviewer {
    async fn review(&self, prompt: ReviewPrompt) -> Result<ReviewResponse> {
        if self.api_key.is_empty() {
            anyhow::bail!("claude reviewer not configured");
        }

        let body = json!({
            "model": self.model,
            "max_tokens": 500,
            "system": SYSTEM_PROMPT,
            "messages": [
                { "role": "user", "content": format!("kind={:?}\n{}", prompt.kind, prompt.body) },
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("claude request failed")?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("claude returned an error: {text}");
        }

        let parsed: MessagesResponse = response.json().await.context("failed to parse claude response")?;
        let content = parsed.content.into_iter().next().context("claude returned no content blocks")?.text;

        parse_review_response(&content)
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}
