//! Cheap reviewer adapter: an OpenAI-compatible chat-completions endpoint (DeepSeek),
//! grounded on `position_reviewer.py::_deepseek_review`.

use crate::domain::ports::{ReviewPrompt, SignalReviewer};
use crate::domain::review::ReviewResponse;
use crate::domain::signals::Side;
use crate::infrastructure::llm::extract_json;
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

pub struct DeepSeekReviewer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl DeepSeekReviewer {
    pub fn new(api_key: String, base_url: String, model: String, timeout_sec: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, api_key, base_url, model }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl SignalReviewer for DeepSeekReviewer {
    async fn review(&self, prompt: ReviewPrompt) -> Result<ReviewResponse> {
        if self.api_key.is_empty() {
            anyhow::bail!("deepseek reviewer not configured");
        }

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": format!("kind={:?}\n{}", prompt.kind, prompt.body) },
            ],
            "temperature": 0.2,
            "max_tokens": 500,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("deepseek request failed")?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("deepseek returned an error: {text}");
        }

        let completion: ChatCompletion = response.json().await.context("failed to parse deepseek response")?;
        let content = completion.choices.into_iter().next().context("deepseek returned no choices")?.message.content;

        parse_review_response(&content)
    }

    fn name(&self) -> &'static str {
        "deepseek"
    }
}

pub(crate) fn parse_review_response(content: &str) -> Result<ReviewResponse> {
    let value = extract_json(content).context("could not extract JSON from reviewer response")?;

    let approved = value.get("approved").and_then(|v| v.as_bool()).unwrap_or(false);
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let reasoning = value.get("reasoning").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let side = match value.get("side").and_then(|v| v.as_str()).unwrap_or("").to_lowercase().as_str() {
        "long" => Side::Long,
        "short" => Side::Short,
        other => anyhow::bail!("reviewer returned unrecognized side: {other}"),
    };

    Ok(ReviewResponse { approved, confidence, side, reasoning })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_response() {
        let resp = parse_review_response(r#"{"approved": true, "confidence": 0.82, "side": "long", "reasoning": "ok"}"#).unwrap();
        assert!(resp.approved);
        assert_eq!(resp.side, Side::Long);
        assert_eq!(resp.confidence, 0.82);
    }

    #[test]
    fn parses_fenced_response() {
        let content = "```json\n{\"approved\": false, \"confidence\": 0.3, \"side\": \"short\", \"reasoning\": \"weak\"}\n```";
        let resp = parse_review_response(content).unwrap();
        assert!(!resp.approved);
        assert_eq!(resp.side, Side::Short);
    }

    #[test]
    fn rejects_unrecognized_side() {
        let err = parse_review_response(r#"{"approved": true, "confidence": 0.5, "side": "sideways", "reasoning": "x"}"#);
        assert!(err.is_err());
    }
}
