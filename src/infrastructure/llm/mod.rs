//! HTTP `SignalReviewer` adapters: a cheap chat-completions-style model and a premium
//! messages-API model, both JSON-only, grounded on `position_reviewer.py`'s
//! `_deepseek_review`/`_parse_json_response` pair. `application::review::llm::FallbackReviewer`
//! composes one of each.

pub mod claude;
pub mod deepseek;

pub use claude::ClaudeReviewer;
pub use deepseek::DeepSeekReviewer;

/// Pulls a JSON object out of an LLM completion that may be a bare object, fenced in a
/// ```json code block, or preceded/followed by stray prose. Mirrors
/// `position_reviewer.py::_parse_json_response`'s three-tier fallback.
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str(content) {
        return Some(v);
    }

    if let Some(fenced) = extract_fenced_block(content)
        && let Ok(v) = serde_json::from_str(&fenced)
    {
        return Some(v);
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&content[start..=end]).ok()
}

fn extract_fenced_block(content: &str) -> Option<String> {
    let start_marker = content.find("```")?;
    let after_marker = &content[start_marker + 3..];
    let after_lang = after_marker.strip_prefix("json").unwrap_or(after_marker);
    let body_start = after_lang.trim_start_matches(['\r', '\n']);
    let end = body_start.find("```")?;
    Some(body_start[..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_json() {
        let v = extract_json(r#"{"approved": true, "confidence": 0.9}"#).unwrap();
        assert_eq!(v["approved"], true);
    }

    #[test]
    fn extracts_fenced_json() {
        let content = "Here is my review:\n```json\n{\"approved\": false, \"confidence\": 0.4}\n```\nThanks.";
        let v = extract_json(content).unwrap();
        assert_eq!(v["approved"], false);
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let content = "Sure, my answer is {\"approved\": true, \"confidence\": 0.75} and that's final.";
        let v = extract_json(content).unwrap();
        assert_eq!(v["confidence"], 0.75);
    }

    #[test]
    fn returns_none_for_unparseable_content() {
        assert!(extract_json("no json here at all").is_none());
    }
}
