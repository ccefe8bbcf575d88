//! Streaming bridge to the upstream chat-completions endpoint.
//!
//! Without an API key the relay degrades to a single informational chunk so
//! the service stays usable in local development.

use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Emitted as the whole reply when no model API key is configured.
pub const NO_KEY_NOTICE: &str =
    "Assistant starter is running. Set OPENROUTER_API_KEY to enable model responses.";

/// Prepended to every upstream conversation.
pub const SYSTEM_PROMPT: &str = "You are the starter assistant. Be concise and practical.";

/// One message in a conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelRelayError {
    #[error("model request failed: {message}")]
    Request { message: String },
    #[error("model responded with http {status}: {body}")]
    Http { status: u16, body: String },
}

/// Relays a conversation to the configured model and yields text deltas.
pub struct ModelRelay {
    api_key: Option<String>,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl ModelRelay {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.model_api_key.clone(),
            base_url: config.model_base_url.clone(),
            model: config.model_name.clone(),
            http: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Streams the assistant reply for `turns` as plain-text chunks.
    ///
    /// Upstream failures arrive as `Err` items on the stream rather than up
    /// front, so callers can forward whatever text was produced before the
    /// failure.
    pub fn reply_stream(
        &self,
        turns: &[ChatTurn],
    ) -> BoxStream<'static, Result<String, ModelRelayError>> {
        let Some(api_key) = self.api_key.clone() else {
            return stream::iter(vec![Ok(NO_KEY_NOTICE.to_string())]).boxed();
        };

        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&completion_request(&self.model, turns));

        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(async move {
            if let Err(error) = pump_completion_stream(request, &tx).await {
                let _ = tx.unbounded_send(Err(error));
            }
        });
        rx.boxed()
    }
}

fn completion_request(model: &str, turns: &[ChatTurn]) -> serde_json::Value {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(serde_json::json!({"role": "system", "content": SYSTEM_PROMPT}));
    for turn in turns {
        messages.push(serde_json::json!({"role": turn.role, "content": turn.content}));
    }
    serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": true,
    })
}

async fn pump_completion_stream(
    request: reqwest::RequestBuilder,
    tx: &mpsc::UnboundedSender<Result<String, ModelRelayError>>,
) -> Result<(), ModelRelayError> {
    let response = request
        .send()
        .await
        .map_err(|error| ModelRelayError::Request {
            message: error.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let body = if body.trim().is_empty() {
            "<empty>".to_string()
        } else {
            body
        };
        return Err(ModelRelayError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let mut body = response.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|error| ModelRelayError::Request {
            message: error.to_string(),
        })?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(boundary) = buffer.find('\n') {
            let line: String = buffer.drain(..=boundary).collect();
            match parse_sse_line(line.trim_end_matches(['\n', '\r'])) {
                SseLine::Delta(delta) => {
                    if tx.unbounded_send(Ok(delta)).is_err() {
                        return Ok(());
                    }
                }
                SseLine::Done => return Ok(()),
                SseLine::Skip => {}
            }
        }
    }
    Ok(())
}

enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Extracts the text delta from one server-sent-events line.
fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseLine::Skip;
    };
    match value
        .pointer("/choices/0/delta/content")
        .and_then(serde_json::Value::as_str)
    {
        Some(content) if !content.is_empty() => SseLine::Delta(content.to_string()),
        _ => SseLine::Skip,
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn relay_without_key() -> ModelRelay {
        ModelRelay::from_config(&Config::for_tests())
    }

    #[tokio::test]
    async fn missing_key_yields_the_notice_and_ends() {
        let relay = relay_without_key();
        let chunks: Vec<_> = relay.reply_stream(&[ChatTurn::user("hi")]).collect().await;

        assert_eq!(chunks.len(), 1);
        let text = chunks[0].as_ref().expect("notice chunk");
        assert_eq!(text, NO_KEY_NOTICE);
    }

    #[test]
    fn completion_request_prepends_the_system_prompt() {
        let turns = vec![ChatTurn::user("hello"), ChatTurn::assistant("hi there")];
        let request = completion_request("test-model", &turns);

        assert_eq!(request["model"], "test-model");
        assert_eq!(request["stream"], true);
        assert_eq!(request["messages"][0]["role"], "system");
        assert_eq!(request["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(request["messages"][1]["role"], "user");
        assert_eq!(request["messages"][2]["content"], "hi there");
    }

    #[test]
    fn sse_delta_lines_surface_their_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert!(matches!(
            parse_sse_line(line),
            SseLine::Delta(content) if content == "Hello"
        ));
    }

    #[test]
    fn sse_terminator_ends_the_stream() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
    }

    #[test]
    fn non_data_and_empty_delta_lines_are_skipped() {
        assert!(matches!(parse_sse_line(""), SseLine::Skip));
        assert!(matches!(parse_sse_line(": keep-alive"), SseLine::Skip));
        assert!(matches!(
            parse_sse_line("event: message"),
            SseLine::Skip
        ));
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#),
            SseLine::Skip
        ));
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            SseLine::Skip
        ));
    }
}
