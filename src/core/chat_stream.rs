//! Streaming chat completions over server-sent events.
//!
//! The HTTP exchange runs in a spawned task that forwards parsed deltas over an
//! unbounded channel. The request reads the response as fast as the server
//! sends it, and deltas queue in the channel until the receiving
//! [`ContentSource`] consumes them. The request is sent as soon as the source
//! is created.

use futures_util::stream::{self, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatRequest, ChatResponse};
use crate::core::error::ConversationError;
use crate::core::stream::{Content, ContentSource};
use crate::utils::url::construct_api_url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(payload: &str, tx: &mpsc::UnboundedSender<StreamMessage>) -> bool {
    if payload == "[DONE]" {
        let _ = tx.send(StreamMessage::End);
        return true;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            if let Some(content) = response
                .choices
                .first()
                .and_then(|choice| choice.delta.content.as_ref())
            {
                let _ = tx.send(StreamMessage::Chunk(content.clone()));
            }
            false
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return false;
            }
            let _ = tx.send(StreamMessage::Error(format_api_error(payload)));
            let _ = tx.send(StreamMessage::End);
            true
        }
    }
}

/// Handle one SSE line. Returns `true` once the stream is over.
fn process_sse_line(line: &str, tx: &mpsc::UnboundedSender<StreamMessage>) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx))
        .unwrap_or(false)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });
    summary.map(|text| collapse_whitespace(&text))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reduce an error body to a single operator-facing line.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "API Error: <empty>".to_string();
    }
    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
            return format!("API Error: {summary}");
        }
        return format!("API Error: {json_value}");
    }
    format!("API Error: {}", collapse_whitespace(trimmed))
}

pub struct StreamParams {
    pub client: reqwest::Client,
    pub base_url: String,
    pub api_key: String,
    pub provider_name: String,
    pub request: ChatRequest,
    pub cancel_token: CancellationToken,
}

/// Start the request and return the lazily consumed response deltas.
pub fn spawn_chat_stream(params: StreamParams) -> ContentSource {
    let (tx, rx) = mpsc::unbounded_channel();
    let provider = params.provider_name.clone();
    tokio::spawn(run_request(params, tx));
    receiver_source(rx, provider)
}

async fn run_request(params: StreamParams, tx: mpsc::UnboundedSender<StreamMessage>) {
    let StreamParams {
        client,
        base_url,
        api_key,
        provider_name: _,
        request,
        cancel_token,
    } = params;

    tokio::select! {
        _ = async {
            let chat_url = construct_api_url(&base_url, "chat/completions");
            let response = match client
                .post(chat_url)
                .header("Content-Type", "application/json")
                .bearer_auth(&api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(StreamMessage::Error(format_api_error(&e.to_string())));
                    let _ = tx.send(StreamMessage::End);
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<no body>".to_string());
                let message = format!("{} ({status})", format_api_error(&error_text));
                let _ = tx.send(StreamMessage::Error(message));
                let _ = tx.send(StreamMessage::End);
                return;
            }

            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk_bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamMessage::Error(format_api_error(&e.to_string())));
                        let _ = tx.send(StreamMessage::End);
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk_bytes);

                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                    let should_end = match std::str::from_utf8(&buffer[..newline_pos]) {
                        Ok(line) => process_sse_line(line.trim(), &tx),
                        Err(e) => {
                            tracing::warn!("Invalid UTF-8 in stream: {e}");
                            false
                        }
                    };
                    buffer.drain(..=newline_pos);
                    if should_end {
                        return;
                    }
                }
            }
            let _ = tx.send(StreamMessage::End);
        } => {}
        _ = cancel_token.cancelled() => {}
    }
}

/// Adapt the channel of parsed messages into content items.
fn receiver_source(rx: mpsc::UnboundedReceiver<StreamMessage>, provider: String) -> ContentSource {
    stream::unfold((rx, provider), |(mut rx, provider)| async move {
        match rx.recv().await? {
            StreamMessage::Chunk(text) => Some((Ok(Content::Text(text)), (rx, provider))),
            StreamMessage::Error(message) => {
                let err = ConversationError::provider(&provider, message);
                Some((Err(err), (rx, provider)))
            }
            StreamMessage::End => None,
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::Stream;

    #[test]
    fn process_sse_line_handles_spacing_variants() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let variants = [
            (r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#, "Hello", "data: [DONE]"),
            (r#"data:{"choices":[{"delta":{"content":"World"}}]}"#, "World", "data:[DONE]"),
        ];
        for (chunk_line, expected, done_line) in variants {
            assert!(!process_sse_line(chunk_line, &tx));
            assert_eq!(rx.try_recv().unwrap(), StreamMessage::Chunk(expected.into()));
            assert!(process_sse_line(done_line, &tx));
            assert_eq!(rx.try_recv().unwrap(), StreamMessage::End);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn comments_and_role_only_deltas_are_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!process_sse_line(": keep-alive", &tx));
        assert!(!process_sse_line(
            r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#,
            &tx
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stream_errors_end_the_stream() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(process_sse_line(
            r#"data: {"error":{"message":"internal server error"}}"#,
            &tx
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamMessage::Error("API Error: internal server error".into())
        );
        assert_eq!(rx.try_recv().unwrap(), StreamMessage::End);
    }

    #[test]
    fn api_errors_fit_on_one_line() {
        assert_eq!(
            format_api_error(r#"{"error":{"message":"model\n  overloaded","type":"x"}}"#),
            "API Error: model overloaded"
        );
        assert_eq!(
            format_api_error(r#"{"status":"failed"}"#),
            r#"API Error: {"status":"failed"}"#
        );
        assert_eq!(format_api_error("<error>\nbad</error>"), "API Error: <error> bad</error>");
        assert_eq!(format_api_error("  "), "API Error: <empty>");
    }

    #[tokio::test]
    async fn channel_messages_become_stream_items() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamMessage::Chunk("Hel".into())).unwrap();
        tx.send(StreamMessage::Chunk("lo".into())).unwrap();
        tx.send(StreamMessage::End).unwrap();
        let stream = Stream::new(receiver_source(rx, "openai".into()));
        assert_eq!(
            stream.collect().await.unwrap(),
            vec![Content::text("Hel"), Content::text("lo")]
        );
    }

    #[tokio::test]
    async fn channel_errors_surface_as_provider_errors() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(StreamMessage::Chunk("partial".into())).unwrap();
        tx.send(StreamMessage::Error("API Error: quota".into())).unwrap();
        let stream = Stream::new(receiver_source(rx, "openai".into()));
        let err = stream.collect().await.unwrap_err();
        assert_eq!(err.to_string(), "openai: API Error: quota");
        assert_eq!(stream.snapshot(), vec![Content::text("partial")]);
    }
}
