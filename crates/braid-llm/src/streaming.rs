use std::collections::VecDeque;
use std::pin::Pin;

use anyhow::Result;
use futures::{Stream, StreamExt};
use reqwest::Response;
use serde::{Deserialize, Serialize};

use braid_types::{StreamEvent, TokenUsage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamChunk {
    pub id: String,
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            response_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

impl ChatStreamChunk {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
    }
}

/// Parse a chat-completions SSE response into stream events.
///
/// The final `Done` event carries usage when the request asked for it
/// (`stream_options.include_usage`); the provider reports it in a trailing
/// chunk with no choices.
pub fn parse_chat_sse_stream(
    response: Response,
) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> {
    let stream = response.bytes_stream();

    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(stream);
        let mut buffer = VecDeque::with_capacity(8192);
        let mut finish_reason: Option<String> = None;
        let mut usage: Option<TokenUsage> = None;
        let mut done_emitted = false;

        'outer: while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend(bytes);

                    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();

                        let Ok(line_str) = std::str::from_utf8(&line_bytes) else {
                            continue;
                        };
                        let line = line_str.trim();
                        if line.is_empty() {
                            continue;
                        }

                        if let Some(data) = line.strip_prefix("data: ") {
                            if data == "[DONE]" {
                                if !done_emitted {
                                    yield Ok(StreamEvent::Done {
                                        finish_reason: finish_reason.take(),
                                        usage: usage.take(),
                                    });
                                    done_emitted = true;
                                }
                                break 'outer;
                            }

                            match serde_json::from_str::<ChatStreamChunk>(data) {
                                Ok(chunk) => {
                                    if let Some(content) = chunk.content() {
                                        if !content.is_empty() {
                                            yield Ok(StreamEvent::Token {
                                                content: content.to_string(),
                                            });
                                        }
                                    }
                                    if let Some(reason) = chunk.finish_reason() {
                                        finish_reason = Some(reason.to_string());
                                    }
                                    if let Some(wire) = chunk.usage {
                                        usage = Some(wire.into());
                                    }
                                }
                                Err(e) => {
                                    yield Err(anyhow::anyhow!("failed to parse chat chunk: {}", e));
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(anyhow::anyhow!("stream error: {}", e));
                    return;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                finish_reason,
                usage,
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_content_extraction() {
        let chunk: ChatStreamChunk = serde_json::from_str(
            r#"{"id":"c1","model":"gpt-4o","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}],"usage":null}"#,
        )
        .unwrap();
        assert_eq!(chunk.content(), Some("Hi"));
        assert_eq!(chunk.finish_reason(), None);
    }

    #[test]
    fn test_usage_chunk_has_no_choices() {
        let chunk: ChatStreamChunk = serde_json::from_str(
            r#"{"id":"c1","model":"gpt-4o","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        )
        .unwrap();
        assert!(chunk.content().is_none());
        let usage: TokenUsage = chunk.usage.unwrap().into();
        assert_eq!(usage.response_tokens, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
