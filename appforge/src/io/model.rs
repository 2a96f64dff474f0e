//! Language-model inference contract and an OpenAI-compatible client.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::core::error::{RunError, looks_throttled};
use crate::core::message::{Message, ToolCallRequest};
use crate::io::config::ModelConfig;

const BODY_PREVIEW_BYTES: usize = 2_000;

/// Tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

/// Final text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("throttled (HTTP {status}): {message}")]
    Throttled { status: u16, message: String },
    #[error("{detail}")]
    Malformed { detail: String, body: String },
    #[error("{0}")]
    Request(String),
}

impl From<ModelError> for RunError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Throttled { .. } => RunError::Throttled(err.to_string()),
            ModelError::Malformed { detail, body } => RunError::MalformedResponse { detail, body },
            ModelError::Request(message) if looks_throttled(&message) => {
                RunError::Throttled(message)
            }
            ModelError::Request(message) => RunError::Model(message),
        }
    }
}

pub trait ModelClient: Send + Sync {
    fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ModelError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(cfg: &ModelConfig, api_key: String) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build();
        Self {
            agent,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            model: cfg.model.clone(),
            api_key,
            max_tokens: cfg.max_tokens,
        }
    }

    /// Read the key from the environment variable named in the config.
    pub fn from_env(cfg: &ModelConfig) -> anyhow::Result<Self> {
        let key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("environment variable {} is not set", cfg.api_key_env))?;
        Ok(Self::new(cfg, key))
    }

    fn request_body(&self, request: &ModelRequest<'_>) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(request.messages.iter().map(wire_message));
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
            "tools": tools,
        })
    }
}

impl ModelClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    fn complete(&self, request: &ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.request_body(request);
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body);

        let raw = match result {
            Ok(response) => response
                .into_string()
                .map_err(|err| ModelError::Request(format!("read response body: {err}")))?,
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(status_error(status, text));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(ModelError::Request(transport.to_string()));
            }
        };

        debug!(bytes = raw.len(), "model response received");
        parse_completion(&raw)
    }
}

/// Classify a non-2xx reply. Throttling wins over body shape; a body that is
/// not JSON (a gateway error page) is `Malformed` and logged in full.
fn status_error(status: u16, text: String) -> ModelError {
    if status == 429 || looks_throttled(&text) {
        warn!(status, "model provider throttled the request");
        return ModelError::Throttled {
            status,
            message: preview(&text).to_string(),
        };
    }
    if serde_json::from_str::<Value>(&text).is_err() {
        let detail = format!("HTTP {status}: body is not JSON");
        error!(detail = %detail, body = %preview(&text), "malformed model response");
        return ModelError::Malformed { detail, body: text };
    }
    ModelError::Request(format!("HTTP {status}: {}", preview(&text)))
}

fn wire_message(message: &Message) -> Value {
    match message {
        Message::User { content } => json!({ "role": "user", "content": content }),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut value = json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                value["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            value
        }
        Message::Tool {
            call_id, content, ..
        } => json!({ "role": "tool", "tool_call_id": call_id, "content": content }),
    }
}

/// Parse a chat-completions body.
///
/// Anything that is not the expected JSON shape is `Malformed`, and the raw
/// body is logged before returning.
pub fn parse_completion(raw: &str) -> Result<ModelResponse, ModelError> {
    let malformed = |detail: String| {
        error!(detail = %detail, body = %preview(raw), "malformed model response");
        ModelError::Malformed {
            detail,
            body: raw.to_string(),
        }
    };

    let value: Value = serde_json::from_str(raw).map_err(|err| malformed(err.to_string()))?;
    let message = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| malformed("response has no choices[0].message".to_string()))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (index, call) in calls.iter().enumerate() {
            let function = call
                .get("function")
                .ok_or_else(|| malformed(format!("tool_calls[{index}] has no function")))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed(format!("tool_calls[{index}] has no name")))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(encoded)) => serde_json::from_str(encoded)
                    .unwrap_or_else(|_| Value::String(encoded.clone())),
                Some(other) => other.clone(),
                None => Value::Object(Default::default()),
            };
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map_or_else(|| format!("call_{index}"), str::to_string);
            tool_calls.push(ToolCallRequest {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(ModelResponse { text, tool_calls })
}

fn preview(text: &str) -> &str {
    if text.len() <= BODY_PREVIEW_BYTES {
        return text;
    }
    let mut end = BODY_PREVIEW_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_tool_calls() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_a","type":"function",
            "function":{"name":"run_command","arguments":"{\"command\":\"ls\"}"}}]}}]}"#;
        let response = parse_completion(raw).expect("parse");
        assert_eq!(response.text, None);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].arguments, json!({"command": "ls"}));
    }

    #[test]
    fn unparseable_arguments_are_kept_as_string() {
        let raw = r#"{"choices":[{"message":{"content":"x",
            "tool_calls":[{"function":{"name":"read_files","arguments":"not json"}}]}}]}"#;
        let response = parse_completion(raw).expect("parse");
        assert_eq!(response.tool_calls[0].id, "call_0");
        assert_eq!(response.tool_calls[0].arguments, json!("not json"));
    }

    #[test]
    fn html_body_is_malformed_and_keeps_body() {
        let raw = "<html><body>502 Bad Gateway</body></html>";
        match parse_completion(raw) {
            Err(ModelError::Malformed { body, .. }) => assert_eq!(body, raw),
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn empty_choices_is_malformed() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(ModelError::Malformed { .. })
        ));
    }

    #[test]
    fn error_classes_map_to_run_errors() {
        let throttled: RunError = ModelError::Throttled {
            status: 429,
            message: "slow down".into(),
        }
        .into();
        assert!(throttled.is_transient());

        let pattern: RunError = ModelError::Request("Rate limit reached".into()).into();
        assert!(pattern.is_transient());

        let malformed: RunError = ModelError::Malformed {
            detail: "expected value at line 1 column 1".into(),
            body: "<html>".into(),
        }
        .into();
        assert!(!malformed.is_transient());
        assert!(malformed.to_string().contains("failed to parse model response"));

        let other: RunError = ModelError::Request("connection reset".into()).into();
        assert!(!other.is_transient());
    }

    /// Serve one canned HTTP response on a loopback port after reading the request.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).expect("read header") == 0 || line == "\r\n" {
                    break;
                }
                if let Some((name, value)) = line.split_once(':')
                    && name.eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).expect("read body");
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).expect("write");
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: String) -> OpenAiClient {
        let cfg = ModelConfig {
            base_url,
            timeout_secs: 5,
            ..ModelConfig::default()
        };
        OpenAiClient::new(&cfg, "key".into())
    }

    fn empty_request() -> ModelRequest<'static> {
        ModelRequest {
            system: "be helpful",
            messages: &[],
            tools: &[],
        }
    }

    #[test]
    fn gateway_html_error_page_is_malformed() {
        let page = "<html><body><h1>502 Bad Gateway</h1></body></html>";
        let client = client_for(serve_once("502 Bad Gateway", page));
        let err = client.complete(&empty_request()).expect_err("502");
        match &err {
            ModelError::Malformed { detail, body } => {
                assert!(detail.contains("HTTP 502"), "{detail}");
                assert_eq!(body, page);
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        let run: RunError = err.into();
        assert!(matches!(run, RunError::MalformedResponse { .. }));
        assert!(!run.is_transient());
    }

    #[test]
    fn status_errors_keep_throttling_first() {
        assert!(matches!(
            status_error(429, "<html>Too Many Requests</html>".into()),
            ModelError::Throttled { status: 429, .. }
        ));
        assert!(matches!(
            status_error(500, r#"{"error":{"message":"internal"}}"#.into()),
            ModelError::Request(_)
        ));
        assert!(matches!(
            status_error(503, "Service Unavailable".into()),
            ModelError::Malformed { .. }
        ));
    }

    #[test]
    fn request_body_puts_system_first_and_encodes_arguments() {
        let client = OpenAiClient::new(&ModelConfig::default(), "key".into());
        let messages = vec![
            Message::user("build a counter app"),
            Message::Assistant {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "c1".into(),
                    name: "run_command".into(),
                    arguments: json!({"command": "ls"}),
                }],
            },
            Message::Tool {
                call_id: "c1".into(),
                name: "run_command".into(),
                content: "ok".into(),
            },
        ];
        let body = client.request_body(&ModelRequest {
            system: "be helpful",
            messages: &messages,
            tools: &[],
        });
        let wire = body["messages"].as_array().expect("messages");
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], r#"{"command":"ls"}"#);
        assert_eq!(wire[3]["tool_call_id"], "c1");
    }
}
