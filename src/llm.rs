//! Chat-completion client for an Ollama-compatible `/api/chat` endpoint.
//!
//! Supports a single JSON reply (`stream: false`) and newline-delimited
//! partial messages (`stream: true`). Every transport problem is reported as
//! an [`LlmError`]; deciding what to say instead is the responder's job.

use crate::context::TurnRecord;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::{debug, info};

/// Bounded request timeout for model calls
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for model calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("Cannot connect to LLM endpoint: {0}")]
    Connection(String),

    #[error("LLM endpoint returned HTTP {0}")]
    Status(u16),

    #[error("Malformed LLM response: {0}")]
    Decode(String),

    #[error("LLM request failed: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else if e.is_connect() {
            LlmError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            LlmError::Status(status.as_u16())
        } else if e.is_decode() {
            LlmError::Decode(e.to_string())
        } else {
            LlmError::Http(e.to_string())
        }
    }
}

impl From<std::io::Error> for LlmError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::TimedOut {
            LlmError::Timeout
        } else {
            LlmError::Http(e.to_string())
        }
    }
}

/// Sampling options sent with every request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
    pub num_ctx: u32,
    pub num_batch: u32,
    pub num_gpu: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 600,
            num_ctx: 4096,
            num_batch: 512,
            num_gpu: 99,
        }
    }
}

/// Request body for `/api/chat`
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [TurnRecord],
    pub stream: bool,
    pub options: &'a GenerationOptions,
}

/// One reply object; the whole reply when not streaming, one partial otherwise
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: String,
}

impl ChatResponse {
    fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }
}

/// A language model reachable with a message list
pub trait ChatBackend: Send {
    /// Complete the conversation and return the generated text.
    fn chat(&self, messages: &[TurnRecord]) -> Result<String>;

    /// Complete the conversation, handing each token chunk to `on_token` as
    /// it arrives. Returns the concatenated text.
    fn chat_stream(&self, messages: &[TurnRecord], on_token: &mut dyn FnMut(&str))
        -> Result<String>;
}

/// Configuration for the Ollama client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL without trailing slash
    pub url: String,
    pub model: String,
    pub options: GenerationOptions,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "gpt-oss:20b".to_string(),
            options: GenerationOptions::default(),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Blocking Ollama client
pub struct OllamaClient {
    config: LlmConfig,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        info!("LLM endpoint {} (model {})", config.url, config.model);
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.config.url.trim_end_matches('/'))
    }

    fn post(&self, messages: &[TurnRecord], stream: bool) -> Result<reqwest::blocking::Response> {
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            stream,
            options: &self.config.options,
        };
        debug!(
            "POST {} ({} messages, stream={})",
            self.endpoint(),
            messages.len(),
            stream
        );
        let resp = self.client.post(self.endpoint()).json(&body).send()?;
        let status = resp.status();
        debug!("LLM responded: {}", status);
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }
        Ok(resp)
    }
}

impl ChatBackend for OllamaClient {
    fn chat(&self, messages: &[TurnRecord]) -> Result<String> {
        let reply: ChatResponse = self.post(messages, false)?.json()?;
        Ok(reply.content().trim().to_string())
    }

    fn chat_stream(
        &self,
        messages: &[TurnRecord],
        on_token: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let reader = BufReader::new(self.post(messages, true)?);
        let mut full = String::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk = match serde_json::from_str::<ChatResponse>(&line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("Skipping malformed stream line: {}", e);
                    continue;
                }
            };
            let content = chunk.content();
            if !content.is_empty() {
                full.push_str(content);
                on_token(content);
            }
            if chunk.done {
                break;
            }
        }

        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned HTTP response and hand back the raw request.
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(head_end) = find(&request, b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..head_end]).to_lowercase();
                    let len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + len || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn client(url: String) -> OllamaClient {
        OllamaClient::new(LlmConfig {
            url,
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    fn messages() -> Vec<TurnRecord> {
        vec![
            TurnRecord::new(Role::System, "be brief"),
            TurnRecord::new(Role::User, "hello"),
        ]
    }

    #[test]
    fn test_request_serialization() {
        let msgs = messages();
        let options = GenerationOptions::default();
        let req = ChatRequest {
            model: "gpt-oss:20b",
            messages: &msgs,
            stream: false,
            options: &options,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-oss:20b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["options"]["num_predict"], 600);
        assert_eq!(json["options"]["num_ctx"], 4096);
    }

    #[test]
    fn test_response_deserialization() {
        let r: ChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":"Hi"},"done":true}"#)
                .unwrap();
        assert_eq!(r.content(), "Hi");
        assert!(r.done);

        let r: ChatResponse = serde_json::from_str(r#"{"done":false}"#).unwrap();
        assert_eq!(r.content(), "");
    }

    #[test]
    fn test_chat_round_trip() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"message":{"role":"assistant","content":"  [ANSWER] Hello.  "},"done":true}"#,
        );
        let reply = client(url).chat(&messages()).unwrap();
        assert_eq!(reply, "[ANSWER] Hello.");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.contains(r#""stream":false"#));
    }

    #[test]
    fn test_chat_stream() {
        let body = concat!(
            r#"{"message":{"content":"Hello"},"done":false}"#,
            "\n",
            "not json\n",
            r#"{"message":{"content":" there."},"done":false}"#,
            "\n",
            r#"{"message":{"content":""},"done":true}"#,
            "\n"
        );
        let (url, server) = serve_once("200 OK", body);
        let mut tokens = Vec::new();
        let full = client(url)
            .chat_stream(&messages(), &mut |t| tokens.push(t.to_string()))
            .unwrap();
        assert_eq!(full, "Hello there.");
        assert_eq!(tokens, vec!["Hello", " there."]);
        assert!(server.join().unwrap().contains(r#""stream":true"#));
    }

    #[test]
    fn test_non_success_status() {
        let (url, server) = serve_once("500 Internal Server Error", "{}");
        let err = client(url).chat(&messages()).unwrap_err();
        assert!(matches!(err, LlmError::Status(500)));
        server.join().unwrap();
    }

    #[test]
    fn test_connection_refused() {
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = client(format!("http://127.0.0.1:{}", port))
            .chat(&messages())
            .unwrap_err();
        assert!(matches!(err, LlmError::Connection(_)), "got {:?}", err);
    }
}
