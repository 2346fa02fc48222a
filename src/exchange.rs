use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Text used when the service answers with a shape we don't recognize
pub const UNEXPECTED_FORMAT_MESSAGE: &str = "Sorry, I received an unexpected response format.";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Any failure to obtain a usable reply.
///
/// Callers recover the same way regardless of variant; the variants exist for logs.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("could not reach the answering service: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("answering service returned HTTP {status}")]
    Status { status: u16, body_excerpt: String },
    #[error("answering service returned a malformed body: {0}")]
    Malformed(String),
    #[error("could not build HTTP client: {0}")]
    Client(String),
}

/// The client's single internal reply shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedReply {
    pub text: String,
    pub sources: Vec<String>,
    pub escalation_link: Option<String>,
}

impl NormalizedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
            escalation_link: None,
        }
    }
}

/// Reply shapes the answering service is known to produce
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    /// `{ "answer", "sources"?, "escalation_link"? }`
    Answer {
        answer: String,
        sources: Vec<String>,
        escalation_link: Option<String>,
    },
    /// `{ "response" }`
    Legacy { response: String },
    /// Neither field present
    Unrecognized,
}

impl RemoteReply {
    /// Classify a JSON body. The newer `answer` shape wins over the legacy `response` one.
    pub fn from_value(value: &Value) -> Self {
        if let Some(answer) = value.get("answer").and_then(Value::as_str) {
            return RemoteReply::Answer {
                answer: answer.to_string(),
                sources: value.get("sources").map(parse_sources).unwrap_or_default(),
                escalation_link: value
                    .get("escalation_link")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            };
        }
        if let Some(response) = value.get("response").and_then(Value::as_str) {
            return RemoteReply::Legacy {
                response: response.to_string(),
            };
        }
        RemoteReply::Unrecognized
    }

    pub fn normalize(self) -> NormalizedReply {
        match self {
            RemoteReply::Answer {
                answer,
                sources,
                escalation_link,
            } => NormalizedReply {
                text: answer,
                sources,
                escalation_link,
            },
            RemoteReply::Legacy { response } => NormalizedReply::text(response),
            RemoteReply::Unrecognized => NormalizedReply::text(UNEXPECTED_FORMAT_MESSAGE),
        }
    }
}

/// Sources arrive either as strings or as `{ "title", "url" }` objects
fn parse_sources(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => {
                let title = obj.get("title").and_then(Value::as_str);
                let url = obj.get("url").and_then(Value::as_str);
                match (title, url) {
                    (Some(t), Some(u)) => Some(format!("[{}]({})", t, u)),
                    (Some(t), None) => Some(t.to_string()),
                    (None, Some(u)) => Some(u.to_string()),
                    (None, None) => None,
                }
            }
            _ => None,
        })
        .collect()
}

/// Parse a raw response body into a normalized reply
pub fn normalize_body(body: &[u8]) -> Result<NormalizedReply, ExchangeError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ExchangeError::Malformed(e.to_string()))?;
    let reply = RemoteReply::from_value(&value);
    if reply == RemoteReply::Unrecognized {
        tracing::warn!("unrecognized reply shape: {}", excerpt(body));
    }
    Ok(reply.normalize())
}

/// Health information reported by `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_loaded: Option<u64>,
}

/// Sends one query and returns one reply. No history is transmitted.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn send(&self, query: &str) -> Result<NormalizedReply, ExchangeError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
}

/// Exchange over HTTP against the answering service
#[derive(Debug, Clone)]
pub struct HttpExchange {
    base_url: String,
    timeout: Duration,
    client: Client,
}

impl HttpExchange {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| ExchangeError::Client(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(&self, e: reqwest::Error) -> ExchangeError {
        if e.is_timeout() {
            ExchangeError::Timeout(self.timeout)
        } else if e.is_decode() {
            ExchangeError::Malformed(e.to_string())
        } else {
            ExchangeError::Network(e.to_string())
        }
    }

    /// Probe the service's health endpoint
    pub async fn health(&self) -> Result<HealthReport, ExchangeError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body_excerpt: excerpt(&body),
            });
        }

        let value: Value =
            serde_json::from_slice(&body).map_err(|e| ExchangeError::Malformed(e.to_string()))?;
        Ok(HealthReport {
            status: value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            documents_loaded: value
                .get("knowledge_base")
                .and_then(|kb| kb.get("documents_loaded"))
                .and_then(Value::as_u64),
        })
    }
}

#[async_trait]
impl Exchange for HttpExchange {
    async fn send(&self, query: &str) -> Result<NormalizedReply, ExchangeError> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(url = %url, query_len = query.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&ChatRequest { query })
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        tracing::debug!(status = %status, bytes = body.len(), "chat response received");

        if !status.is_success() {
            let err = ExchangeError::Status {
                status: status.as_u16(),
                body_excerpt: excerpt(&body),
            };
            tracing::error!("chat request failed: {} body_excerpt={:?}", err, excerpt(&body));
            return Err(err);
        }

        normalize_body(&body)
    }
}

/// First few hundred chars of a body, for logs
fn excerpt(body: &[u8]) -> String {
    const MAX_CHARS: usize = 200;
    let raw = String::from_utf8_lossy(body);
    let mut out: String = raw.chars().take(MAX_CHARS).collect();
    if raw.chars().count() > MAX_CHARS {
        out.push_str("...");
    }
    out
}
