//! Request, response, and stream event models shared by every transport.

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientError;

/// A transport-agnostic API request.
///
/// `path` is joined onto the transport's base URL; absolute URLs are used as-is.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    /// Set the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful (2xx) response with its full body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Classification of a failed stream or request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// One record could not be decoded. The stream continues.
    Decode,
    Timeout,
    Unauthorized,
    /// 5xx from the server.
    Server,
    /// Network failure or any other error.
    Other,
}

impl FailureKind {
    /// Whether a failure of this kind ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FailureKind::Decode)
    }
}

/// One event decoded from a record stream.
///
/// Every stream delivers zero or more `Unit` and decode `Failure` events
/// followed by exactly one terminal event: `Completion` or a terminal `Failure`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoded record, passed through unchanged.
    Unit(Value),

    /// The stream settled successfully.
    Completion,

    Failure {
        kind: FailureKind,
        message: String,
        /// The offending line, for decode failures.
        raw_line: Option<String>,
    },
}

impl StreamEvent {
    /// Build the terminal failure for a settled transport error.
    pub fn from_error(error: &ClientError) -> Self {
        StreamEvent::Failure {
            kind: error.failure_kind(),
            message: error.user_message(),
            raw_line: None,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Unit(_) => false,
            StreamEvent::Completion => true,
            StreamEvent::Failure { kind, .. } => kind.is_terminal(),
        }
    }

    /// The `type` field of a unit payload, if any.
    pub fn record_type(&self) -> Option<&str> {
        match self {
            StreamEvent::Unit(payload) => payload.get("type").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Typed view of a unit payload.
    ///
    /// # Example
    /// ```
    /// use learnlink::model::StreamEvent;
    /// use serde_json::json;
    ///
    /// let event = StreamEvent::Unit(json!({"type": "chapter", "data": {"title": "Intro"}}));
    /// let record = event.record().unwrap();
    /// assert_eq!(record.kind, "chapter");
    /// assert_eq!(record.data["title"], "Intro");
    /// ```
    pub fn record(&self) -> Option<Record> {
        match self {
            StreamEvent::Unit(payload) => Record::deserialize(payload).ok(),
            _ => None,
        }
    }
}

/// The minimum record shape sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: Value,
}

impl Record {
    /// Deserialize the `data` field into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(T::deserialize(&self.data)?)
    }
}
