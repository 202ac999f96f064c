//! Observe relation vocabulary: servers, requests and responses.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::path::LwM2mPath;
use crate::value::Value;

/// An LWM2M server the client is registered to.
///
/// Only `id` takes part in relation identity; `uri` is carried for logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LwM2mServer {
    /// Internal server id (not the LWM2M short server id).
    pub id: u64,
    /// Server URI, informational.
    pub uri: String,
}

impl LwM2mServer {
    /// Creates a server with its short id and URI.
    #[must_use]
    pub fn new(id: u64, uri: impl Into<String>) -> Self {
        Self { id, uri: uri.into() }
    }
}

impl fmt::Display for LwM2mServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server#{} ({})", self.id, self.uri)
    }
}

/// A single-path Observe request.
///
/// Observe-Composite is not supported by the notification engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserveRequest {
    /// Observed node.
    pub path: LwM2mPath,
}

impl ObserveRequest {
    /// Observe request on `path`.
    #[must_use]
    pub const fn new(path: LwM2mPath) -> Self {
        Self { path }
    }
}

impl fmt::Display for ObserveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observe {}", self.path)
    }
}

/// CoAP response codes an Observe response can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    /// 2.05, the only success code.
    Content,
    /// 4.00
    BadRequest,
    /// 4.01
    Unauthorized,
    /// 4.04
    NotFound,
    /// 4.05
    MethodNotAllowed,
    /// 4.06
    NotAcceptable,
    /// 5.00
    InternalServerError,
}

impl ResponseCode {
    /// CoAP code in `c.dd` notation, e.g. `2.05`.
    #[must_use]
    pub const fn coap_code(self) -> &'static str {
        match self {
            Self::Content => "2.05",
            Self::BadRequest => "4.00",
            Self::Unauthorized => "4.01",
            Self::NotFound => "4.04",
            Self::MethodNotAllowed => "4.05",
            Self::NotAcceptable => "4.06",
            Self::InternalServerError => "5.00",
        }
    }

    /// True only for `Content`.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Content)
    }
}

/// Result of reading an observed node, sent to the server as a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveResponse {
    /// Response code.
    pub code: ResponseCode,
    /// Resource content of a successful read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Diagnostic for a failure response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock time the response was produced.
    pub timestamp: DateTime<Utc>,
}

impl ObserveResponse {
    /// Successful read carrying `value`.
    #[must_use]
    pub fn success(value: Value) -> Self {
        Self {
            code: ResponseCode::Content,
            content: Some(value),
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed read with a diagnostic message.
    #[must_use]
    pub fn failure(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            content: None,
            error_message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    /// Shorthand for a 4.04 response.
    #[must_use]
    pub fn not_found() -> Self {
        Self::failure(ResponseCode::NotFound, "not found")
    }

    /// True for a `Content` response.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// True for any non-`Content` response.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        !self.code.is_success()
    }

    /// Resource content, if any.
    #[must_use]
    pub const fn content(&self) -> Option<&Value> {
        self.content.as_ref()
    }
}
