//! Request and response types shared by the transport, the interceptor and
//! the reconciler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FarmSyncError;

/// HTTP method of a request or queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Upper-case method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether requests with this method may be served from cache.
    #[must_use]
    pub const fn is_idempotent_read(self) -> bool {
        matches!(self, Self::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = FarmSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(FarmSyncError::Parse(format!("Unknown HTTP method: {other}"))),
        }
    }
}

/// What the requester will do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// A top-level navigation (HTML document).
    Document,
    /// Anything else: scripts, styles, API data.
    #[default]
    Other,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Absolute URL or path relative to the API base URL.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub destination: Destination,
}

impl ApiRequest {
    /// A bodiless request.
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            destination: Destination::Other,
        }
    }

    /// A GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// A navigation GET for an HTML document.
    #[must_use]
    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    /// A request carrying a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn json(
        method: HttpMethod,
        url: impl Into<String>,
        payload: &Value,
    ) -> Result<Self, FarmSyncError> {
        let mut request = Self::new(method, url);
        request.body = Some(serde_json::to_vec(payload)?);
        request
            .headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        Ok(request)
    }

    /// Attach a bearer credential.
    #[must_use]
    pub fn with_bearer(mut self, token: Option<&str>) -> Self {
        if let Some(token) = token {
            self.headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        self
    }

    /// First header value with the given (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A received (or synthesized) HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Whether the response came from the application's own origin.
    pub same_origin: bool,
}

impl ApiResponse {
    /// A response with a plain-text body.
    #[must_use]
    pub fn text(status: u16, status_text: &str, body: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
            same_origin: true,
        }
    }

    /// The synthesized reply for a request that cannot be served offline.
    #[must_use]
    pub fn offline() -> Self {
        Self::text(503, "Service Unavailable", "Offline")
    }

    /// Any 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// First header value with the given (case-insensitive) name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body decoded as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
