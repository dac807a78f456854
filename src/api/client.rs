//! HTTP transport for the FarmSync backend.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

use super::types::{ApiRequest, ApiResponse, HttpMethod};
use crate::error::FarmSyncError;

/// Something that can put a request on the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return whatever the server answered.
    ///
    /// Transport-level failures (no route, refused connection, DNS) are
    /// [`FarmSyncError::NetworkUnreachable`]; non-2xx answers are returned
    /// as responses, not errors.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, FarmSyncError>;
}

/// Source of the bearer credential attached to replays.
///
/// Read at replay time so a refreshed token is picked up by the next drain.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed (possibly absent) token.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}

/// `reqwest`-backed transport that resolves paths against a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, FarmSyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FarmSyncError::Config(format!("Invalid base URL {base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("farmsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FarmSyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Resolve a path or absolute URL against the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid URL.
    pub fn resolve(&self, endpoint: &str) -> Result<Url, FarmSyncError> {
        self.base_url
            .join(endpoint)
            .map_err(|e| FarmSyncError::Parse(format!("Invalid endpoint {endpoint}: {e}")))
    }

    /// The configured base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }
}

const fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, FarmSyncError> {
        let url = self.resolve(&request.url)?;
        let same_origin = url.origin() == self.base_url.origin();

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), url.clone());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FarmSyncError::Parse(format!("Invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FarmSyncError::Parse(format!("Invalid header value: {e}")))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        tracing::trace!(method = %request.method, %url, "sending request");
        let response = builder.send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(ApiResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            same_origin,
        })
    }
}
