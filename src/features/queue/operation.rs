//! Operation types for the pending operation queue.
//!
//! A pending operation is a mutating API call recorded while the app could
//! not (or chose not to) reach the backend.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ApiRequest, HttpMethod};
use crate::error::FarmSyncError;

/// Kind of mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Create a new record
    Create,
    /// Update an existing record
    Update,
    /// Delete a record
    Delete,
}

impl OperationType {
    /// Get the display name for this operation type.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// The method normally used for this kind of mutation.
    #[must_use]
    pub const fn default_method(&self) -> HttpMethod {
        match self {
            Self::Create => HttpMethod::Post,
            Self::Update => HttpMethod::Put,
            Self::Delete => HttpMethod::Delete,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl std::str::FromStr for OperationType {
    type Err = FarmSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(FarmSyncError::Parse(format!("Unknown operation type: {other}"))),
        }
    }
}

/// An operation as submitted by application code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub payload: Value,
}

impl NewOperation {
    /// Build an operation using the type's usual method.
    #[must_use]
    pub fn new(op_type: OperationType, endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            op_type,
            endpoint: endpoint.into(),
            method: op_type.default_method(),
            payload,
        }
    }

    /// A create (`POST`) operation.
    #[must_use]
    pub fn create(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(OperationType::Create, endpoint, payload)
    }

    /// An update (`PUT`) operation.
    #[must_use]
    pub fn update(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(OperationType::Update, endpoint, payload)
    }

    /// A delete (`DELETE`) operation.
    #[must_use]
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, endpoint, Value::Null)
    }

    /// Override the method.
    #[must_use]
    pub const fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }
}

/// A queued operation with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Store-assigned ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Kind of mutation
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target endpoint, relative to the API base URL
    pub endpoint: String,
    /// HTTP method used on replay
    pub method: HttpMethod,
    /// JSON body sent on replay
    #[serde(default)]
    pub payload: Value,
    /// When the operation was queued
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed replays so far
    pub retry_count: u32,
    /// Error from the most recent failed replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Stamp a new operation for storage.
    ///
    /// The timestamp is truncated to the millisecond precision it is stored
    /// with.
    #[must_use]
    pub fn from_new(op: NewOperation, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            op_type: op.op_type,
            endpoint: op.endpoint,
            method: op.method,
            payload: op.payload,
            enqueued_at: enqueued_at.trunc_subsecs(3),
            retry_count: 0,
            last_error: None,
        }
    }

    /// The store-assigned id, or 0 for an operation not yet stored.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id.unwrap_or(0)
    }

    /// The record after one more failed replay.
    #[must_use]
    pub fn failed(&self, error: &str) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            last_error: Some(error.to_string()),
            ..self.clone()
        }
    }

    /// Whether the retry budget is used up.
    #[must_use]
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// The request that replays this operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_request(&self, token: Option<&str>) -> Result<ApiRequest, FarmSyncError> {
        let request = if self.payload.is_null() {
            ApiRequest::new(self.method, self.endpoint.clone())
        } else {
            ApiRequest::json(self.method, self.endpoint.clone(), &self.payload)?
        };
        Ok(request.with_bearer(token))
    }
}
