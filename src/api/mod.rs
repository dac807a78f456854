//! Network access for farmsync.
//!
//! The offline layer talks to the FarmSync backend through the [`Transport`]
//! trait; [`HttpTransport`] is the `reqwest` implementation.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod types;

pub use client::{CredentialProvider, HttpTransport, StaticToken, Transport};
pub use types::{ApiRequest, ApiResponse, Destination, HttpMethod};
