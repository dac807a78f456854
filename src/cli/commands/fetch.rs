//! Fetch command implementation.

use super::Context;
use crate::api::ApiRequest;
use crate::error::FarmSyncError;
use crate::features::interceptor::{Interceptor, LogPlatform, ResponseCache};
use crate::output::format_response;

/// Fetch `url` through the interceptor.
///
/// # Errors
///
/// Returns an error if the store fails or the backend URL is invalid.
/// Network failures produce the offline fallback response instead.
pub async fn fetch(ctx: &Context, url: &str, navigate: bool) -> Result<String, FarmSyncError> {
    let interceptor = Interceptor::new(
        ctx.transport()?,
        ResponseCache::new(ctx.store.clone()),
        std::sync::Arc::new(LogPlatform),
        ctx.config.interceptor.clone(),
    );
    interceptor.resume().await?;

    let request = if navigate {
        ApiRequest::navigate(url)
    } else {
        ApiRequest::get(url)
    };
    let response = interceptor.fetch(&request).await?;
    format_response(&response, ctx.format)
}
