//! ImageResolver trait — turns an opaque platform image reference into a
//! URI the model provider can fetch.
//!
//! For Telegram this is a `getFile` call; the reference is a `file_id`.

use async_trait::async_trait;

use crate::error::ResolveError;

#[async_trait]
pub trait ImageResolver: Send + Sync {
    /// Resolve one reference. Failures are per item and never fatal to
    /// context assembly.
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError>;
}

/// Resolver that treats references as already-fetchable URIs.
///
/// Useful when the log stores public URLs, and in tests.
pub struct PassthroughResolver;

#[async_trait]
impl ImageResolver for PassthroughResolver {
    async fn resolve(&self, reference: &str) -> Result<String, ResolveError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            Ok(reference.to_string())
        } else {
            Err(ResolveError::ResolutionFailed {
                reference: reference.to_string(),
                reason: "not an http(s) URI".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_accepts_urls_only() {
        let r = PassthroughResolver;
        assert_eq!(
            r.resolve("https://cdn.example/a.jpg").await.unwrap(),
            "https://cdn.example/a.jpg"
        );
        assert!(r.resolve("AgACAgIAAxkBAAI").await.is_err());
    }
}
