//! Signed object retrieval.
//!
//! Profile images live in an external object store. The store is consumed
//! through the [`ObjectStore`] seam, which turns an object key into a
//! pre-authorized GET request; [`ImageFetcher`] performs that request and
//! base64-encodes the bytes for inline transport.

use crate::error::ToolError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Timeout for object fetches.
const OBJECT_FETCH_TIMEOUT_SECS: u64 = 30;

/// A URL plus headers sufficient to fetch one object with a plain GET.
#[derive(Debug, Clone)]
pub struct SignedGetRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Maps object keys to pre-authorized GET requests.
pub trait ObjectStore: Send + Sync {
    fn signed_get_request(&self, object_key: &str) -> SignedGetRequest;
}

/// Object store addressed by base URL, authorized with a static bearer
/// token when one is configured.
#[derive(Debug)]
pub struct StaticTokenObjectStore {
    base_url: String,
    token: Option<String>,
}

impl StaticTokenObjectStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
        }
    }
}

impl ObjectStore for StaticTokenObjectStore {
    fn signed_get_request(&self, object_key: &str) -> SignedGetRequest {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            object_key.trim_start_matches('/')
        );
        let headers = self
            .token
            .iter()
            .map(|token| ("authorization".to_string(), format!("Bearer {token}")))
            .collect();
        SignedGetRequest { url, headers }
    }
}

/// Fetches objects through an [`ObjectStore`] and encodes them for inline
/// transport.
pub struct ImageFetcher {
    store: Arc<dyn ObjectStore>,
    client: reqwest::Client,
}

impl ImageFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(OBJECT_FETCH_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Fetch one object and return its bytes base64-encoded.
    pub async fn fetch_base64(&self, object_key: &str) -> Result<String, ToolError> {
        let signed = self.store.signed_get_request(object_key);
        debug!(object_key = %object_key, url = %signed.url, "fetching object");

        let mut request = self.client.get(&signed.url);
        for (name, value) in &signed.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ToolError::ImageFetch(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::ImageFetch(format!(
                "unexpected status {} for object {}",
                response.status(),
                object_key
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| ToolError::ImageFetch(err.to_string()))?;
        Ok(BASE64.encode(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_request_joins_key_onto_base_url() {
        let store = StaticTokenObjectStore::new("http://127.0.0.1:9000/objects/", None);
        let signed = store.signed_get_request("/users/kody.png");
        assert_eq!(signed.url, "http://127.0.0.1:9000/objects/users/kody.png");
        assert!(signed.headers.is_empty());
    }

    #[test]
    fn signed_request_carries_bearer_token() {
        let store =
            StaticTokenObjectStore::new("http://127.0.0.1:9000/objects", Some("s3cret".into()));
        let signed = store.signed_get_request("users/kody.png");
        assert_eq!(
            signed.headers,
            vec![("authorization".to_string(), "Bearer s3cret".to_string())]
        );
    }
}
