use super::{encode_key_path, error_body, http_client};
use async_trait::async_trait;
use reqwest::StatusCode;
use scribe_core::{DocumentStore, Result, ScribeError};
use std::time::Duration;

/// Object store reached over HTTP with path-style addressing:
/// `GET {endpoint}/{bucket}/{key}`.
pub struct HttpDocumentStore {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDocumentStore {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            urlencoding::encode(bucket),
            encode_key_path(key)
        )
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let transient = |reason: String| ScribeError::TransientFetch {
            key: key.to_string(),
            reason,
        };

        let response = self
            .client
            .get(self.object_url(bucket, key))
            .send()
            .await
            .map_err(|e| transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| transient(format!("reading body failed: {}", e)))?;
            return Ok(body.to_vec());
        }

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(ScribeError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN => Err(transient(format!("store returned {}", status))),
            s if s.is_server_error() => Err(transient(format!(
                "store returned {}: {}",
                s,
                error_body(response).await
            ))),
            s => Err(ScribeError::InvalidDocument {
                key: key.to_string(),
                reason: format!("store rejected request with {}", s),
            }),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::spawn;
    use axum::{extract::Path, http::StatusCode as AxumStatus, routing::get, Router};

    async fn object(Path((bucket, key)): Path<(String, String)>) -> (AxumStatus, String) {
        match (bucket.as_str(), key.as_str()) {
            ("b1", "reports/q1 final.txt") => (AxumStatus::OK, "Revenue grew 10%.".to_string()),
            ("b1", "busy.txt") => (AxumStatus::SERVICE_UNAVAILABLE, "slow down".to_string()),
            ("b1", "secret.txt") => (AxumStatus::FORBIDDEN, String::new()),
            ("b1", "expired.txt") => (AxumStatus::UNAUTHORIZED, String::new()),
            ("b1", "bad.txt") => (AxumStatus::BAD_REQUEST, String::new()),
            _ => (AxumStatus::NOT_FOUND, String::new()),
        }
    }

    async fn store() -> HttpDocumentStore {
        let addr = spawn(Router::new().route("/:bucket/*key", get(object))).await;
        HttpDocumentStore::new(format!("http://{}/", addr), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_get_decodes_path_segments() {
        let store = store().await;
        let body = store.get("b1", "reports/q1 final.txt").await.unwrap();
        assert_eq!(body, b"Revenue grew 10%.");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let store = store().await;
        assert!(matches!(
            store.get("b1", "missing.txt").await,
            Err(ScribeError::NotFound { .. })
        ));
        assert!(matches!(
            store.get("b1", "busy.txt").await,
            Err(ScribeError::TransientFetch { .. })
        ));
        assert!(matches!(
            store.get("b1", "bad.txt").await,
            Err(ScribeError::InvalidDocument { .. })
        ));
    }

    #[tokio::test]
    async fn test_permission_errors_are_retried_not_dropped() {
        let store = store().await;
        for key in ["secret.txt", "expired.txt"] {
            let err = store.get("b1", key).await.unwrap_err();
            assert!(matches!(err, ScribeError::TransientFetch { .. }), "{}: {:?}", key, err);
            assert_eq!(err.class(), scribe_core::FailureClass::Retryable);
            assert!(err.is_transient());
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transient() {
        let store =
            HttpDocumentStore::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        assert!(matches!(
            store.get("b1", "a.txt").await,
            Err(ScribeError::TransientFetch { .. })
        ));
    }
}
