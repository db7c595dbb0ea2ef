//! Network-backed implementations of the core boundaries.
//!
//! Each client makes exactly one request per call and maps the response onto
//! the `ScribeError` taxonomy; the coordinator decides whether to retry.

mod model;
mod search;
mod store;

pub use model::MessagesClient;
pub use search::HttpSearchIndex;
pub use store::HttpDocumentStore;

use std::time::Duration;

pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("scribe/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Percent-encode each segment of an object key, keeping `/` separators.
pub(crate) fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Body text for error messages, truncated.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > 512 {
        let mut cut = 512;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::Router;
    use std::net::SocketAddr;

    /// Serve `router` on an ephemeral local port.
    pub async fn spawn(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }
}
