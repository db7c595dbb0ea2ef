use super::{error_body, http_client};
use async_trait::async_trait;
use reqwest::StatusCode;
use scribe_core::{Result, ScribeError, Summary, SummaryIndex, UpsertOutcome};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Deserialize)]
struct IndexResponse {
    result: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(rename = "_source")]
    source: Summary,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Summary,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

/// Summary index in an OpenSearch-compatible cluster.
///
/// Documents are addressed by URL-encoded key. Writes use external
/// versioning on `generated_at`, so the cluster itself rejects an older
/// summary arriving after a newer one.
pub struct HttpSearchIndex {
    client: reqwest::Client,
    endpoint: String,
    index: String,
}

impl HttpSearchIndex {
    pub fn new(
        endpoint: impl Into<String>,
        index: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            index: index.into(),
        })
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.index)
    }

    fn doc_url(&self, key: &str) -> String {
        format!("{}/_doc/{}", self.index_url(), urlencoding::encode(key))
    }

    /// Create the index with a mapping if it does not exist yet.
    pub async fn ensure_index(&self) -> Result<()> {
        let response = self
            .client
            .head(self.index_url())
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            s if s.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            s => return Err(ScribeError::IndexUnavailable(format!("HEAD index returned {}", s))),
        }

        let mapping = json!({
            "mappings": {
                "properties": {
                    "document_key": {"type": "keyword"},
                    "bucket": {"type": "keyword"},
                    "text": {"type": "text"},
                    "content_excerpt": {"type": "text"},
                    "content_sha256": {"type": "keyword"},
                    "model_version": {"type": "keyword"},
                    "generated_at": {"type": "date"}
                }
            }
        });
        let response = self
            .client
            .put(self.index_url())
            .json(&mapping)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Created search index {}", self.index);
            return Ok(());
        }
        let body = error_body(response).await;
        // Another worker created it first.
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(ScribeError::IndexUnavailable(format!(
            "creating index {} returned {}: {}",
            self.index, status, body
        )))
    }
}

fn unavailable(e: reqwest::Error) -> ScribeError {
    ScribeError::IndexUnavailable(format!("request failed: {}", e))
}

async fn status_error(response: reqwest::Response) -> ScribeError {
    let status = response.status();
    ScribeError::IndexUnavailable(format!("{}: {}", status, error_body(response).await))
}

#[async_trait]
impl SummaryIndex for HttpSearchIndex {
    async fn upsert(&self, summary: &Summary) -> Result<UpsertOutcome> {
        let version = summary.generated_at.timestamp_micros().max(0).to_string();
        let response = self
            .client
            .put(self.doc_url(&summary.document_key))
            .query(&[("version", version.as_str()), ("version_type", "external_gte")])
            .json(summary)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Ok(UpsertOutcome::Superseded);
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let parsed: IndexResponse = response.json().await.map_err(unavailable)?;
        Ok(match parsed.result.as_str() {
            "created" => UpsertOutcome::Created,
            _ => UpsertOutcome::Replaced,
        })
    }

    async fn get(&self, document_key: &str) -> Result<Option<Summary>> {
        let response = self
            .client
            .get(self.doc_url(document_key))
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let parsed: GetResponse = response.json().await.map_err(unavailable)?;
                Ok(Some(parsed.source))
            }
            _ => Err(status_error(response).await),
        }
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Summary>> {
        let body = if query.trim().is_empty() {
            json!({"size": limit, "query": {"match_all": {}}})
        } else {
            json!({
                "size": limit,
                "query": {
                    "bool": {
                        "should": [
                            {"wildcard": {"document_key": {"value": format!("*{}*", query), "case_insensitive": true}}},
                            {"match_phrase": {"text": query}}
                        ]
                    }
                }
            })
        };

        let response = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let parsed: SearchResponse = response.json().await.map_err(unavailable)?;
        Ok(parsed.hits.hits.into_iter().map(|h| h.source).collect())
    }

    async fn count(&self) -> Result<u64> {
        let response = self
            .client
            .get(format!("{}/_count", self.index_url()))
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let parsed: CountResponse = response.json().await.map_err(unavailable)?;
        Ok(parsed.count)
    }

    fn name(&self) -> &str {
        "search"
    }
}
