use super::{error_body, http_client};
use async_trait::async_trait;
use reqwest::StatusCode;
use scribe_core::{Result, ScribeError, SummarizationService};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Client for a Messages-API-shaped generative model endpoint.
pub struct MessagesClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

impl MessagesClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            api_version: api_version.into(),
        })
    }
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: String) -> ScribeError {
    let detail = format!("{}: {}", status, body);
    match status.as_u16() {
        408 | 429 | 529 | 500..=599 => ScribeError::Throttled(detail),
        401 | 403 => ScribeError::AuthFailure(detail),
        // Wrong endpoint or model id.
        404 | 405 => {
            ScribeError::Config(format!("model endpoint rejected request ({})", detail))
        }
        _ => ScribeError::InvalidDocument {
            key: String::new(),
            reason: format!("model rejected input ({})", detail),
        },
    }
}

#[async_trait]
impl SummarizationService for MessagesClient {
    async fn invoke(&self, model_id: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: model_id,
            max_tokens,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .json(&request)
            .send()
            .await
            .map_err(|e| ScribeError::Throttled(format!("transport error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, error_body(response).await));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ScribeError::Throttled(format!("unreadable model response: {}", e)))?;

        parsed
            .content
            .into_iter()
            .next()
            .and_then(|block| block.text)
            .ok_or_else(|| ScribeError::InvalidDocument {
                key: String::new(),
                reason: "model response has no text content".to_string(),
            })
    }

    fn name(&self) -> &str {
        "messages"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::testing::spawn;
    use axum::{
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};

    async fn messages(headers: HeaderMap, Json(body): Json<Value>) -> (AxumStatus, Json<Value>) {
        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("good-key") {
            return (AxumStatus::UNAUTHORIZED, Json(json!({"error": "bad key"})));
        }
        let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
        if prompt.contains("OVERLOAD") {
            return (
                AxumStatus::from_u16(529).unwrap(),
                Json(json!({"error": "overloaded"})),
            );
        }
        if prompt.contains("TOO_LONG") {
            return (AxumStatus::PAYLOAD_TOO_LARGE, Json(json!({"error": "too long"})));
        }
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "user");
        (
            AxumStatus::OK,
            Json(json!({
                "content": [{"type": "text", "text": format!("model={}", body["model"].as_str().unwrap_or_default())}]
            })),
        )
    }

    async fn client(key: &str) -> MessagesClient {
        let addr = spawn(Router::new().route("/v1/messages", post(messages))).await;
        MessagesClient::new(
            format!("http://{}/v1/messages", addr),
            key,
            "2023-06-01",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invoke_reads_first_text_block() {
        let client = client("good-key").await;
        let text = client.invoke("model-a", "Summarise this", 1000).await.unwrap();
        assert_eq!(text, "model=model-a");
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_failure() {
        let client = client("wrong").await;
        assert!(matches!(
            client.invoke("model-a", "text", 1000).await,
            Err(ScribeError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_overload_and_rejection_mapping() {
        let client = client("good-key").await;
        assert!(matches!(
            client.invoke("model-a", "OVERLOAD", 1000).await,
            Err(ScribeError::Throttled(_))
        ));
        assert!(matches!(
            client.invoke("model-a", "TOO_LONG", 1000).await,
            Err(ScribeError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_classify_status() {
        let throttled = |code: u16| {
            matches!(
                classify_status(StatusCode::from_u16(code).unwrap(), String::new()),
                ScribeError::Throttled(_)
            )
        };
        assert!(throttled(429));
        assert!(throttled(500));
        assert!(throttled(503));
        assert!(throttled(529));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            ScribeError::AuthFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, String::new()),
            ScribeError::InvalidDocument { .. }
        ));
    }

    #[test]
    fn test_client_errors_are_not_retried_as_throttling() {
        for code in [400, 404, 405, 409, 413, 418, 422] {
            let err = classify_status(StatusCode::from_u16(code).unwrap(), String::new());
            assert_eq!(err.class(), scribe_core::FailureClass::Fatal, "{}: {:?}", code, err);
        }
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new()),
            ScribeError::Config(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::METHOD_NOT_ALLOWED, String::new()),
            ScribeError::Config(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, String::new()),
            ScribeError::Throttled(_)
        ));
    }

    #[tokio::test]
    async fn test_wrong_endpoint_is_config_error() {
        let addr = spawn(Router::new().route("/v1/messages", post(messages))).await;
        let client = MessagesClient::new(
            format!("http://{}/v1/wrong", addr),
            "good-key",
            "2023-06-01",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            client.invoke("model-a", "text", 1000).await,
            Err(ScribeError::Config(_))
        ));
    }
}
