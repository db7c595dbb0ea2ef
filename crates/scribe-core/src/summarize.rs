use crate::error::{Result, ScribeError};
use crate::types::{Document, SummaryText};
use async_trait::async_trait;
use std::sync::Arc;

/// Boundary to the remote generative model.
///
/// Implementations map remote failures onto the taxonomy: overload and rate
/// limiting → `Throttled`, credential problems → `AuthFailure`, rejected
/// input → `InvalidDocument`. They make exactly one call per invocation.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    async fn invoke(&self, model_id: &str, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Service identifier (used in logs).
    fn name(&self) -> &str;
}

#[async_trait]
impl<M: SummarizationService + ?Sized> SummarizationService for Arc<M> {
    async fn invoke(&self, model_id: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        (**self).invoke(model_id, prompt, max_tokens).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Build the summarisation prompt for a document body.
pub fn summary_prompt(content: &str) -> String {
    format!(
        "Please provide a concise summary of the following document:\n\n{}",
        content
    )
}

/// Turns a fetched document into summary text with a single model call.
///
/// Must only be called while holding a concurrency slot. Retrying on
/// `Throttled` is the coordinator's job.
#[derive(Clone)]
pub struct SummarizationInvoker {
    service: Arc<dyn SummarizationService>,
    model_id: String,
    max_tokens: u32,
}

impl SummarizationInvoker {
    pub fn new(service: Arc<dyn SummarizationService>, model_id: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            service,
            model_id: model_id.into(),
            max_tokens,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn summarize(&self, document: &Document) -> Result<SummaryText> {
        let content = document_text(document)?;
        let prompt = summary_prompt(content);

        let text = self
            .service
            .invoke(&self.model_id, &prompt, self.max_tokens)
            .await
            .map_err(|e| match e {
                // Services don't know which document they were given.
                ScribeError::InvalidDocument { key, reason } if key.is_empty() => {
                    ScribeError::InvalidDocument {
                        key: document.key.clone(),
                        reason,
                    }
                }
                other => other,
            })?;

        let text = text.trim();
        if text.is_empty() {
            return Err(ScribeError::InvalidDocument {
                key: document.key.clone(),
                reason: "model returned an empty summary".to_string(),
            });
        }
        Ok(text.to_string())
    }
}

/// The document body as text. Blank or non-UTF-8 content is invalid.
fn document_text(document: &Document) -> Result<&str> {
    let content = std::str::from_utf8(&document.content).map_err(|e| {
        ScribeError::InvalidDocument {
            key: document.key.clone(),
            reason: format!("content is not UTF-8: {}", e),
        }
    })?;
    if content.trim().is_empty() {
        return Err(ScribeError::InvalidDocument {
            key: document.key.clone(),
            reason: "document is empty".to_string(),
        });
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl SummarizationService for Recording {
        async fn invoke(&self, _model_id: &str, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn invoker(reply: &str) -> (SummarizationInvoker, Arc<Recording>) {
        let service = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
            reply: reply.to_string(),
        });
        (SummarizationInvoker::new(service.clone(), "model-a", 1000), service)
    }

    #[tokio::test]
    async fn test_summarize_wraps_content_in_prompt() {
        let (invoker, service) = invoker("  Q1 revenue grew 10%.\n");
        let doc = Document::new("b1", "reports/q1.txt", b"Revenue grew 10%.".to_vec());

        let text = invoker.summarize(&doc).await.unwrap();
        assert_eq!(text, "Q1 revenue grew 10%.");

        let prompts = service.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with("\n\nRevenue grew 10%."));
    }

    #[tokio::test]
    async fn test_blank_document_never_reaches_model() {
        let (invoker, service) = invoker("unused");
        let doc = Document::new("b1", "blank.txt", b"  \n\t".to_vec());

        let err = invoker.summarize(&doc).await.unwrap_err();
        assert!(matches!(err, ScribeError::InvalidDocument { .. }));
        assert!(service.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_utf8_document_is_invalid() {
        let (invoker, _) = invoker("unused");
        let doc = Document::new("b1", "bin.txt", vec![0xff, 0xfe, 0x00]);
        assert!(matches!(
            invoker.summarize(&doc).await,
            Err(ScribeError::InvalidDocument { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_model_reply_is_invalid() {
        let (invoker, _) = invoker("   ");
        let doc = Document::new("b1", "a.txt", b"Some text".to_vec());
        assert!(matches!(
            invoker.summarize(&doc).await,
            Err(ScribeError::InvalidDocument { .. })
        ));
    }
}
