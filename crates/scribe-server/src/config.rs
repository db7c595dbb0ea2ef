use scribe_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Full worker configuration, loaded from `scribe.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    pub server: ServerConfig,
    pub nats: NatsConfig,
    pub store: StoreConfig,
    pub model: ModelConfig,
    pub index: IndexConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    /// Deliveries processed at once. The concurrency gate still bounds
    /// summarisation separately.
    pub max_workers: usize,
    /// Accept notifications on `POST /events`.
    pub http_events: bool,
    /// `Retry-After` sent with 503 responses from `POST /events`.
    pub retry_after_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 9191)),
            max_workers: 16,
            http_events: true,
            retry_after_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub enabled: bool,
    pub url: String,
    pub stream: String,
    pub subject: String,
    pub durable: String,
    /// Must exceed the pipeline run timeout or messages are redelivered
    /// while still being processed.
    pub ack_wait_secs: u64,
    /// Redelivery delay requested when a run is retryable.
    pub nak_delay_ms: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "nats://localhost:4222".to_string(),
            stream: "SCRIBE".to_string(),
            subject: "scribe.notifications".to_string(),
            durable: "scribe-worker".to_string(),
            ack_wait_secs: 600,
            nak_delay_ms: 30_000,
        }
    }
}

impl NatsConfig {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn nak_delay(&self) -> Duration {
        Duration::from_millis(self.nak_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Fs,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root for the `fs` backend; objects live at `{root}/{bucket}/{key}`.
    pub root: PathBuf,
    /// Base URL for the `http` backend (path-style addressing).
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fs,
            root: PathBuf::from("./data/objects"),
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    /// Never written back out by `scribe config`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub api_version: String,
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: None,
            api_version: "2023-06-01".to_string(),
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Redb,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// Database file for the `redb` backend.
    pub path: PathBuf,
    /// Search cluster base URL for the `http` backend.
    pub endpoint: Option<String>,
    pub name: String,
    pub timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Redb,
            path: PathBuf::from("./data/summaries.redb"),
            endpoint: None,
            name: "summaries".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl ScribeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("{} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.pipeline.validate() {
            errors.push(e.to_string());
        }
        if self.server.max_workers == 0 {
            errors.push("[server] max_workers must be at least 1".to_string());
        }
        if self.store.backend == StoreBackend::Http && self.store.endpoint.is_none() {
            errors.push("[store] backend = \"http\" requires endpoint".to_string());
        }
        if self.index.backend == IndexBackend::Http && self.index.endpoint.is_none() {
            errors.push("[index] backend = \"http\" requires endpoint".to_string());
        }
        if self.index.name.is_empty() {
            errors.push("[index] name must not be empty".to_string());
        }
        if self.nats.enabled && self.nats.ack_wait() <= self.pipeline.run_timeout() {
            errors.push(format!(
                "[nats] ack_wait_secs ({}) must exceed [pipeline] run_timeout_ms ({})",
                self.nats.ack_wait_secs, self.pipeline.run_timeout_ms
            ));
        }
        if self.model.api_key.is_none() {
            errors.push(
                "[model] api_key is not set (use SCRIBE_MODEL_API_KEY)".to_string(),
            );
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScribeConfig::default();
        assert_eq!(config.server.max_workers, 16);
        assert_eq!(config.store.backend, StoreBackend::Fs);
        assert_eq!(config.index.backend, IndexBackend::Redb);
        assert_eq!(config.pipeline.max_concurrency, 1);
        assert!(!config.nats.enabled);
    }

    #[test]
    fn test_parse_partial_file() {
        let raw = r#"
            [server]
            max_workers = 4

            [store]
            backend = "http"
            endpoint = "http://localhost:9000"

            [pipeline]
            max_concurrency = 2
            suffix_filter = ".md"
        "#;
        let config: ScribeConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.server.max_workers, 4);
        assert_eq!(config.server.retry_after_secs, 30);
        assert_eq!(config.store.backend, StoreBackend::Http);
        assert_eq!(config.store.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.pipeline.max_concurrency, 2);
        assert_eq!(config.pipeline.suffix_filter, ".md");
        assert_eq!(config.pipeline.max_fetch_retries, 3);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = ScribeConfig::default();
        config.server.max_workers = 0;
        config.index.backend = IndexBackend::Http;

        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("max_workers")));
        assert!(errors.iter().any(|e| e.contains("[index]")));
        assert!(errors.iter().any(|e| e.contains("api_key")));
    }

    #[test]
    fn test_ack_wait_must_exceed_run_timeout() {
        let mut config = ScribeConfig::default();
        config.model.api_key = Some("k".into());
        config.nats.enabled = true;
        config.nats.ack_wait_secs = 60;

        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ack_wait_secs"));
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = ScribeConfig::default();
        config.model.api_key = Some("secret".into());
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[pipeline]"));
    }
}
