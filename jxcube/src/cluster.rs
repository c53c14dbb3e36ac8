//! The Elasticsearch transport seam.
//!
//! Decoding never touches the network; everything it needs is behind
//! [`Cluster`], so tests script responses and production uses the HTTP
//! client below.

use async_trait::async_trait;
use serde_json::Value;

use crate::dialect::{Es1Dialect, Es5Dialect, EsDialect};
use crate::error::Result;

/// One search endpoint plus the wire dialect its version speaks.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn dialect(&self) -> &(dyn EsDialect + Send + Sync);
    async fn search(&self, index: &str, body: &Value) -> Result<Value>;
}

pub fn dialect_for_version(version: &str) -> Box<dyn EsDialect + Send + Sync> {
    if version.starts_with('1') {
        Box::new(Es1Dialect)
    } else {
        Box::new(Es5Dialect)
    }
}

#[cfg(feature = "http")]
mod http {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::{Semaphore, SemaphorePermit};

    use crate::config::ResolvedClusterConfig;
    use crate::dialect::EsDialect;
    use crate::error::{JxError, Result};

    use super::{dialect_for_version, Cluster};

    /// HTTP/JSON search client with a bounded number of in-flight requests.
    pub struct HttpCluster {
        base_url: String,
        client: reqwest::Client,
        dialect: Box<dyn EsDialect + Send + Sync>,
        limiter: Arc<Semaphore>,
    }

    impl HttpCluster {
        pub fn new(url: impl Into<String>) -> Result<Self> {
            Self::with_config(&ResolvedClusterConfig::from_url(url.into()))
        }

        pub fn with_config(config: &ResolvedClusterConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.search.timeout_ms))
                .build()
                .map_err(|e| JxError::Cluster(format!("building http client: {e}")))?;
            Ok(Self {
                base_url: config.url.trim_end_matches('/').to_string(),
                client,
                dialect: dialect_for_version(&config.version),
                limiter: Arc::new(Semaphore::new(config.search.max_in_flight)),
            })
        }

        async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>> {
            self.limiter
                .acquire()
                .await
                .map_err(|e| JxError::Cluster(format!("limiter closed: {e}")))
        }
    }

    #[async_trait]
    impl Cluster for HttpCluster {
        fn dialect(&self) -> &(dyn EsDialect + Send + Sync) {
            self.dialect.as_ref()
        }

        async fn search(&self, index: &str, body: &Value) -> Result<Value> {
            let _permit = self.acquire_slot().await?;
            let url = format!("{}/{}/_search", self.base_url, index);
            let start = Instant::now();
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| JxError::Cluster(format!("search request to {url} failed: {e}")))?;
            let status = response.status();
            let payload: Value = response
                .json()
                .await
                .map_err(|e| JxError::Cluster(format!("response from {url} is not json: {e}")))?;
            if !status.is_success() || payload.get("error").is_some() {
                return Err(JxError::Cluster(format!(
                    "cluster rejected search ({status}): {}",
                    payload.get("error").unwrap_or(&Value::Null)
                )));
            }
            let elapsed = start.elapsed();
            tracing::debug!(
                index = index,
                ms = elapsed.as_millis() as u64,
                "search complete"
            );
            Ok(payload)
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpCluster;
