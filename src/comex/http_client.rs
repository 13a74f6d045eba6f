use crate::config::ApiConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct HttpClient {
    inner: reqwest::Client,
    config: ApiConfig,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            warn!("TLS certificate validation is disabled for the statistics API");
        }

        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.execute(url, || self.inner.get(url.clone())).await
    }

    pub async fn post_json<B: Serialize + Sync>(&self, url: &Url, body: &B) -> Result<String, FetchError> {
        self.execute(url, || self.inner.post(url.clone()).json(body)).await
    }

    /// Send with a polite delay before every attempt, retrying throttling,
    /// server errors and transport failures with jittered exponential backoff.
    async fn execute<F>(&self, url: &Url, build: F) -> Result<String, FetchError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.config.backoff_base_ms / 2).max(1))
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.config.max_retries as usize);

        let mut attempt = 0u32;
        let action = || {
            attempt += 1;
            let n = attempt;
            let request = build();
            async move {
                self.polite_delay().await;
                debug!("{} (attempt {})", url, n);
                send(request, url).await
            }
        };

        let retry_if = |e: &FetchError| {
            let retry = e.is_retryable();
            if retry {
                warn!("{}, backing off", e);
            }
            retry
        };

        RetryIf::start(strategy, action, retry_if).await
    }

    async fn polite_delay(&self) {
        let jitter = rand::random::<u64>() % (self.config.jitter_ms + 1);
        sleep(Duration::from_millis(self.config.request_delay_ms + jitter)).await;
    }
}

async fn send(request: reqwest::RequestBuilder, url: &Url) -> Result<String, FetchError> {
    let transport = |source| FetchError::Transport {
        url: url.to_string(),
        source,
    };

    let resp = request.send().await.map_err(transport)?;
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(FetchError::RateLimited { url: url.to_string() });
    }
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    resp.text().await.map_err(transport)
}
