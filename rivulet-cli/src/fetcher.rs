//! Transports for the CLI: a simulated one and plain HTTP.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rand::RngExt;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use rivulet::{ChunkFetcher, ChunkTimestamp, SchedulerError, TrackId};

/// Pretends to fetch chunks: waits `latency` (with up to 50% jitter) and fails
/// with probability `failure_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedFetcher {
    latency: Duration,
    failure_rate: f64,
    chunk_size: usize,
}

impl SimulatedFetcher {
    pub fn new(latency: Duration, failure_rate: f64, chunk_size: usize) -> Self {
        Self {
            latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            chunk_size,
        }
    }
}

#[async_trait]
impl ChunkFetcher for SimulatedFetcher {
    async fn fetch_chunk(
        &self,
        track: &TrackId,
        timestamp: ChunkTimestamp,
    ) -> Result<Bytes, SchedulerError> {
        let (latency, fail) = {
            let mut rng = rand::rng();
            let jitter_ms = u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX) / 2;
            let jitter = if jitter_ms > 0 {
                Duration::from_millis(rng.random_range(0..jitter_ms))
            } else {
                Duration::ZERO
            };
            (
                self.latency + jitter,
                rng.random_range(0.0..1.0) < self.failure_rate,
            )
        };

        tokio::time::sleep(latency).await;
        trace!(track = %track, timestamp = %timestamp, latency_ms = latency.as_millis() as u64, "Simulated fetch");

        if fail {
            return Err(SchedulerError::fetch(format!(
                "simulated network failure for {track} at {timestamp}"
            )));
        }
        Ok(Bytes::from(vec![0u8; self.chunk_size]))
    }
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Fetches chunks with GET requests built from a URL template.
#[derive(Debug, Clone)]
pub struct HttpChunkFetcher {
    client: Client,
    template: String,
}

impl HttpChunkFetcher {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        // Validate the template with a sample substitution.
        let sample = render(&template, &TrackId::from("track"), ChunkTimestamp::ZERO);
        Url::parse(&sample).with_context(|| format!("invalid URL template `{template}`"))?;

        install_rustls_provider();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("rivulet/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, template })
    }

    pub fn url_for(&self, track: &TrackId, timestamp: ChunkTimestamp) -> Result<Url, SchedulerError> {
        let rendered = render(&self.template, track, timestamp);
        Url::parse(&rendered)
            .map_err(|e| SchedulerError::fetch_permanent(format!("invalid chunk URL {rendered}: {e}")))
    }
}

fn render(template: &str, track: &TrackId, timestamp: ChunkTimestamp) -> String {
    template
        .replace("{track}", track.as_str())
        .replace("{timestamp_ms}", &timestamp.as_millis().to_string())
}

#[async_trait]
impl ChunkFetcher for HttpChunkFetcher {
    async fn fetch_chunk(
        &self,
        track: &TrackId,
        timestamp: ChunkTimestamp,
    ) -> Result<Bytes, SchedulerError> {
        let url = self.url_for(track, timestamp)?;
        trace!(url = %url, "Fetching chunk");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SchedulerError::fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::http_status(
                status.as_u16(),
                track.clone(),
                timestamp,
            ));
        }

        response
            .bytes()
            .await
            .map_err(|e| SchedulerError::fetch(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let fetcher =
            HttpChunkFetcher::new("https://cdn.example.com/{track}/{timestamp_ms}.m4s").unwrap();
        let url = fetcher
            .url_for(&TrackId::from("audio-en"), ChunkTimestamp::from_millis(4_000))
            .unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.com/audio-en/4000.m4s");
    }

    #[test]
    fn test_rejects_invalid_template() {
        assert!(HttpChunkFetcher::new("not a url/{track}").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_fetcher() {
        let ok = SimulatedFetcher::new(Duration::from_millis(100), 0.0, 16);
        let data = ok
            .fetch_chunk(&TrackId::from("video"), ChunkTimestamp::ZERO)
            .await
            .unwrap();
        assert_eq!(data.len(), 16);

        let failing = SimulatedFetcher::new(Duration::ZERO, 1.0, 16);
        let err = failing
            .fetch_chunk(&TrackId::from("video"), ChunkTimestamp::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
