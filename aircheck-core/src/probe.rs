use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocks until the stream URL answers a HEAD request with 200. Any other
/// status and any transport error both mean "not up yet"; there is no
/// attempt limit, the prober is meant to outlast long station outages.
#[derive(Debug, Clone)]
pub struct StreamProber {
    client: Client,
}

impl StreamProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = Client::builder()
            .user_agent("aircheck/0.1")
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub async fn wait_until_available(&self, url: &str) {
        info!(url, "waiting for stream");
        loop {
            match self.client.head(url).send().await {
                Ok(response) if is_available(response.status()) => {
                    info!(url, "stream is up");
                    return;
                }
                Ok(response) => {
                    debug!(status = %response.status(), "stream not ready");
                }
                Err(err) => {
                    debug!(error = %err, "stream probe failed");
                }
            }
            sleep(PROBE_INTERVAL).await;
        }
    }
}

fn is_available(status: StatusCode) -> bool {
    status == StatusCode::OK
}
