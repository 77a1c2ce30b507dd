use std::time::Duration;

use pipeline_core::PipelineError;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use tracing::debug;

pub trait UpstreamSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError>;
}

/// Blocking HTTP client for the population and price-relative sources.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    user_agent: String,
}

impl HttpUpstream {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                PipelineError::Internal(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }
}

impl UpstreamSource for HttpUpstream {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PipelineError> {
        let upstream_error = |message: String| PipelineError::Upstream {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .map_err(|error| upstream_error(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_error(format!("unexpected status {status}")));
        }

        let body = response
            .bytes()
            .map_err(|error| upstream_error(format!("failed to read body: {error}")))?;
        debug!(url, bytes = body.len(), "fetched upstream payload");
        Ok(body.to_vec())
    }
}
