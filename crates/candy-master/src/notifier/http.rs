//! HTTP Peer Notifier

use super::{NotifierError, PeerNotifier, RegionUpdate, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Posts region updates to `http://{host}/region`.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
        }
    }

    fn endpoint(host: &str) -> String {
        format!("http://{host}/region")
    }
}

#[async_trait]
impl PeerNotifier for HttpNotifier {
    #[tracing::instrument(skip(self))]
    async fn region_set(&self, host: &str, begin: i32, end: i32) -> Result<()> {
        let response = self
            .http_client
            .post(Self::endpoint(host))
            .json(&RegionUpdate { begin, end })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    NotifierError::Timeout {
                        host: host.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    NotifierError::Request {
                        host: host.to_string(),
                        source,
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(NotifierError::Rejected {
                host: host.to_string(),
                status: response.status().as_u16(),
            });
        }

        debug!(host = %host, begin, end, "Region update delivered");
        Ok(())
    }
}
