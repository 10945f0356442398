//! Web-front Status Client (§4.3).
//!
//! A short-TTL-cached HTTP client for the community web-front's server
//! status endpoint, used as a secondary confirmation source by the
//! per-server processing loop (§4.6 step 3) when `webfront.enabled` is
//! set.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::config::Webfront as WebfrontConfig;

/// One instance's worth of per-server statuses, as returned by a single
/// `GET {baseUrl}/api/status?instance={instanceId}` call.
type InstanceStatuses = Arc<Vec<WebfrontServerStatus>>;

#[derive(Debug, Clone, Deserialize)]
pub struct WebfrontPlayer {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebfrontServerStatus {
    #[serde(rename = "listenAddress")]
    pub ip: String,
    #[serde(rename = "listenPort")]
    pub port: u16,
    #[serde(default)]
    pub players: Vec<WebfrontPlayer>,
}

impl WebfrontServerStatus {
    pub fn has_player(&self, display_name: &str) -> bool {
        self.players.iter().any(|p| p.name == display_name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebfrontError {
    #[error("web-front disabled")]
    Disabled,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server not reported by web-front")]
    NotFound,
}

struct CacheEntry {
    fetched_at: Instant,
    statuses: InstanceStatuses,
}

/// Caches each instance's status listing for `cache_ttl_millis`, so a burst
/// of per-server loop ticks against the same instance collapses into one
/// upstream request.
pub struct WebfrontClient {
    config: WebfrontConfig,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl WebfrontClient {
    pub fn new(config: WebfrontConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("building the web-front http client should never fail");

        WebfrontClient {
            config,
            http,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up the status the web-front last reported for `ip:port` within
    /// `instance_id`, refreshing that instance's cache entry first if it's
    /// stale (§4.3, §6 `GET {baseUrl}/api/status?instance={instanceId}`).
    pub async fn status_for(
        &self,
        instance_id: &str,
        ip: IpAddr,
        port: u16,
    ) -> Result<WebfrontServerStatus, WebfrontError> {
        if !self.config.enabled {
            return Err(WebfrontError::Disabled);
        }

        let statuses = self.instance_statuses(instance_id).await?;
        statuses
            .iter()
            .find(|status| status.ip == ip.to_string() && status.port == port)
            .cloned()
            .ok_or(WebfrontError::NotFound)
    }

    async fn instance_statuses(&self, instance_id: &str) -> Result<InstanceStatuses, WebfrontError> {
        let ttl = Duration::from_millis(self.config.cache_ttl_millis);

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(instance_id) {
                if entry.fetched_at.elapsed() < ttl {
                    return Ok(entry.statuses.clone());
                }
            }
        }

        let url = format!(
            "{}/api/status?instance={}",
            self.config.base_url.trim_end_matches('/'),
            instance_id
        );
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let raw: Vec<WebfrontServerStatus> = response.json().await?;
        let statuses: InstanceStatuses = Arc::new(raw);

        let mut cache = self.cache.write().await;
        cache.insert(
            instance_id.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                statuses: statuses.clone(),
            },
        );

        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_client_short_circuits() {
        let client = WebfrontClient::new(WebfrontConfig {
            enabled: false,
            base_url: "http://localhost".into(),
            cache_ttl_millis: 1000,
            request_timeout_secs: 1,
        });

        let result = tokio_test::block_on(client.status_for("instance-a", "127.0.0.1".parse().unwrap(), 1234));
        assert!(matches!(result, Err(WebfrontError::Disabled)));
    }
}
