//! Fire-and-forget invalidation of downstream caches after tag or embedding
//! changes: an edge cache purge on every known deployment plus a Redis key
//! delete over the Redis REST protocol.

use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::json;

use crate::config::PurgeConfig;

const PURGE_PATH: &str = "/api/cache/purge";

#[derive(Clone)]
pub struct CachePurger {
    config: PurgeConfig,
    client: reqwest::blocking::Client,
}

impl CachePurger {
    /// `None` when no purge target is configured.
    pub fn new(config: PurgeConfig) -> anyhow::Result<Option<Self>> {
        if config.deployment_urls.is_empty() && config.redis_rest_url.is_none() {
            log::debug!("no cache purge targets configured");
            return Ok(None);
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self { config, client }))
    }

    /// Start a purge in the background. Failures are logged and never reach
    /// the caller.
    pub fn trigger(&self, reason: &str) -> Option<JoinHandle<()>> {
        let purger = self.clone();
        let reason = reason.to_string();

        let spawned = std::thread::Builder::new()
            .name("cache-purge".into())
            .spawn(move || {
                log::info!("purging caches: {reason}");
                purger.purge_deployments(&reason);
                purger.purge_redis();
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("failed to spawn cache purge thread: {err}");
                None
            }
        }
    }

    fn purge_deployments(&self, reason: &str) {
        for deployment in &self.config.deployment_urls {
            let url = format!("{}{PURGE_PATH}", deployment.trim_end_matches('/'));

            let mut req = self.client.post(&url).json(&json!({ "reason": reason }));
            if let Some(token) = &self.config.purge_token {
                req = req.bearer_auth(token);
            }

            match req.send() {
                Ok(resp) if resp.status().is_success() => {
                    log::debug!("purged edge cache of {deployment}");
                }
                Ok(resp) => {
                    log::warn!("edge cache purge of {deployment} returned {}", resp.status());
                }
                Err(err) => {
                    log::warn!("edge cache purge of {deployment} failed: {err}");
                }
            }
        }
    }

    fn purge_redis(&self) {
        let Some(base) = &self.config.redis_rest_url else {
            return;
        };

        let url = format!(
            "{}/del/{}",
            base.trim_end_matches('/'),
            self.config.redis_key
        );

        let mut req = self.client.post(&url);
        if let Some(token) = &self.config.redis_rest_token {
            req = req.bearer_auth(token);
        }

        match req.send() {
            Ok(resp) if resp.status().is_success() => {
                log::debug!("deleted redis key {}", self.config.redis_key);
            }
            Ok(resp) => log::warn!("redis key delete returned {}", resp.status()),
            Err(err) => log::warn!("redis key delete failed: {err}"),
        }
    }
}
