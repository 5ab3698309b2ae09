//! TLE fetching functionality

use crate::tle::cache::{CachedTleGroup, TleDiskCache};
use crate::tle::parser::{parse_tle_epoch_to_utc, split_tle_groups};
use crate::tle::store::{IngestReport, TleStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tracing::{info, warn};

/// Where constellation element sets come from
#[async_trait]
pub trait TleSource: Send + Sync {
    /// Raw TLE text for every satellite of a constellation
    async fn fetch_group(&self, constellation: &str) -> anyhow::Result<String>;
}

/// Celestrak GP query, backed by an optional disk cache for offline restarts
pub struct CelestrakSource {
    client: reqwest::Client,
    base_url: String,
    cache: Option<TleDiskCache>,
}

impl CelestrakSource {
    pub fn new(base_url: impl Into<String>, cache: Option<TleDiskCache>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache,
        }
    }

    async fn fetch_remote(&self, constellation: &str) -> anyhow::Result<String> {
        let url = format!(
            "{}?GROUP={}&FORMAT=TLE",
            self.base_url,
            constellation.to_lowercase()
        );
        let resp = self
            .client
            .get(&url)
            .header("accept", "text/plain")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        info!(constellation, %status, url = %url, bytes = body.len(), "TLE group fetch");
        if !status.is_success() {
            anyhow::bail!("HTTP {} for group fetch", status);
        }
        if !split_tle_groups(&body).iter().any(|g| g.is_ok()) {
            let sample: String = body.lines().take(6).collect::<Vec<_>>().join("\\n");
            anyhow::bail!("No valid TLE pair found for {}. Sample: {}", constellation, sample);
        }
        Ok(body)
    }

    /// Serve a still-valid disk cache entry after a failed fetch, else return the fetch error
    fn fall_back_to_cache(
        &self,
        constellation: &str,
        fetch_error: anyhow::Error,
    ) -> anyhow::Result<String> {
        let Some(cache) = &self.cache else {
            return Err(fetch_error);
        };
        let cached = match cache.read(constellation) {
            Ok(entry) => entry.filter(|entry| cache.is_valid(entry, Utc::now())),
            Err(cache_error) => {
                warn!(constellation, error = %cache_error, "Failed to read TLE disk cache");
                None
            }
        };
        match cached {
            Some(entry) => {
                warn!(constellation, error = %fetch_error, "Fetch failed, using disk cache");
                Ok(entry.body)
            }
            None => Err(fetch_error),
        }
    }
}

#[async_trait]
impl TleSource for CelestrakSource {
    async fn fetch_group(&self, constellation: &str) -> anyhow::Result<String> {
        match self.fetch_remote(constellation).await {
            Ok(body) => {
                if let Some(cache) = &self.cache {
                    let newest_epoch = newest_epoch(&body).unwrap_or_else(Utc::now);
                    let entry = CachedTleGroup {
                        constellation: constellation.to_lowercase(),
                        body: body.clone(),
                        newest_epoch,
                        cached_at: Utc::now(),
                    };
                    if let Err(e) = cache.write(&entry) {
                        warn!(constellation, error = %e, "Failed to write TLE disk cache");
                    }
                }
                Ok(body)
            }
            Err(e) => self.fall_back_to_cache(constellation, e),
        }
    }
}

/// Fixed in-memory groups, for tests and offline runs
#[derive(Default, Clone)]
pub struct StaticTleSource {
    groups: HashMap<String, String>,
}

impl StaticTleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, constellation: &str, body: impl Into<String>) -> Self {
        self.groups.insert(constellation.to_lowercase(), body.into());
        self
    }
}

#[async_trait]
impl TleSource for StaticTleSource {
    async fn fetch_group(&self, constellation: &str) -> anyhow::Result<String> {
        self.groups
            .get(&constellation.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no TLE group configured for {}", constellation))
    }
}

/// Fetch a constellation and ingest it into the store
pub async fn refresh_constellation(
    store: &TleStore,
    source: &dyn TleSource,
    constellation: &str,
) -> anyhow::Result<IngestReport> {
    let body = source.fetch_group(constellation).await?;
    let report = store.add_many(&body, constellation);
    if report.accepted() == 0 && report.unchanged == 0 {
        anyhow::bail!("TLE group {} contained no usable element sets", constellation);
    }
    Ok(report)
}

fn newest_epoch(body: &str) -> Option<chrono::DateTime<Utc>> {
    split_tle_groups(body)
        .into_iter()
        .filter_map(|g| g.ok())
        .filter_map(|g| parse_tle_epoch_to_utc(&g.line1))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tle::mock_data::TESTSAT_TLE_DATA;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn cached_source(test_name: &str) -> (CelestrakSource, PathBuf) {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "ntn-orbit-sim-fetcher-{}-{}-{}",
            test_name,
            std::process::id(),
            nanos
        ));
        let cache = TleDiskCache::new_in_dir(dir.clone(), 7).expect("Failed to create cache");
        (
            CelestrakSource::new("http://127.0.0.1:9/gp.php", Some(cache)),
            dir,
        )
    }

    #[tokio::test]
    async fn test_static_source_refresh() {
        let store = TleStore::new();
        let source = StaticTleSource::new().with_group("TestNet", TESTSAT_TLE_DATA);
        let report = refresh_constellation(&store, &source, "testnet").await.unwrap();
        assert_eq!(report.inserted, 8);
        assert_eq!(store.by_constellation("testnet").len(), 8);
    }

    #[tokio::test]
    async fn test_static_source_missing_group() {
        let store = TleStore::new();
        let source = StaticTleSource::new();
        assert!(refresh_constellation(&store, &source, "oneweb").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rejects_garbage_body() {
        let store = TleStore::new();
        let source = StaticTleSource::new().with_group("junk", "<html>not found</html>");
        assert!(refresh_constellation(&store, &source, "junk").await.is_err());
    }

    #[test]
    fn test_newest_epoch() {
        let epoch = newest_epoch(TESTSAT_TLE_DATA).unwrap();
        assert_eq!(epoch, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(newest_epoch("nothing here").is_none());
    }

    #[test]
    fn test_corrupt_cache_keeps_fetch_error() {
        let (source, dir) = cached_source("corrupt");
        std::fs::write(dir.join("testnet.json"), "{ not json").unwrap();

        let err = source
            .fall_back_to_cache("testnet", anyhow::anyhow!("HTTP 503 for group fetch"))
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP 503 for group fetch");
    }

    #[test]
    fn test_valid_cache_serves_after_fetch_error() {
        let (source, _dir) = cached_source("valid");
        let cache = source.cache.as_ref().unwrap();
        cache
            .write(&CachedTleGroup {
                constellation: "testnet".into(),
                body: TESTSAT_TLE_DATA.to_string(),
                newest_epoch: Utc::now(),
                cached_at: Utc::now(),
            })
            .unwrap();

        let body = source
            .fall_back_to_cache("testnet", anyhow::anyhow!("connection refused"))
            .unwrap();
        assert!(body.contains("TESTSAT-1"));

        let err = source
            .fall_back_to_cache("oneweb", anyhow::anyhow!("connection refused"))
            .unwrap_err();
        assert_eq!(err.to_string(), "connection refused");
    }
}
