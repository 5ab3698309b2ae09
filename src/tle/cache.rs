//! TLE disk caching module
//!
//! Persists the raw text of each fetched constellation group so a restarted
//! simulator can ingest elements without reaching Celestrak.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Serialized cache entry stored as JSON on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTleGroup {
    pub constellation: String,
    pub body: String,
    /// Newest element epoch found in `body`
    pub newest_epoch: DateTime<Utc>,
    pub cached_at: DateTime<Utc>,
}

/// TLE group disk cache
pub struct TleDiskCache {
    cache_dir: PathBuf,
    expiration_days: i64,
}

impl TleDiskCache {
    /// Create a cache in the platform cache directory
    ///
    /// - macOS: ~/Library/Caches/ntn-orbit-sim/tle/
    /// - Linux: ~/.cache/ntn-orbit-sim/tle/
    /// - Windows: %LOCALAPPDATA%\ntn-orbit-sim\tle\
    pub fn new(expiration_days: i64) -> Result<Self, anyhow::Error> {
        let proj_dirs = ProjectDirs::from("", "", "ntn-orbit-sim")
            .ok_or_else(|| anyhow::anyhow!("Failed to resolve cache directory"))?;

        let cache_dir = proj_dirs.cache_dir().join("tle");
        Self::new_in_dir(cache_dir, expiration_days)
    }

    /// Create a cache rooted at a specific directory
    pub fn new_in_dir(cache_dir: PathBuf, expiration_days: i64) -> Result<Self, anyhow::Error> {
        fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            cache_dir,
            expiration_days,
        })
    }

    /// Returns Ok(None) on a cache miss
    pub fn read(&self, constellation: &str) -> Result<Option<CachedTleGroup>, anyhow::Error> {
        let path = self.cache_path(constellation);

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let cached: CachedTleGroup = serde_json::from_str(&contents)?;

        Ok(Some(cached))
    }

    pub fn write(&self, entry: &CachedTleGroup) -> Result<(), anyhow::Error> {
        let path = self.cache_path(&entry.constellation);
        let contents = serde_json::to_string_pretty(entry)?;
        fs::write(&path, contents)?;
        Ok(())
    }

    /// An entry stays valid while its newest epoch is younger than the expiration window
    pub fn is_valid(&self, entry: &CachedTleGroup, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(entry.newest_epoch);
        age < Duration::days(self.expiration_days)
    }

    fn cache_path(&self, constellation: &str) -> PathBuf {
        let file: String = constellation
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{}.json", file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tle::mock_data::TESTSAT_TLE_DATA;
    use chrono::TimeZone;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(test_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "ntn-orbit-sim-tle-cache-{}-{}-{}",
            test_name,
            std::process::id(),
            nanos
        ))
    }

    fn entry(constellation: &str, newest_epoch: DateTime<Utc>) -> CachedTleGroup {
        CachedTleGroup {
            constellation: constellation.to_string(),
            body: TESTSAT_TLE_DATA.to_string(),
            newest_epoch,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn test_cache_write_and_read() {
        let cache = TleDiskCache::new_in_dir(unique_temp_dir("write_and_read"), 7)
            .expect("Failed to create cache");
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        cache.write(&entry("testnet", epoch)).expect("Failed to write to cache");

        let cached = cache
            .read("testnet")
            .expect("Failed to read from cache")
            .expect("Cache entry not found");
        assert_eq!(cached.constellation, "testnet");
        assert_eq!(cached.newest_epoch, epoch);
        assert!(cached.body.contains("TESTSAT-8"));
    }

    #[test]
    fn test_cache_validation_uses_epoch_age() {
        let cache = TleDiskCache::new_in_dir(unique_temp_dir("validation"), 7)
            .expect("Failed to create cache");
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let e = entry("testnet", epoch);

        assert!(cache.is_valid(&e, epoch + Duration::days(3)));
        assert!(!cache.is_valid(&e, epoch + Duration::days(10)));
    }

    #[test]
    fn test_cache_miss() {
        let cache =
            TleDiskCache::new_in_dir(unique_temp_dir("miss"), 7).expect("Failed to create cache");
        assert!(cache.read("oneweb").expect("Read should not error").is_none());
    }

    #[test]
    fn test_cache_file_persistence_and_name_sanitizing() {
        let dir = unique_temp_dir("persistence");
        let cache = TleDiskCache::new_in_dir(dir.clone(), 7).expect("Failed to create cache");
        let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        cache
            .write(&entry("Star/Link", epoch))
            .expect("Write should succeed");

        // Simulating a restart
        let cache2 = TleDiskCache::new_in_dir(dir.clone(), 7).expect("Failed to create cache");
        let loaded = cache2
            .read("star/link")
            .expect("Read should succeed")
            .expect("Entry should exist");
        assert_eq!(loaded.constellation, "Star/Link");
        assert!(dir.join("star_link.json").exists());
    }
}
