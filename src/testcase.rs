//! Test-case cache
//!
//! Fixture archives are fetched from object storage on a miss, spooled to a
//! temporary file and parsed into an ordered list of `(input, output)` pairs
//! (`1.in`/`1.out`, `2.in`/`2.out`, ... until the first missing pair).
//! Concurrent misses on the same fixture share one download.

use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use serde::Serialize;
use tracing::{error, info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub output: String,
}

/// Shared, read-only case list of one fixture
pub type TestCaseSet = Arc<Vec<TestCase>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub load_failures: u64,
}

pub struct TestCaseCache {
    store: Arc<dyn ObjectStore>,
    cache: Cache<String, TestCaseSet>,
    requests: AtomicU64,
    misses: AtomicU64,
    load_failures: AtomicU64,
}

impl TestCaseCache {
    pub fn new(store: Arc<dyn ObjectStore>, config: CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.time_to_live)
            .time_to_idle(config.time_to_idle)
            .build();

        Self {
            store,
            cache,
            requests: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
        }
    }

    /// Cases of `fixture`, downloading and parsing the archive on a miss
    pub async fn get(&self, fixture: &str) -> Result<TestCaseSet, Arc<CacheError>> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let result = self
            .cache
            .try_get_with(fixture.to_string(), async {
                self.misses.fetch_add(1, Ordering::Relaxed);
                load_fixture(self.store.as_ref(), fixture).await
            })
            .await;

        if let Err(e) = &result {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
            error!("Failed to load fixture {}: {}", fixture, e);
        }
        result
    }

    /// Drop one fixture, e.g. after its archive was re-uploaded
    pub async fn invalidate(&self, fixture: &str) {
        self.cache.invalidate(fixture).await;
        info!("Invalidated cached fixture {}", fixture);
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        info!("Cleared test-case cache");
    }

    /// Warm the cache; failures are logged and the rest still load
    pub async fn preload(&self, fixtures: &[String]) -> usize {
        let mut loaded = 0;
        for fixture in fixtures {
            match self.get(fixture).await {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Preload of {} skipped: {}", fixture, e),
            }
        }
        info!("Preloaded {}/{} fixtures", loaded, fixtures.len());
        loaded
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks().await;
        let requests = self.requests.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            entries: self.cache.entry_count(),
            requests,
            hits: requests.saturating_sub(misses),
            misses,
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}

async fn load_fixture(store: &dyn ObjectStore, fixture: &str) -> Result<TestCaseSet, CacheError> {
    info!("Test-case cache miss, downloading {}", fixture);

    let bytes = store
        .download(fixture)
        .await
        .map_err(|source| CacheError::Download {
            fixture: fixture.to_string(),
            source,
        })?;

    let cases = tokio::task::spawn_blocking(move || -> Result<Vec<TestCase>, CacheError> {
        // Removed when dropped, whichever way parsing ends
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.rewind()?;
        parse_archive(file.as_file_mut())
    })
    .await
    .map_err(|e| CacheError::Io(std::io::Error::other(e)))??;

    info!("Loaded {} test cases from {}", cases.len(), fixture);
    Ok(Arc::new(cases))
}

/// Read numbered `N.in`/`N.out` pairs from an archive until one is missing
pub fn parse_archive<R: Read + Seek>(reader: R) -> Result<Vec<TestCase>, CacheError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut cases = Vec::new();

    for index in 1.. {
        let Some(input) = read_entry(&mut archive, &format!("{}.in", index))? else {
            break;
        };
        let Some(output) = read_entry(&mut archive, &format!("{}.out", index))? else {
            break;
        };
        cases.push(TestCase { input, output });
    }

    Ok(cases)
}

fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, CacheError> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            Ok(Some(normalize(&content)))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Line endings unified, surrounding whitespace removed
fn normalize(content: &str) -> String {
    content.lines().collect::<Vec<_>>().join("\n").trim().to_string()
}
