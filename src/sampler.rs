use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};

/// Default TTL for the mid-cycle sample cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Point-in-time byte-usage total for a set of monitored roots.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskSample {
    pub timestamp: DateTime<Utc>,
    pub bytes_used: u64,
    pub path_label: String,
}

/// Async sampling seam consumed by the orchestrator.
///
/// The production implementation walks the filesystem on the blocking pool;
/// tests substitute scripted samplers.
#[async_trait]
pub trait UsageSampler: Send + Sync {
    /// Capture the cycle baseline. Never served from the cache.
    async fn capture_baseline(
        &self,
        roots: &[PathBuf],
        exclusions: &[PathBuf],
    ) -> Result<DiskSample>;

    /// Capture a mid-cycle sample. May be served from the TTL cache.
    async fn sample_current(
        &self,
        roots: &[PathBuf],
        exclusions: &[PathBuf],
    ) -> Result<DiskSample>;
}

/// Filesystem-backed [`UsageSampler`].
#[derive(Debug, Clone)]
pub struct DiskSampler {
    cache_ttl: Duration,
}

impl DiskSampler {
    pub fn new(cache_ttl: Duration) -> Self {
        Self { cache_ttl }
    }
}

#[async_trait]
impl UsageSampler for DiskSampler {
    async fn capture_baseline(
        &self,
        roots: &[PathBuf],
        exclusions: &[PathBuf],
    ) -> Result<DiskSample> {
        let (roots, exclusions) = (roots.to_vec(), exclusions.to_vec());
        run_blocking(move || capture_baseline(&roots, &exclusions)).await
    }

    async fn sample_current(
        &self,
        roots: &[PathBuf],
        exclusions: &[PathBuf],
    ) -> Result<DiskSample> {
        let ttl = self.cache_ttl;
        let (roots, exclusions) = (roots.to_vec(), exclusions.to_vec());
        run_blocking(move || sample_current_usage(&roots, &exclusions, ttl)).await
    }
}

async fn run_blocking<F>(work: F) -> Result<DiskSample>
where
    F: FnOnce() -> Result<DiskSample> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::IoUnavailable {
            path: "<sampler task>".to_string(),
            source: io::Error::other(e),
        })?
}

/// True when `path` equals an exclusion root or lives anywhere beneath one.
pub fn is_excluded(path: &Path, exclusions: &[PathBuf]) -> bool {
    exclusions.iter().any(|exclusion| path.starts_with(exclusion))
}

/// Walk the monitored roots and sum regular-file sizes.
///
/// Symlinks are never followed. Missing roots are skipped; a root that
/// exists but cannot be listed propagates. Inner entries that disappear or
/// deny access mid-walk are skipped and tallied.
pub fn capture_usage(roots: &[PathBuf], exclusions: &[PathBuf]) -> Result<DiskSample> {
    let mut total: u64 = 0;
    let mut skipped: u64 = 0;

    for root in roots {
        if is_excluded(root, exclusions) {
            continue;
        }
        let meta = match fs::symlink_metadata(root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %root.display(), "Monitored root missing, skipping");
                continue;
            }
            Err(e) => {
                return Err(Error::IoUnavailable {
                    path: root.display().to_string(),
                    source: e,
                })
            }
        };

        let file_type = meta.file_type();
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_file() {
            total += meta.len();
            continue;
        }
        if file_type.is_dir() {
            let entries = fs::read_dir(root).map_err(|e| Error::IoUnavailable {
                path: root.display().to_string(),
                source: e,
            })?;
            total += sum_entries(entries, exclusions, &mut skipped);
        }
    }

    if skipped > 0 {
        debug!(skipped, "Skipped inaccessible entries during disk walk");
    }

    Ok(DiskSample {
        timestamp: Utc::now(),
        bytes_used: total,
        path_label: path_label(roots),
    })
}

fn sum_entries(entries: fs::ReadDir, exclusions: &[PathBuf], skipped: &mut u64) -> u64 {
    let mut total: u64 = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                *skipped += 1;
                continue;
            }
        };
        let path = entry.path();
        if is_excluded(&path, exclusions) {
            continue;
        }
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(_) => {
                *skipped += 1;
                continue;
            }
        };
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_file() {
            match entry.metadata() {
                Ok(meta) => total += meta.len(),
                Err(_) => *skipped += 1,
            }
        } else if file_type.is_dir() {
            match fs::read_dir(&path) {
                Ok(inner) => total += sum_entries(inner, exclusions, skipped),
                Err(_) => *skipped += 1,
            }
        }
    }
    total
}

fn path_label(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---- Process-wide TTL cache ----

type CacheKey = (Vec<String>, Vec<String>);

struct CachedSample {
    stored_at: Instant,
    sample: DiskSample,
}

static SAMPLE_CACHE: OnceLock<Mutex<HashMap<CacheKey, CachedSample>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<CacheKey, CachedSample>> {
    SAMPLE_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cache_key(roots: &[PathBuf], exclusions: &[PathBuf]) -> CacheKey {
    let mut roots: Vec<String> = roots.iter().map(|p| p.display().to_string()).collect();
    let mut exclusions: Vec<String> =
        exclusions.iter().map(|p| p.display().to_string()).collect();
    roots.sort();
    exclusions.sort();
    (roots, exclusions)
}

/// Capture a cycle baseline. Always a fresh walk, never the cache.
pub fn capture_baseline(roots: &[PathBuf], exclusions: &[PathBuf]) -> Result<DiskSample> {
    capture_usage(roots, exclusions)
}

/// Capture current usage, serving repeats within `cache_ttl` from a
/// process-wide cache. The cached sample is returned unchanged, timestamp
/// included. A zero TTL disables caching.
pub fn sample_current_usage(
    roots: &[PathBuf],
    exclusions: &[PathBuf],
    cache_ttl: Duration,
) -> Result<DiskSample> {
    let key = cache_key(roots, exclusions);

    if !cache_ttl.is_zero() {
        let cached = cache().lock().expect("sample cache poisoned");
        if let Some(entry) = cached.get(&key) {
            if entry.stored_at.elapsed() < cache_ttl {
                return Ok(entry.sample.clone());
            }
        }
    }

    let sample = capture_usage(roots, exclusions)?;

    if !cache_ttl.is_zero() {
        let mut cached = cache().lock().expect("sample cache poisoned");
        cached.insert(
            key,
            CachedSample {
                stored_at: Instant::now(),
                sample: sample.clone(),
            },
        );
    }

    Ok(sample)
}

/// Drop every cached sample. Exposed for tests.
pub fn clear_sample_cache() {
    cache().lock().expect("sample cache poisoned").clear();
}
