//! HuggingFace file download with progress reporting and a local cache.
//!
//! Files land in `<cache>/<owner>--<repo>/<path>`. A download streams into a
//! `.part` sibling and is renamed only once complete, so an interrupted
//! fetch never leaves a truncated file that looks cached.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::loader::{ProgressReporter, ResourceProgress};
use crate::error::LoadError;

/// Minimum interval between progress events for one file.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct HubFetcher {
    endpoint: String,
    cache_dir: PathBuf,
}

impl HubFetcher {
    pub fn new(endpoint: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cached_path(&self, repo: &str, file: &str) -> PathBuf {
        self.cache_dir.join(repo.replace('/', "--")).join(file)
    }

    pub fn file_url(&self, repo: &str, file: &str) -> String {
        format!(
            "{}/{repo}/resolve/main/{file}",
            self.endpoint.trim_end_matches('/')
        )
    }

    /// Fetch one file, reporting it under its repo-relative name.
    pub fn fetch(
        &self,
        repo: &str,
        file: &str,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, LoadError> {
        let mut resource = progress.resource(file);
        let dest = self.cached_path(repo, file);

        if dest.is_file() {
            log::debug!("Cache hit: {}", dest.display());
            resource.update(100.0);
            resource.finish();
            return Ok(dest);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LoadError::fetch(file, e))?;
        }

        let url = self.file_url(repo, file);
        log::info!("Downloading {url}");
        let response = ureq::get(&url)
            .set("User-Agent", "fixity-caption/0.1")
            .call()
            .map_err(|e| {
                log::error!("Fetching {file} failed: {e}");
                LoadError::fetch(file, e)
            })?;

        let total: u64 = response
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let part = part_path(&dest);
        let result = stream_to_file(response.into_reader(), &part, total, &mut resource);
        if let Err(e) = result {
            log::error!("Download of {file} failed: {e}");
            let _ = std::fs::remove_file(&part);
            return Err(LoadError::fetch(file, e));
        }

        std::fs::rename(&part, &dest).map_err(|e| LoadError::fetch(file, e))?;
        log::info!("Downloaded {file} ({total} bytes)");

        resource.update(100.0);
        resource.finish();
        Ok(dest)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Copy `reader` into `path`, emitting throttled percentages when the size is known.
///
/// Stops with an error when the load is cancelled or the body is shorter
/// than the announced length.
fn stream_to_file(
    mut reader: impl Read,
    path: &Path,
    total: u64,
    resource: &mut ResourceProgress,
) -> std::io::Result<u64> {
    let mut file = std::fs::File::create(path)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;
    let mut last_progress = Instant::now();

    loop {
        if resource.is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "load cancelled",
            ));
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;

        if total > 0 && last_progress.elapsed() >= PROGRESS_INTERVAL {
            resource.update(downloaded as f64 * 100.0 / total as f64);
            last_progress = Instant::now();
        }
    }

    file.flush()?;
    if total > 0 && downloaded != total {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("body ended after {downloaded} of {total} bytes"),
        ));
    }
    Ok(downloaded)
}
