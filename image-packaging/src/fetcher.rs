// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP(S) fetching with on-disk caching.

The fetcher downloads repository metadata and package archives. Downloads
land in the [Cache]'s blob store keyed by content digest; a fetch whose
expected digest is already present performs no network I/O. Transient
failures (connection reset, 5xx, 408, 429) are retried up to
[MAX_ATTEMPTS] times with exponential backoff. Partial downloads are
resumed with `Range` requests when the server advertised `Accept-Ranges`.

Proxies are honored via reqwest's system proxy support
(`HTTP_PROXY`/`HTTPS_PROXY`).
*/

use {
    crate::{
        cache::{sanitize, Cache},
        error::{ImagingError, Result},
        io::ContentDigest,
        pipeline::CancellationToken,
    },
    digest::Digest,
    log::{debug, warn},
    reqwest::{header, Client, StatusCode, Url},
    sha2::Sha256,
    std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration},
    tokio::{
        fs,
        io::AsyncWriteExt,
        sync::Mutex,
    },
};

/// Maximum download attempts per URL.
pub const MAX_ATTEMPTS: u32 = 5;

/// Base delay for exponential backoff between attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Whether an HTTP status should be retried.
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// HTTP fetcher bound to a shared [Cache].
///
/// Safe to call from multiple workers; a per-URL single-flight lock ensures
/// concurrent requests for the same URL share one download.
pub struct HttpFetcher {
    client: Client,
    cache: Cache,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HttpFetcher {
    /// Construct an instance writing into the given cache.
    pub fn new(cache: Cache) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ImagingError::Config(format!("HTTP client construction: {}", e)))?;

        Ok(Self {
            client,
            cache,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// The cache this fetcher writes into.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Fetch a small resource fully into memory, with retries.
    ///
    /// Intended for release files and signatures, which are volatile and not
    /// cached. Returns [ImagingError::NotFound] on 404.
    pub async fn fetch_bytes(&self, url: &Url, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut last_message = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            cancel.check()?;

            if attempt > 1 {
                backoff(attempt, cancel).await?;
            }

            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status == StatusCode::NOT_FOUND {
                        return Err(ImagingError::NotFound(url.to_string()));
                    }

                    if status.is_success() {
                        match response.bytes().await {
                            Ok(bytes) => {
                                return Ok(bytes.to_vec());
                            }
                            Err(e) => {
                                last_message = format!("error reading body: {}", e);
                                continue;
                            }
                        }
                    }

                    last_message = format!("HTTP status {}", status);

                    if !is_retryable_status(status) {
                        return Err(ImagingError::Network {
                            url: url.to_string(),
                            attempts: attempt,
                            message: last_message,
                        });
                    }
                }
                Err(e) => {
                    last_message = format!("request error: {}", e);
                }
            }

            debug!("fetch attempt {}/{} for {} failed: {}", attempt, MAX_ATTEMPTS, url, last_message);
        }

        Err(ImagingError::Network {
            url: url.to_string(),
            attempts: MAX_ATTEMPTS,
            message: last_message,
        })
    }

    /// Fetch an artifact into the cache, returning its local path.
    ///
    /// If `expected` is supplied and a cached blob matches, no network I/O
    /// is performed. On digest mismatch of a freshly downloaded file, the
    /// entry is invalidated and one re-download is attempted before
    /// [ImagingError::Integrity] is surfaced.
    pub async fn fetch_artifact(
        &self,
        url: &Url,
        expected: Option<&ContentDigest>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        // Fast path outside the single-flight lock.
        if let Some(path) = self.cached_artifact(url, expected).await? {
            return Ok(path);
        }

        let gate = self.acquire_flight(url).await;
        let _guard = gate.lock().await;

        // Another worker may have completed the download while this one
        // waited on the gate.
        if let Some(path) = self.cached_artifact(url, expected).await? {
            self.release_flight(url).await;
            return Ok(path);
        }

        let res = self.download_with_integrity_retry(url, expected, cancel).await;
        self.release_flight(url).await;

        res
    }

    /// Check the blob store for a usable cached artifact.
    ///
    /// The expected digest is re-verified against the file content on every
    /// use; a corrupt entry is invalidated.
    async fn cached_artifact(
        &self,
        url: &Url,
        expected: Option<&ContentDigest>,
    ) -> Result<Option<PathBuf>> {
        let expected = match expected {
            Some(digest @ ContentDigest::Sha256(_)) => digest,
            _ => {
                return Ok(None);
            }
        };

        let hex = expected.digest_hex();

        if !self.cache.has_blob(&hex) {
            return Ok(None);
        }

        let path = self.cache.blob_path(&hex);
        let data = fs::read(&path).await?;
        let actual = ContentDigest::sha256_of(&data);

        if actual.digest_bytes() == expected.digest_bytes() {
            debug!("cache hit for {} ({})", url, hex);
            Ok(Some(path))
        } else {
            warn!("cache entry for {} is corrupt; invalidating", url);
            self.cache.invalidate_blob(&hex)?;
            Ok(None)
        }
    }

    async fn download_with_integrity_retry(
        &self,
        url: &Url,
        expected: Option<&ContentDigest>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        match self.download(url, expected, cancel).await {
            Err(ImagingError::Integrity { .. }) => {
                warn!("integrity mismatch downloading {}; retrying once", url);
                self.download(url, expected, cancel).await
            }
            res => res,
        }
    }

    /// Download a URL to the blob store with transient-failure retries.
    async fn download(
        &self,
        url: &Url,
        expected: Option<&ContentDigest>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let part_path = self
            .cache
            .blob_path(&format!(".part-{}", sanitize(url.as_str())));

        let mut resume_supported = false;
        let mut last_message = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            cancel.check()?;

            if attempt > 1 {
                backoff(attempt, cancel).await?;
            }

            match self
                .attempt_download(url, &part_path, resume_supported, cancel)
                .await
            {
                Ok(DownloadOutcome::Complete { sha256_hex }) => {
                    if let Some(expected) = expected {
                        if expected.digest_hex() != sha256_hex {
                            fs::remove_file(&part_path).await.ok();

                            return Err(ImagingError::Integrity {
                                url: url.to_string(),
                                expected: expected.digest_hex(),
                                actual: sha256_hex,
                            });
                        }
                    }

                    return self
                        .cache
                        .publish_blob(&part_path, &sha256_hex, url.as_str());
                }
                Ok(DownloadOutcome::NotFound) => {
                    return Err(ImagingError::NotFound(url.to_string()));
                }
                Ok(DownloadOutcome::Fatal { message }) => {
                    return Err(ImagingError::Network {
                        url: url.to_string(),
                        attempts: attempt,
                        message,
                    });
                }
                Ok(DownloadOutcome::Transient {
                    message,
                    server_resumes,
                }) => {
                    resume_supported = server_resumes;

                    if !server_resumes {
                        fs::remove_file(&part_path).await.ok();
                    }

                    last_message = message;
                }
                Err(ImagingError::Cancelled) => {
                    // Keep the .part file only when the server can resume it.
                    if !resume_supported {
                        fs::remove_file(&part_path).await.ok();
                    }

                    return Err(ImagingError::Cancelled);
                }
                Err(e) => {
                    return Err(e);
                }
            }

            debug!(
                "download attempt {}/{} for {} failed: {}",
                attempt, MAX_ATTEMPTS, url, last_message
            );
        }

        Err(ImagingError::Network {
            url: url.to_string(),
            attempts: MAX_ATTEMPTS,
            message: last_message,
        })
    }

    async fn attempt_download(
        &self,
        url: &Url,
        part_path: &std::path::Path,
        resume: bool,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let mut request = self.client.get(url.clone());

        let mut offset = 0u64;
        if resume {
            if let Ok(meta) = fs::metadata(part_path).await {
                offset = meta.len();
            }
        }

        if offset > 0 {
            request = request.header(header::RANGE, format!("bytes={}-", offset));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(DownloadOutcome::Transient {
                    message: format!("request error: {}", e),
                    server_resumes: false,
                });
            }
        };

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(DownloadOutcome::NotFound);
        }

        let appending = status == StatusCode::PARTIAL_CONTENT && offset > 0;

        if !status.is_success() {
            return Ok(if is_retryable_status(status) {
                DownloadOutcome::Transient {
                    message: format!("HTTP status {}", status),
                    server_resumes: false,
                }
            } else {
                DownloadOutcome::Fatal {
                    message: format!("HTTP status {}", status),
                }
            });
        }

        let server_resumes = appending
            || response
                .headers()
                .get(header::ACCEPT_RANGES)
                .map(|v| v != "none")
                .unwrap_or(false);

        let mut hasher = Sha256::new();
        let mut file = if appending {
            // Replay already-written bytes into the hasher before appending.
            hasher.update(&fs::read(part_path).await?);

            fs::OpenOptions::new().append(true).open(part_path).await?
        } else {
            fs::File::create(part_path).await?
        };

        let mut response = response;

        loop {
            if cancel.is_cancelled() {
                file.flush().await?;
                return Err(ImagingError::Cancelled);
            }

            match response.chunk().await {
                Ok(Some(chunk)) => {
                    hasher.update(&chunk);
                    file.write_all(&chunk).await?;
                }
                Ok(None) => {
                    break;
                }
                Err(e) => {
                    file.flush().await?;

                    return Ok(DownloadOutcome::Transient {
                        message: format!("stream error: {}", e),
                        server_resumes,
                    });
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;

        Ok(DownloadOutcome::Complete {
            sha256_hex: hex::encode(hasher.finalize()),
        })
    }

    async fn acquire_flight(&self, url: &Url) -> Arc<Mutex<()>> {
        let mut inflight = self.inflight.lock().await;

        inflight
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_flight(&self, url: &Url) {
        let mut inflight = self.inflight.lock().await;

        if let Some(gate) = inflight.get(url.as_str()) {
            // Last holder out removes the entry.
            if Arc::strong_count(gate) <= 2 {
                inflight.remove(url.as_str());
            }
        }
    }
}

enum DownloadOutcome {
    Complete { sha256_hex: String },
    NotFound,
    Transient { message: String, server_resumes: bool },
    Fatal { message: String },
}

async fn backoff(attempt: u32, cancel: &CancellationToken) -> Result<()> {
    cancel.check()?;
    tokio::time::sleep(BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(2))).await;
    cancel.check()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retryable_status_classification() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn cache_hit_avoids_network() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path())?;

        // Pre-seed the cache with the artifact.
        let (digest, seeded) = cache.store_blob(b"deb content", "http://unreachable.invalid/a.deb")?;

        let fetcher = HttpFetcher::new(cache)?;
        let url = Url::parse("http://unreachable.invalid/a.deb")?;
        let cancel = CancellationToken::default();

        // The host does not resolve, so a network attempt would error.
        let path = fetcher.fetch_artifact(&url, Some(&digest), &cancel).await?;
        assert_eq!(path, seeded);

        Ok(())
    }

    #[tokio::test]
    async fn cancelled_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(Cache::new(dir.path()).unwrap()).unwrap();
        let url = Url::parse("http://unreachable.invalid/a.deb").unwrap();

        let cancel = CancellationToken::default();
        cancel.cancel();

        assert!(matches!(
            fetcher.fetch_bytes(&url, &cancel).await,
            Err(ImagingError::Cancelled)
        ));
    }
}
