// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! On-disk artifact cache.

The cache directory contains three subtrees:

* `blobs/` — downloaded artifacts addressed by their SHA-256 hex digest,
  each with a JSON sidecar recording the origin URL and fetch time.
* `indexes/` — decompressed `Packages` indices keyed by repository,
  suite, component, and architecture. The key also incorporates the digest
  the `Release` file advertised, so diverging mirrors cannot alias.
* `staging/<build-id>/` — transient staging trees.

All writes follow O_EXCL + atomic-rename discipline so concurrent workers
sharing a cache directory never observe partial entries.
*/

use {
    crate::{
        error::{ImagingError, Result},
        io::ContentDigest,
    },
    serde::{Deserialize, Serialize},
    std::{
        fs,
        io::Write,
        path::{Path, PathBuf},
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Sidecar metadata describing a cache entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EntryMetadata {
    /// URL the entry was fetched from.
    pub origin_url: String,

    /// SHA-256 hex digest of the entry content.
    pub sha256: String,

    /// Seconds since the Unix epoch when the entry was stored.
    pub fetched_at: u64,
}

/// Key identifying a cached, decompressed `Packages` index.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct IndexKey {
    pub repo_id: String,
    pub suite: String,
    pub component: String,
    pub architecture: String,
    /// Hex digest of the index as advertised by the `Release` file.
    pub sha256: String,
}

impl IndexKey {
    fn file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            sanitize(&self.suite),
            sanitize(&self.component),
            sanitize(&self.architecture),
            &self.sha256[0..16.min(self.sha256.len())]
        )
    }
}

/// Reduce a string to characters safe in a single path component.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '.' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Process-external on-disk store for downloaded and derived artifacts.
#[derive(Clone, Debug)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    /// Open (creating if necessary) a cache rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        for subdir in ["blobs", "indexes", "staging"] {
            fs::create_dir_all(root.join(subdir))?;
        }

        Ok(Self { root })
    }

    /// Open the default per-user cache for a named tool
    /// (`$HOME/.cache/<tool>`).
    pub fn default_for_tool(tool: &str) -> Result<Self> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| ImagingError::Config("HOME is not set".to_string()))?;

        Self::new(PathBuf::from(home).join(".cache").join(tool))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The path a blob with the given digest would occupy.
    pub fn blob_path(&self, sha256_hex: &str) -> PathBuf {
        self.root.join("blobs").join(sha256_hex)
    }

    /// Whether a blob with the given digest is present.
    pub fn has_blob(&self, sha256_hex: &str) -> bool {
        self.blob_path(sha256_hex).is_file()
    }

    /// Move a fully-written temporary file into the blob store.
    ///
    /// The caller must have verified the content digest already; this only
    /// performs the atomic publication.
    pub fn publish_blob(&self, tmp: &Path, sha256_hex: &str, origin_url: &str) -> Result<PathBuf> {
        let dest = self.blob_path(sha256_hex);

        self.write_sidecar(&dest, sha256_hex, origin_url)?;
        fs::rename(tmp, &dest)?;

        Ok(dest)
    }

    /// Store a buffer in the blob store, returning its digest and path.
    pub fn store_blob(&self, data: &[u8], origin_url: &str) -> Result<(ContentDigest, PathBuf)> {
        let digest = ContentDigest::sha256_of(data);
        let hex = digest.digest_hex();
        let dest = self.blob_path(&hex);

        if !dest.is_file() {
            let tmp = self.write_temp(&dest, data)?;
            self.write_sidecar(&dest, &hex, origin_url)?;
            fs::rename(tmp, &dest)?;
        }

        Ok((digest, dest))
    }

    /// Remove a blob and its sidecar, e.g. after an integrity failure.
    pub fn invalidate_blob(&self, sha256_hex: &str) -> Result<()> {
        let path = self.blob_path(sha256_hex);

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e.into());
            }
        }

        let _ = fs::remove_file(sidecar_path(&path));

        Ok(())
    }

    /// Load a cached decompressed index, verifying its content digest
    /// against the sidecar on every use.
    ///
    /// The key incorporates the digest the `Release` file advertised for the
    /// compressed index, so a repository publishing new content under the
    /// same path misses cleanly.
    pub fn load_index(&self, key: &IndexKey) -> Result<Option<Vec<u8>>> {
        let path = self.index_path(key);

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => {
                return Err(e.into());
            }
        };

        let meta = self.read_sidecar(&path)?;
        let actual = ContentDigest::sha256_of(&data).digest_hex();

        match meta {
            Some(meta) if meta.sha256 == actual => Ok(Some(data)),
            _ => {
                // Sidecar missing or content corrupt. Drop the stale entry.
                let _ = fs::remove_file(&path);
                let _ = fs::remove_file(sidecar_path(&path));
                Ok(None)
            }
        }
    }

    /// Store a decompressed index under its composite key.
    pub fn store_index(&self, key: &IndexKey, data: &[u8], origin_url: &str) -> Result<PathBuf> {
        let path = self.index_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content_hex = ContentDigest::sha256_of(data).digest_hex();

        let tmp = self.write_temp(&path, data)?;
        self.write_sidecar(&path, &content_hex, origin_url)?;
        fs::rename(tmp, &path)?;

        Ok(path)
    }

    /// Obtain (creating) a transient staging directory for a build.
    pub fn staging_dir(&self, build_id: &str) -> Result<PathBuf> {
        let dir = self.root.join("staging").join(sanitize(build_id));
        fs::create_dir_all(&dir)?;

        Ok(dir)
    }

    /// Remove every cached entry.
    pub fn purge(&self) -> Result<()> {
        for subdir in ["blobs", "indexes", "staging"] {
            let dir = self.root.join(subdir);
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;
        }

        Ok(())
    }

    fn index_path(&self, key: &IndexKey) -> PathBuf {
        self.root
            .join("indexes")
            .join(sanitize(&key.repo_id))
            .join(key.file_name())
    }

    /// Write data to a uniquely-named temporary file next to `dest`.
    fn write_temp(&self, dest: &Path, data: &[u8]) -> Result<PathBuf> {
        let tmp = temp_path(dest);

        let mut fh = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        fh.write_all(data)?;
        fh.sync_all()?;

        Ok(tmp)
    }

    fn write_sidecar(&self, dest: &Path, sha256: &str, origin_url: &str) -> Result<()> {
        let meta = EntryMetadata {
            origin_url: origin_url.to_string(),
            sha256: sha256.to_string(),
            fetched_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };

        let path = sidecar_path(dest);
        let tmp = temp_path(&path);

        let mut fh = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        fh.write_all(&serde_json::to_vec_pretty(&meta)?)?;
        fs::rename(tmp, path)?;

        Ok(())
    }

    fn read_sidecar(&self, dest: &Path) -> Result<Option<EntryMetadata>> {
        match fs::read(sidecar_path(dest)) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn sidecar_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .expect("cache entries always have a file name")
        .to_os_string();
    name.push(".meta.json");

    dest.with_file_name(name)
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .expect("cache entries always have a file name")
        .to_os_string();
    name.push(format!(".tmp.{}", std::process::id()));

    dest.with_file_name(name)
}

#[cfg(test)]
mod test {
    use super::*;

    fn cache() -> (tempfile::TempDir, Cache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache")).unwrap();

        (dir, cache)
    }

    #[test]
    fn blob_round_trip() -> Result<()> {
        let (_dir, cache) = cache();

        let (digest, path) = cache.store_blob(b"payload", "http://example/pool/a.deb")?;
        assert!(cache.has_blob(&digest.digest_hex()));
        assert_eq!(fs::read(&path)?, b"payload");

        // Sidecar is self-describing.
        let meta = cache.read_sidecar(&path)?.unwrap();
        assert_eq!(meta.origin_url, "http://example/pool/a.deb");
        assert_eq!(meta.sha256, digest.digest_hex());

        cache.invalidate_blob(&digest.digest_hex())?;
        assert!(!cache.has_blob(&digest.digest_hex()));

        Ok(())
    }

    #[test]
    fn index_round_trip_and_digest_check() -> Result<()> {
        let (_dir, cache) = cache();

        let data = b"Package: a\n".to_vec();
        let key = IndexKey {
            repo_id: "http___deb_debian_org_debian".to_string(),
            suite: "bookworm".to_string(),
            component: "main".to_string(),
            architecture: "arm64".to_string(),
            sha256: ContentDigest::sha256_of(&data).digest_hex(),
        };

        assert!(cache.load_index(&key)?.is_none());

        cache.store_index(&key, &data, "http://deb.debian.org/...")?;
        assert_eq!(cache.load_index(&key)?, Some(data));

        // A key with a different advertised digest misses.
        let other = IndexKey {
            sha256: ContentDigest::sha256_of(b"different").digest_hex(),
            ..key
        };
        assert!(cache.load_index(&other)?.is_none());

        Ok(())
    }

    #[test]
    fn purge_clears_everything() -> Result<()> {
        let (_dir, cache) = cache();

        let (digest, _) = cache.store_blob(b"x", "http://example/x")?;
        cache.purge()?;
        assert!(!cache.has_blob(&digest.digest_hex()));

        Ok(())
    }
}
