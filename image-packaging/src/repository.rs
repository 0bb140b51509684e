// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository access and indexing.

A [RepositoryClient] is bound to one configured repository. Index
initialization follows the standard sequence: fetch
`dists/{suite}/InRelease`, falling back to `Release` + `Release.gpg`,
verify per the repository's trust policy, then fetch and verify the
`Packages` index for each component/architecture pair, preferring the
compressed variant with the best ratio (`.xz` > `.gz` > plain).

Flat repositories — lacking the `dists/` hierarchy and exposing
`Packages[.xz|.gz]` directly at the base URL — are detected by the absence
of the dists-level release files and indexed as a single pseudo-component.
*/

use {
    crate::{
        binary_package::{PackageCandidate, PackageList},
        cache::{sanitize, IndexKey},
        control::ControlParagraphReader,
        dependency::VersionConstraint,
        error::{ImagingError, Result},
        fetcher::HttpFetcher,
        io::{decompress_buffer, read_decompressed, Compression, ContentDigest},
        pipeline::CancellationToken,
        release::{ChecksumType, PackagesFileEntry, ReleaseFile},
        signature::{enforce_policy, Keyring, SignatureOutcome, TrustPolicy},
        version::PackageVersion,
    },
    log::{debug, info, warn},
    reqwest::Url,
    std::{collections::HashMap, io::Cursor, sync::Arc},
};

/// Configuration for one package repository.
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    /// Base URL of the repository (the part before `dists/`).
    pub base_url: String,

    /// Distribution suite, e.g. `bookworm`.
    pub suite: String,

    /// Components to index, e.g. `main`. Ignored for flat repositories.
    pub components: Vec<String>,

    /// Architecture override for this repository. When [None] the build's
    /// target architecture applies.
    pub arch: Option<String>,

    /// Armored OpenPGP public keys trusted to sign this repository.
    pub armored_keys: Vec<String>,

    /// Whether unsigned metadata is acceptable.
    pub trust: TrustPolicy,
}

impl RepositoryConfig {
    /// Stable identity of this repository: `(URL, suite)`.
    pub fn id(&self) -> String {
        sanitize(&format!("{}_{}", self.base_url, self.suite))
    }
}

/// A concrete candidate bound to the repository it came from.
#[derive(Debug)]
pub struct CandidateHandle {
    pub candidate: PackageCandidate<'static>,

    /// Pre-parsed identity fields, validated at index time.
    pub name: String,
    pub version: PackageVersion,
    pub architecture: String,

    pub repo_id: String,
    pub repo_priority: usize,
    base_url: Url,
}

impl CandidateHandle {
    /// Absolute URL of the package archive.
    pub fn archive_url(&self) -> Result<Url> {
        Ok(self.base_url.join(self.candidate.filename()?)?)
    }

    pub fn filename(&self) -> Result<&str> {
        self.candidate.filename()
    }

    pub fn size(&self) -> Result<u64> {
        self.candidate.size()
    }

    pub fn sha256(&self) -> Result<ContentDigest> {
        self.candidate.sha256()
    }
}

/// An indexed repository: candidates addressable by name and virtual name.
#[derive(Debug)]
pub struct RepositoryIndex {
    repo_id: String,
    priority: usize,

    /// Real package name → candidates, sorted by `(version desc, filename asc)`.
    by_name: HashMap<String, Vec<Arc<CandidateHandle>>>,

    /// Virtual name (from `Provides`) → providing candidates, in index order.
    by_provides: HashMap<String, Vec<Arc<CandidateHandle>>>,
}

impl RepositoryIndex {
    /// The repository identity this index was built from.
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Position of this repository in the configured priority order.
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// Obtain candidates for a package name, filtered by architecture and
    /// optional version constraint.
    ///
    /// Candidates with architecture `all` match any requested architecture.
    /// Results are ordered by version descending, ties broken by filename.
    pub fn get_package(
        &self,
        name: &str,
        arch: &str,
        constraint: Option<&VersionConstraint>,
    ) -> Vec<Arc<CandidateHandle>> {
        self.by_name
            .get(name)
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|c| c.architecture == arch || c.architecture == "all")
                    .filter(|c| match constraint {
                        Some(constraint) => constraint.satisfied_by(&c.version),
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Obtain candidates providing a virtual package name.
    pub fn providers_of(&self, name: &str, arch: &str) -> Vec<Arc<CandidateHandle>> {
        self.by_provides
            .get(name)
            .map(|candidates| {
                candidates
                    .iter()
                    .filter(|c| c.architecture == arch || c.architecture == "all")
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate over every candidate in this index.
    pub fn all_candidates(&self) -> impl Iterator<Item = &Arc<CandidateHandle>> {
        self.by_name.values().flatten()
    }

    /// Candidates flagged `Essential: yes` for the given architecture.
    pub fn essential_candidates(&self, arch: &str) -> Vec<Arc<CandidateHandle>> {
        let mut essentials = self
            .all_candidates()
            .filter(|c| (c.architecture == arch || c.architecture == "all") && c.candidate.essential())
            .cloned()
            .collect::<Vec<_>>();

        essentials.sort_by(|a, b| a.name.cmp(&b.name));
        essentials
    }

    /// Build an index from parsed candidates.
    pub(crate) fn from_candidates(
        repo_id: String,
        priority: usize,
        base_url: Url,
        candidates: PackageList<'static>,
    ) -> Result<Self> {
        let mut by_name: HashMap<String, Vec<Arc<CandidateHandle>>> = HashMap::new();
        let mut by_provides: HashMap<String, Vec<Arc<CandidateHandle>>> = HashMap::new();

        for candidate in candidates {
            candidate.validate()?;

            let handle = Arc::new(CandidateHandle {
                name: candidate.package()?.to_string(),
                version: candidate.version()?,
                architecture: candidate.architecture()?.to_string(),
                repo_id: repo_id.clone(),
                repo_priority: priority,
                base_url: base_url.clone(),
                candidate,
            });

            if let Some(provides) = handle.candidate.provides() {
                for dependency in provides?.iter() {
                    for alternative in dependency.alternatives() {
                        by_provides
                            .entry(alternative.name().to_string())
                            .or_default()
                            .push(handle.clone());
                    }
                }
            }

            by_name.entry(handle.name.clone()).or_default().push(handle);
        }

        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| {
                b.version.cmp(&a.version).then_with(|| {
                    let a_name = a.candidate.filename().unwrap_or_default();
                    let b_name = b.candidate.filename().unwrap_or_default();
                    a_name.cmp(&b_name)
                })
            });
        }

        Ok(Self {
            repo_id,
            priority,
            by_name,
            by_provides,
        })
    }
}

/// What kind of repository layout was detected during initialization.
enum RepositoryLayout<'a> {
    /// Standard `dists/{suite}/` hierarchy with a verified release file.
    Structured(ReleaseFile<'a>),

    /// Flat layout with an optional release file at the base URL.
    Flat(Option<ReleaseFile<'a>>),
}

/// Client bound to one configured repository.
pub struct RepositoryClient {
    fetcher: Arc<HttpFetcher>,
    config: RepositoryConfig,
    keyring: Keyring,
    root_url: Url,
}

impl RepositoryClient {
    /// Construct an instance, validating trust configuration up front.
    ///
    /// A `signed` trust policy without key material is a configuration
    /// error, surfaced here before any network I/O.
    pub fn new(fetcher: Arc<HttpFetcher>, config: RepositoryConfig) -> Result<Self> {
        let keyring = Keyring::from_armored_keys(config.armored_keys.iter().map(|s| s.as_str()))?;

        if config.trust == TrustPolicy::Signed && keyring.is_empty() {
            return Err(ImagingError::Config(format!(
                "repository {} requires signatures but supplies no key material",
                config.base_url
            )));
        }

        let mut root_url = Url::parse(&config.base_url)?;

        // Trailing slashes are significant to Url::join.
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self {
            fetcher,
            config,
            keyring,
            root_url,
        })
    }

    pub fn repo_id(&self) -> String {
        self.config.id()
    }

    fn dists_path(&self, name: &str) -> String {
        format!(
            "dists/{}/{}",
            self.config.suite.trim_matches('/'),
            name.trim_start_matches('/')
        )
    }

    async fn fetch_relative(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let url = self.root_url.join(path)?;
        self.fetcher.fetch_bytes(&url, cancel).await
    }

    /// Execute the release-discovery sequence.
    async fn discover_layout(&self, cancel: &CancellationToken) -> Result<RepositoryLayout<'static>> {
        let inrelease_path = self.dists_path("InRelease");

        match self.fetch_relative(&inrelease_path, cancel).await {
            Ok(bytes) => {
                let release = ReleaseFile::from_armored_reader(Cursor::new(bytes))?;
                let outcome = self.keyring.verify_cleartext(&release);
                enforce_policy(outcome, self.config.trust, &inrelease_path)?;

                return Ok(RepositoryLayout::Structured(release));
            }
            Err(ImagingError::NotFound(_)) => {}
            Err(e) => {
                return Err(e);
            }
        }

        let release_path = self.dists_path("Release");

        match self.fetch_relative(&release_path, cancel).await {
            Ok(bytes) => {
                let release = ReleaseFile::from_reader(Cursor::new(&bytes))?;
                let outcome = self.verify_detached(&release_path, &bytes, cancel).await?;
                enforce_policy(outcome, self.config.trust, &release_path)?;

                Ok(RepositoryLayout::Structured(release))
            }
            Err(ImagingError::NotFound(_)) => {
                debug!(
                    "{}: no dists/ release files; treating as flat repository",
                    self.config.base_url
                );
                self.discover_flat(cancel).await
            }
            Err(e) => Err(e),
        }
    }

    /// Flat-repository discovery: release files live at the base URL.
    async fn discover_flat(&self, cancel: &CancellationToken) -> Result<RepositoryLayout<'static>> {
        match self.fetch_relative("InRelease", cancel).await {
            Ok(bytes) => {
                let release = ReleaseFile::from_armored_reader(Cursor::new(bytes))?;
                let outcome = self.keyring.verify_cleartext(&release);
                enforce_policy(outcome, self.config.trust, "InRelease")?;

                return Ok(RepositoryLayout::Flat(Some(release)));
            }
            Err(ImagingError::NotFound(_)) => {}
            Err(e) => {
                return Err(e);
            }
        }

        match self.fetch_relative("Release", cancel).await {
            Ok(bytes) => {
                let release = ReleaseFile::from_reader(Cursor::new(&bytes))?;
                let outcome = self.verify_detached("Release", &bytes, cancel).await?;
                enforce_policy(outcome, self.config.trust, "Release")?;

                Ok(RepositoryLayout::Flat(Some(release)))
            }
            Err(ImagingError::NotFound(_)) => {
                // No release metadata at all; acceptance is governed by the
                // trust policy.
                enforce_policy(
                    SignatureOutcome::Unsigned,
                    self.config.trust,
                    &self.config.base_url,
                )?;

                Ok(RepositoryLayout::Flat(None))
            }
            Err(e) => Err(e),
        }
    }

    async fn verify_detached(
        &self,
        release_path: &str,
        release_bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<SignatureOutcome> {
        let signature_path = format!("{}.gpg", release_path);

        match self.fetch_relative(&signature_path, cancel).await {
            Ok(signature) => Ok(self.keyring.verify_detached(release_bytes, &signature)),
            Err(ImagingError::NotFound(_)) => Ok(SignatureOutcome::Unsigned),
            Err(e) => Err(e),
        }
    }

    /// Load the package index for the configured components at one
    /// architecture.
    pub async fn load_index(
        &self,
        arch: &str,
        priority: usize,
        cancel: &CancellationToken,
    ) -> Result<RepositoryIndex> {
        let layout = self.discover_layout(cancel).await?;

        let candidates = match &layout {
            RepositoryLayout::Structured(release) => {
                let mut candidates = PackageList::default();

                for component in &self.config.components {
                    for candidate in self.load_component(release, component, arch, cancel).await? {
                        candidates.push(candidate);
                    }
                }

                candidates
            }
            RepositoryLayout::Flat(release) => self.load_flat(release.as_ref(), cancel).await?,
        };

        info!(
            "{}: indexed {} candidates for {}",
            self.config.base_url,
            candidates.len(),
            arch
        );

        RepositoryIndex::from_candidates(
            self.repo_id(),
            priority,
            self.root_url.clone(),
            candidates,
        )
    }

    /// Select the `Packages` entry for a component/arch pair, preferring the
    /// best available compression.
    fn select_packages_entry<'release>(
        &self,
        release: &'release ReleaseFile<'release>,
        component: &str,
        arch: &str,
    ) -> Result<PackagesFileEntry<'release>> {
        let entries = release
            .iter_packages_indices(ChecksumType::Sha256)
            .ok_or(ImagingError::ReleaseNoSha256Index)?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|entry| entry.component == component && entry.architecture == arch)
            .collect::<Vec<_>>();

        for compression in Compression::default_preferred_order() {
            if let Some(entry) = entries.iter().find(|e| e.compression == compression) {
                return Ok(entry.clone());
            }
        }

        Err(ImagingError::PackagesIndexNotFound {
            component: component.to_string(),
            architecture: arch.to_string(),
        })
    }

    async fn load_component(
        &self,
        release: &ReleaseFile<'_>,
        component: &str,
        arch: &str,
        cancel: &CancellationToken,
    ) -> Result<PackageList<'static>> {
        let entry = self.select_packages_entry(release, component, arch)?;

        let index_key = IndexKey {
            repo_id: self.repo_id(),
            suite: self.config.suite.clone(),
            component: component.to_string(),
            architecture: arch.to_string(),
            sha256: entry.digest.digest_hex(),
        };

        if let Some(data) = self.fetcher.cache().load_index(&index_key)? {
            debug!(
                "{}: using cached index for {}/{}",
                self.config.base_url, component, arch
            );
            return parse_packages(&data);
        }

        let fetch_path = if release.acquire_by_hash().unwrap_or_default() {
            entry.by_hash_path()
        } else {
            entry.path.to_string()
        };

        let relative = self.dists_path(&fetch_path);
        let compressed = self.fetch_relative(&relative, cancel).await?;

        verify_index_bytes(&compressed, entry.size, &entry.digest, &relative)?;

        // Stream the verified bytes through the matching decompressor.
        let stream = read_decompressed(
            Box::pin(futures::io::Cursor::new(compressed)),
            entry.compression,
        );
        let mut data = Vec::new();
        futures::io::copy(stream, &mut data).await?;

        let origin = self.root_url.join(&relative)?;
        self.fetcher
            .cache()
            .store_index(&index_key, &data, origin.as_str())?;

        parse_packages(&data)
    }

    /// Fetch a flat repository's `Packages` index directly at the base URL.
    async fn load_flat(
        &self,
        release: Option<&ReleaseFile<'_>>,
        cancel: &CancellationToken,
    ) -> Result<PackageList<'static>> {
        for compression in Compression::default_preferred_order() {
            let name = format!("Packages{}", compression.extension());

            let compressed = match self.fetch_relative(&name, cancel).await {
                Ok(bytes) => bytes,
                Err(ImagingError::NotFound(_)) => {
                    continue;
                }
                Err(e) => {
                    return Err(e);
                }
            };

            // When a release file is present it pins the index digest.
            if let Some(release) = release {
                if let Some(entry) = release.index_entry_by_path(ChecksumType::Sha256, &name) {
                    let entry = entry?;
                    verify_index_bytes(&compressed, entry.size, &entry.digest, &name)?;
                }
            }

            return parse_packages(&decompress_buffer(&compressed, compression)?);
        }

        Err(ImagingError::NotFound(format!(
            "{}: no Packages index found at base URL",
            self.config.base_url
        )))
    }
}

fn verify_index_bytes(
    data: &[u8],
    expected_size: u64,
    expected_digest: &ContentDigest,
    path: &str,
) -> Result<()> {
    let actual = ContentDigest::sha256_of(data);

    if data.len() as u64 != expected_size || actual.digest_bytes() != expected_digest.digest_bytes()
    {
        warn!("index {} failed checksum verification", path);

        return Err(ImagingError::Integrity {
            url: path.to_string(),
            expected: expected_digest.digest_hex(),
            actual: actual.digest_hex(),
        });
    }

    Ok(())
}

/// Parse a decompressed `Packages` file into candidates.
fn parse_packages(data: &[u8]) -> Result<PackageList<'static>> {
    let mut packages = PackageList::default();

    for paragraph in ControlParagraphReader::new(Cursor::new(data)) {
        packages.push(PackageCandidate::from(paragraph?));
    }

    Ok(packages)
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    fn handle(data: &str, priority: usize) -> RepositoryIndex {
        let candidates = parse_packages(data.as_bytes()).unwrap();

        RepositoryIndex::from_candidates(
            "test_repo".to_string(),
            priority,
            Url::parse("http://example.com/debian/").unwrap(),
            candidates,
        )
        .unwrap()
    }

    const INDEX: &str = indoc! {"
        Package: busybox
        Version: 1.35.0-4
        Architecture: arm64
        Filename: pool/main/b/busybox/busybox_1.35.0-4_arm64.deb
        Size: 438292
        SHA256: 9e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4

        Package: busybox
        Version: 1.36.1-1
        Architecture: arm64
        Filename: pool/main/b/busybox/busybox_1.36.1-1_arm64.deb
        Size: 440001
        SHA256: 1e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4

        Package: postfix
        Version: 3.7.4-2
        Architecture: arm64
        Provides: mail-transport-agent
        Filename: pool/main/p/postfix/postfix_3.7.4-2_arm64.deb
        Size: 100
        SHA256: 2e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4

        Package: tzdata
        Version: 2023c-5
        Architecture: all
        Essential: yes
        Filename: pool/main/t/tzdata/tzdata_2023c-5_all.deb
        Size: 200
        SHA256: 3e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4
    "};

    #[test]
    fn name_lookup_sorted_by_version() {
        let index = handle(INDEX, 0);

        let candidates = index.get_package("busybox", "arm64", None);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].version.to_string(), "1.36.1-1");
        assert_eq!(candidates[1].version.to_string(), "1.35.0-4");
    }

    #[test]
    fn arch_all_matches_any_arch() {
        let index = handle(INDEX, 0);

        assert_eq!(index.get_package("tzdata", "arm64", None).len(), 1);
        assert_eq!(index.get_package("tzdata", "amd64", None).len(), 1);
        assert!(index.get_package("busybox", "amd64", None).is_empty());
    }

    #[test]
    fn constraint_filtering() {
        let index = handle(INDEX, 0);

        let constraint = VersionConstraint {
            relation: crate::dependency::VersionRelation::StrictlyEarlier,
            version: PackageVersion::parse("1.36").unwrap(),
        };

        let candidates = index.get_package("busybox", "arm64", Some(&constraint));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].version.to_string(), "1.35.0-4");
    }

    #[test]
    fn provides_lookup() {
        let index = handle(INDEX, 0);

        let providers = index.providers_of("mail-transport-agent", "arm64");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "postfix");
    }

    #[test]
    fn essential_lookup() {
        let index = handle(INDEX, 0);

        let essentials = index.essential_candidates("arm64");
        assert_eq!(essentials.len(), 1);
        assert_eq!(essentials[0].name, "tzdata");
    }

    #[test]
    fn packages_entry_prefers_best_compression() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            Arc::new(HttpFetcher::new(crate::cache::Cache::new(dir.path()).unwrap()).unwrap());

        let client = RepositoryClient::new(
            fetcher,
            RepositoryConfig {
                base_url: "http://example.com/debian".to_string(),
                suite: "bookworm".to_string(),
                components: vec!["main".to_string()],
                arch: None,
                armored_keys: vec![],
                trust: TrustPolicy::UnsignedAllowed,
            },
        )
        .unwrap();

        let release = ReleaseFile::from_reader(Cursor::new(indoc! {"
            Suite: bookworm
            SHA256:
             9e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4 100 main/binary-arm64/Packages
             8e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4 50 main/binary-arm64/Packages.gz
             7e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4 30 main/binary-arm64/Packages.xz
        "}))
        .unwrap();

        let entry = client
            .select_packages_entry(&release, "main", "arm64")
            .unwrap();
        assert_eq!(entry.compression, Compression::Xz);
        assert_eq!(entry.size, 30);

        // Without the xz variant, gzip wins over plain.
        let release = ReleaseFile::from_reader(Cursor::new(indoc! {"
            Suite: bookworm
            SHA256:
             9e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4 100 main/binary-arm64/Packages
             8e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4 50 main/binary-arm64/Packages.gz
        "}))
        .unwrap();

        let entry = client
            .select_packages_entry(&release, "main", "arm64")
            .unwrap();
        assert_eq!(entry.compression, Compression::Gzip);
    }

    #[test]
    fn signed_policy_without_keys_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            Arc::new(HttpFetcher::new(crate::cache::Cache::new(dir.path()).unwrap()).unwrap());

        let res = RepositoryClient::new(
            fetcher,
            RepositoryConfig {
                base_url: "http://example.com/debian".to_string(),
                suite: "bookworm".to_string(),
                components: vec!["main".to_string()],
                arch: None,
                armored_keys: vec![],
                trust: TrustPolicy::Signed,
            },
        );

        assert!(matches!(res, Err(ImagingError::Config(_))));
    }
}
