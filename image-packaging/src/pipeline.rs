// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build orchestration.

A build runs in stages: repository indexing and dependency resolution,
concurrent archive fetching (network-bound, default degree 8), concurrent
archive parsing (CPU-bound, bounded by worker degree), a serial merge into
the staging tree in install-set order, overlay application, and a serial
composition stage.

Every long-running stage observes a [CancellationToken]. A cancelled build
cleans its staging directory unless `keep_staging` is set.
*/

use {
    crate::{
        compose::{compose, ComposeOptions, OutputFormat},
        deb::DebArchive,
        dependency::PackageRef,
        error::{ImagingError, Result},
        fetcher::HttpFetcher,
        io::ContentDigest,
        repository::{RepositoryClient, RepositoryConfig, RepositoryIndex},
        resolver::{InstallSet, Resolver},
        staging::StagingTree,
    },
    futures::StreamExt,
    log::{debug, info},
    std::{
        collections::BTreeMap,
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
    tokio::sync::Semaphore,
};

/// Cooperative cancellation signal propagated from the top-level build.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every observer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was signalled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ImagingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A host file or directory overlaid onto the staged tree after extraction.
#[derive(Clone, Debug)]
pub struct OverlaySpec {
    pub source: PathBuf,

    /// Target path within the image. Defaults to the source file name at
    /// the image root.
    pub destination: Option<String>,

    pub mode: Option<u32>,
    pub uid: u32,
    pub gid: u32,
}

/// Everything the core needs to produce one artifact.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub repos: Vec<RepositoryConfig>,

    /// Root packages; entries may embed version constraints
    /// (`busybox (>= 1.35)`).
    pub packages: Vec<String>,

    /// Explicit version pins: `(package, exact version)`.
    pub pins: Vec<(String, String)>,

    pub arch: String,
    pub overlays: Vec<OverlaySpec>,
    pub output_format: OutputFormat,
    pub reproducible: bool,

    /// Explicit `SOURCE_DATE_EPOCH` override.
    pub source_date_epoch: Option<u64>,

    pub include_essential: bool,

    /// Fetch parallelism. I/O bound; independent of CPU count.
    pub network_degree: usize,

    /// Decompression/parse parallelism.
    pub worker_degree: usize,

    /// Keep the staging directory after the build (or after cancellation).
    pub keep_staging: bool,

    /// Identifier for the staging subtree.
    pub build_id: String,
}

impl BuildRequest {
    /// A request with the default concurrency model.
    pub fn new(arch: impl ToString, output_format: OutputFormat) -> Self {
        Self {
            repos: vec![],
            packages: vec![],
            pins: vec![],
            arch: arch.to_string(),
            overlays: vec![],
            output_format,
            reproducible: false,
            source_date_epoch: None,
            include_essential: false,
            network_degree: 8,
            worker_degree: num_cpus::get().max(1),
            keep_staging: false,
            build_id: "build".to_string(),
        }
    }
}

/// Auditing record for one extracted package.
#[derive(Clone, Debug)]
pub struct PackageAudit {
    pub name: String,
    pub version: String,
    pub sha256: String,
    pub conffiles: Vec<String>,

    /// `(hex digest, path)` pairs from the package's `md5sums` manifest.
    pub md5sums: Vec<(String, String)>,

    /// Maintainer scripts recorded during extraction. Never executed by
    /// the core.
    pub maintainer_scripts: BTreeMap<String, Vec<u8>>,
}

/// Result of a successful build.
pub struct BuildReport {
    /// `(name, version)` pairs in unpack order.
    pub packages: Vec<(String, String)>,

    pub audits: Vec<PackageAudit>,

    /// The composed artifact.
    pub artifact: Vec<u8>,

    /// SHA-256 hex of the artifact.
    pub sha256: String,

    /// Staging directory, when `keep_staging` was set.
    pub staging_path: Option<PathBuf>,
}

/// Stages 1–5 of a build: a populated staging tree plus the install set
/// and per-package audit records, before composition.
pub struct StagedBuild {
    pub staging: StagingTree,
    pub install_set: InstallSet,
    pub audits: Vec<PackageAudit>,
    staging_base: PathBuf,
}

impl StagedBuild {
    /// The directory the staging tree lives under.
    pub fn staging_base(&self) -> &std::path::Path {
        &self.staging_base
    }

    /// Remove the staging directory from disk.
    pub fn discard(self) {
        let _ = std::fs::remove_dir_all(&self.staging_base);
    }
}

/// Execute a build request end to end.
pub async fn run_build(
    fetcher: Arc<HttpFetcher>,
    request: BuildRequest,
    cancel: &CancellationToken,
) -> Result<BuildReport> {
    let staged = stage_packages(fetcher, &request, cancel).await?;

    // Final stage: serial composition.
    let compose_res = (|| {
        cancel.check()?;

        let options = ComposeOptions {
            reproducible: request.reproducible,
            source_date_epoch: request.source_date_epoch,
        };

        compose(&staged.staging, request.output_format, &options)
    })();

    let artifact = match compose_res {
        Ok(artifact) => artifact,
        Err(e) => {
            if !request.keep_staging {
                staged.discard();
            }
            return Err(e);
        }
    };

    let sha256 = ContentDigest::sha256_of(&artifact).digest_hex();

    let packages = staged
        .install_set
        .iter()
        .map(|c| (c.name.clone(), c.version.to_string()))
        .collect();

    let audits = staged.audits.clone();

    let staging_path = if request.keep_staging {
        Some(staged.staging_base.clone())
    } else {
        staged.discard();
        None
    };

    Ok(BuildReport {
        packages,
        audits,
        artifact,
        sha256,
        staging_path,
    })
}

/// Resolve, fetch, extract, and overlay, yielding the staging tree.
///
/// A failed (or cancelled) staging run cleans its directory unless
/// `keep_staging` is set.
pub async fn stage_packages(
    fetcher: Arc<HttpFetcher>,
    request: &BuildRequest,
    cancel: &CancellationToken,
) -> Result<StagedBuild> {
    let staging_base = fetcher.cache().staging_dir(&request.build_id)?;

    let res = stage_inner(fetcher, request, &staging_base, cancel).await;

    if res.is_err() && !request.keep_staging {
        debug!("cleaning staging directory {}", staging_base.display());
        let _ = std::fs::remove_dir_all(&staging_base);
    }

    res
}

async fn stage_inner(
    fetcher: Arc<HttpFetcher>,
    request: &BuildRequest,
    staging_base: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<StagedBuild> {
    // Stage 1: repository indexes. Network-bound fan-out.
    let indexes = load_indexes(&fetcher, request, cancel).await?;

    // Stage 2: resolution. Purely in-memory; runs to completion here.
    cancel.check()?;

    let roots = request
        .packages
        .iter()
        .map(|p| PackageRef::parse(p))
        .collect::<Result<Vec<_>>>()?;

    let mut resolver =
        Resolver::new(indexes, &request.arch).include_essential(request.include_essential);

    for (name, version) in &request.pins {
        resolver = resolver.pin(name, crate::version::PackageVersion::parse(version)?);
    }

    let install_set = resolver.resolve(&roots)?;

    info!(
        "resolved {} packages: {:?}",
        install_set.len(),
        install_set.names()
    );

    // Stage 3: fetch and parse package archives. Fetches ride the network
    // queue; parsing is CPU-bound and bounded separately.
    let archives = fetch_and_parse(&fetcher, request, &install_set, cancel).await?;

    // Stage 4: serial merge in install-set order. Later unpacks win where
    // `Replaces` permits, so the order must be the deterministic one.
    cancel.check()?;

    let staging = StagingTree::new(staging_base)?;
    let mut audits = vec![];

    for (candidate, archive) in install_set.iter().zip(archives.iter()) {
        cancel.check()?;

        let fields = candidate.candidate.dependency_fields()?;
        let replaces = fields
            .replaces
            .iter()
            .flat_map(|list| list.iter())
            .flat_map(|d| d.alternatives())
            .map(|r| r.name().to_string())
            .collect::<Vec<_>>();

        staging.unpack_deb(archive, &candidate.name, replaces)?;

        audits.push(PackageAudit {
            name: candidate.name.clone(),
            version: candidate.version.to_string(),
            sha256: candidate.sha256()?.digest_hex(),
            conffiles: archive.control().conffiles().to_vec(),
            md5sums: archive.control().md5sums().to_vec(),
            maintainer_scripts: archive.control().scripts().clone(),
        });
    }

    // Stage 5: overlays, applied on top of package content.
    for overlay in &request.overlays {
        cancel.check()?;

        let destination = match &overlay.destination {
            Some(destination) => destination.clone(),
            None => overlay
                .source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    ImagingError::Config(format!(
                        "overlay source {} has no file name",
                        overlay.source.display()
                    ))
                })?,
        };

        staging.apply_overlay(
            &overlay.source,
            &destination,
            overlay.mode,
            overlay.uid,
            overlay.gid,
        )?;
    }

    Ok(StagedBuild {
        staging,
        install_set,
        audits,
        staging_base: staging_base.to_path_buf(),
    })
}

async fn load_indexes(
    fetcher: &Arc<HttpFetcher>,
    request: &BuildRequest,
    cancel: &CancellationToken,
) -> Result<Vec<Arc<RepositoryIndex>>> {
    let loads = request
        .repos
        .iter()
        .enumerate()
        .map(|(priority, config)| {
            let fetcher = fetcher.clone();
            let config = config.clone();
            let arch = config
                .arch
                .clone()
                .unwrap_or_else(|| request.arch.clone());
            let cancel = cancel.clone();

            async move {
                let client = RepositoryClient::new(fetcher, config)?;
                Ok::<_, ImagingError>(Arc::new(
                    client.load_index(&arch, priority, &cancel).await?,
                ))
            }
        })
        .collect::<Vec<_>>();

    // `buffered` preserves repository priority order in the output.
    futures::stream::iter(loads)
        .buffered(request.network_degree.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect()
}

async fn fetch_and_parse(
    fetcher: &Arc<HttpFetcher>,
    request: &BuildRequest,
    install_set: &InstallSet,
    cancel: &CancellationToken,
) -> Result<Vec<DebArchive>> {
    let parse_slots = Arc::new(Semaphore::new(request.worker_degree.max(1)));

    let fetches = install_set
        .iter()
        .map(|candidate| {
            let fetcher = fetcher.clone();
            let cancel = cancel.clone();
            let parse_slots = parse_slots.clone();
            let name = candidate.name.clone();
            let version = candidate.version.clone();
            let url = candidate.archive_url();
            let digest = candidate.sha256();

            async move {
                let url = url?;
                let digest = digest?;

                let path = fetcher.fetch_artifact(&url, Some(&digest), &cancel).await?;

                cancel.check()?;

                // Parsing decompresses the control member; bound it by the
                // CPU worker degree.
                let _slot = parse_slots
                    .acquire_owned()
                    .await
                    .map_err(|_| ImagingError::Cancelled)?;

                let parse_name = name.clone();
                let archive = tokio::task::spawn_blocking(move || {
                    let file = std::fs::File::open(&path)?;
                    let archive = DebArchive::parse(std::io::BufReader::new(file), &parse_name)?;
                    Ok::<_, ImagingError>(archive)
                })
                .await
                .map_err(|e| ImagingError::Extraction {
                    package: name.clone(),
                    reason: format!("worker panicked: {}", e),
                })??;

                archive.verify_matches(&name, &version)?;

                Ok::<_, ImagingError>(archive)
            }
        })
        .collect::<Vec<_>>();

    // `buffered` keeps results aligned with the install set order.
    futures::stream::iter(fetches)
        .buffered(request.network_degree.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancellation_token_signals() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());

        let observer = token.clone();
        token.cancel();

        assert!(observer.is_cancelled());
        assert!(matches!(observer.check(), Err(ImagingError::Cancelled)));
    }

    #[test]
    fn request_defaults() {
        let request = BuildRequest::new("arm64", OutputFormat::parse("tar:gzip").unwrap());

        assert_eq!(request.network_degree, 8);
        assert!(request.worker_degree >= 1);
        assert!(!request.reproducible);
        assert!(!request.keep_staging);
    }
}
