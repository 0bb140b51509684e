// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Root filesystem generator.

Thin wiring over the core: install the configured package list (plus the
essential set by default), apply host overlays, and pack the staged tree
as a root filesystem tarball.
*/

use {
    crate::{config::ImageConfig, error::Result, GeneratedArtifact},
    image_packaging::{
        fetcher::HttpFetcher,
        pipeline::{run_build, CancellationToken},
    },
    log::info,
    std::sync::Arc,
};

/// Build a root filesystem artifact from the configuration.
pub async fn generate(
    fetcher: Arc<HttpFetcher>,
    config: &ImageConfig,
    cancel: &CancellationToken,
) -> Result<GeneratedArtifact> {
    let format = config.output_format_or("tar:gzip")?;
    let request = config.build_request("root", format, true)?;

    let report = run_build(fetcher, request, cancel).await?;

    info!(
        "root filesystem: {} packages, {} bytes",
        report.packages.len(),
        report.artifact.len()
    );

    Ok(GeneratedArtifact {
        file_name: format!("root{}", format.extension()),
        sha256: report.sha256,
        packages: report.packages,
        audits: report.audits,
        bytes: report.artifact,
    })
}
