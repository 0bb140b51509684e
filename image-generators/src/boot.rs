// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Boot payload generator.

Installs the configured kernel package(s) into a staging tree, then lifts
the kernel image, device trees, and kernel configuration out of the staged
tree into a flat boot payload archive.
*/

use {
    crate::{config::ImageConfig, error::{GeneratorError, Result}, GeneratedArtifact},
    image_packaging::{
        compose::{compose, ComposeOptions},
        fetcher::HttpFetcher,
        io::ContentDigest,
        pipeline::{stage_packages, CancellationToken},
        staging::{FileEntry, FileKind, Payload, StagingTree},
    },
    log::{debug, info},
    std::sync::Arc,
};

/// Kernel image name prefixes recognized under `boot/`.
const KERNEL_PREFIXES: &[&str] = &["vmlinuz", "vmlinux", "Image", "zImage", "uImage"];

/// Extra `boot/` files carried into the payload.
const BOOT_EXTRA_PREFIXES: &[&str] = &["config-", "System.map-"];

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// Classify a staged entry's destination within the boot payload.
fn payload_destination(entry: &FileEntry) -> Option<String> {
    if entry.kind != FileKind::Regular {
        return None;
    }

    let name = file_name(&entry.path);

    if entry.path.starts_with("boot/") {
        if KERNEL_PREFIXES
            .iter()
            .any(|prefix| name == *prefix || name.starts_with(&format!("{}-", prefix)))
        {
            return Some(name.to_string());
        }

        if BOOT_EXTRA_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return Some(name.to_string());
        }
    }

    // Device trees ship under boot/dtbs/ or usr/lib/linux-image-<ver>/.
    if entry.path.ends_with(".dtb") || entry.path.ends_with(".dtbo") {
        let relative = if let Some((_, rest)) = entry.path.split_once("/dtbs/") {
            rest
        } else if let Some(rest) = entry
            .path
            .strip_prefix("usr/lib/")
            .and_then(|p| p.split_once('/'))
            .map(|(_, rest)| rest)
        {
            rest
        } else {
            name
        };

        return Some(format!("dtbs/{}", relative));
    }

    None
}

/// Build a boot payload artifact from the configuration.
pub async fn generate(
    fetcher: Arc<HttpFetcher>,
    config: &ImageConfig,
    cancel: &CancellationToken,
) -> Result<GeneratedArtifact> {
    let format = config.output_format_or("tar")?;

    let mut request = config.build_request("boot", format, false)?;

    if let Some(kernel) = &config.kernel_package {
        if !request.packages.contains(kernel) {
            request.packages.push(kernel.clone());
        }
    }

    if request.packages.is_empty() {
        return Err(GeneratorError::Config(
            "boot generator needs a kernel package (packages or kernel_package)".to_string(),
        ));
    }

    let staged = stage_packages(fetcher, &request, cancel).await?;

    let packages = staged
        .install_set
        .iter()
        .map(|c| (c.name.clone(), c.version.to_string()))
        .collect::<Vec<_>>();
    let audits = staged.audits.clone();

    let options = ComposeOptions {
        reproducible: request.reproducible,
        source_date_epoch: request.source_date_epoch,
    };

    let res = build_payload(&staged.staging, staged.staging_base(), &options, format, cancel);

    if !request.keep_staging {
        staged.discard();
    }

    let artifact = res?;

    info!("boot payload: {} bytes", artifact.len());

    Ok(GeneratedArtifact {
        file_name: format!("boot{}", format.extension()),
        sha256: ContentDigest::sha256_of(&artifact).digest_hex(),
        packages,
        audits,
        bytes: artifact,
    })
}

fn build_payload(
    staging: &StagingTree,
    staging_base: &std::path::Path,
    options: &ComposeOptions,
    format: image_packaging::compose::OutputFormat,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    cancel.check().map_err(GeneratorError::Imaging)?;

    let payload = StagingTree::new(staging_base.join("boot-payload"))
        .map_err(GeneratorError::Imaging)?;

    let mut kernel_found = false;

    for entry in staging.snapshot() {
        let destination = match payload_destination(&entry) {
            Some(destination) => destination,
            None => continue,
        };

        let digest = match &entry.payload {
            Payload::Blob(digest) => digest,
            _ => continue,
        };

        debug!("boot payload: {} -> {}", entry.path, destination);

        if !destination.starts_with("dtbs/")
            && KERNEL_PREFIXES
                .iter()
                .any(|p| destination == *p || destination.starts_with(&format!("{}-", p)))
        {
            kernel_found = true;
        }

        let content = staging.blob_data(digest).map_err(GeneratorError::Imaging)?;

        payload
            .stage_file(
                &destination,
                entry.mode,
                0,
                0,
                entry.mtime,
                &content,
                "boot-generator",
            )
            .map_err(GeneratorError::Imaging)?;
    }

    if !kernel_found {
        return Err(GeneratorError::Config(
            "no kernel image found in installed packages".to_string(),
        ));
    }

    compose(&payload, format, options).map_err(GeneratorError::Imaging)
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            kind: FileKind::Regular,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 0,
            payload: Payload::Blob("00".to_string()),
            origin: "linux-image-test".to_string(),
        }
    }

    #[test]
    fn kernel_classification() {
        assert_eq!(
            payload_destination(&entry("boot/vmlinuz-6.1.0-13-arm64")),
            Some("vmlinuz-6.1.0-13-arm64".to_string())
        );
        assert_eq!(
            payload_destination(&entry("boot/Image")),
            Some("Image".to_string())
        );
        assert_eq!(
            payload_destination(&entry("boot/config-6.1.0-13-arm64")),
            Some("config-6.1.0-13-arm64".to_string())
        );
        assert_eq!(payload_destination(&entry("boot/grub/grub.cfg")), None);
        assert_eq!(payload_destination(&entry("usr/bin/vmlinuz")), None);
    }

    #[test]
    fn dtb_classification() {
        assert_eq!(
            payload_destination(&entry(
                "usr/lib/linux-image-6.1.0-13-arm64/freescale/imx8mm-evk.dtb"
            )),
            Some("dtbs/freescale/imx8mm-evk.dtb".to_string())
        );
        assert_eq!(
            payload_destination(&entry("boot/dtbs/6.1.0/overlay.dtbo")),
            Some("dtbs/6.1.0/overlay.dtbo".to_string())
        );
    }
}
