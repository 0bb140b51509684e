// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Initial RAM filesystem generator.

Installs the configured packages (typically busybox and kernel module
packages) into a staging tree, emits the `/init` boot script, and packs
the result as a gzip-compressed newc cpio archive.
*/

use {
    crate::{config::ImageConfig, error::Result, GeneratedArtifact},
    image_packaging::{
        compose::{compose, ComposeOptions},
        fetcher::HttpFetcher,
        io::ContentDigest,
        pipeline::{stage_packages, CancellationToken},
    },
    log::info,
    std::sync::Arc,
};

/// Render the `/init` shell script from the configuration.
///
/// The script mounts the pseudo filesystems, loads the configured kernel
/// modules, and either hands over to the configured root device via
/// `switch_root` or drops to a shell.
fn render_init(config: &ImageConfig) -> String {
    let mut script = String::from(
        "#!/bin/sh\n\
         set -e\n\
         \n\
         mount -t proc proc /proc\n\
         mount -t sysfs sysfs /sys\n\
         mount -t devtmpfs devtmpfs /dev\n\n",
    );

    for module in &config.kernel_modules {
        script.push_str(&format!("modprobe {} || echo \"init: modprobe {} failed\"\n", module, module));
    }

    if !config.kernel_modules.is_empty() {
        script.push('\n');
    }

    match &config.root_device {
        Some(device) => {
            script.push_str(&format!(
                "root={}\n\
                 mkdir -p /newroot\n\
                 mount \"$root\" /newroot\n\
                 mount --move /dev /newroot/dev\n\
                 umount /proc /sys\n\
                 exec switch_root /newroot /sbin/init\n",
                device
            ));
        }
        None => {
            script.push_str("exec /bin/sh\n");
        }
    }

    script
}

/// Build an initrd artifact from the configuration.
pub async fn generate(
    fetcher: Arc<HttpFetcher>,
    config: &ImageConfig,
    cancel: &CancellationToken,
) -> Result<GeneratedArtifact> {
    let format = config.output_format_or("cpio:gzip")?;
    let request = config.build_request("initrd", format, false)?;

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

    let res = (|| {
        cancel.check()?;

        staged.staging.stage_file(
            "init",
            0o755,
            0,
            0,
            options.fixed_mtime(),
            render_init(config).as_bytes(),
            "initrd-generator",
        )?;

        compose(&staged.staging, format, &options)
    })();

    if !request.keep_staging {
        staged.discard();
    }

    let artifact = res?;

    info!("initrd: {} bytes", artifact.len());

    Ok(GeneratedArtifact {
        file_name: format!("initrd{}", format.extension()),
        sha256: ContentDigest::sha256_of(&artifact).digest_hex(),
        packages,
        audits,
        bytes: artifact,
    })
}

#[cfg(test)]
mod test {
    use {super::*, crate::config::ImageConfig, indoc::indoc};

    #[test]
    fn init_script_with_root_device() -> Result<()> {
        let config = ImageConfig::from_yaml_str(indoc! {"
            apt_repos:
              - apt_repo: https://deb.debian.org/debian
                distro: bookworm
                trust: unsigned-allowed
            arch: arm64
            kernel_modules: [ext4, mmc_block]
            root_device: /dev/mmcblk0p2
        "})?;

        let script = render_init(&config);

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("mount -t proc proc /proc"));
        assert!(script.contains("modprobe ext4"));
        assert!(script.contains("modprobe mmc_block"));
        assert!(script.contains("root=/dev/mmcblk0p2"));
        assert!(script.contains("exec switch_root /newroot /sbin/init"));

        Ok(())
    }

    #[test]
    fn init_script_without_root_device_drops_to_shell() -> Result<()> {
        let config = ImageConfig::from_yaml_str(indoc! {"
            apt_repos:
              - apt_repo: https://deb.debian.org/debian
                distro: bookworm
                trust: unsigned-allowed
            arch: arm64
        "})?;

        let script = render_init(&config);

        assert!(script.ends_with("exec /bin/sh\n"));
        assert!(!script.contains("modprobe"));

        Ok(())
    }
}
