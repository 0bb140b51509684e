// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Declarative image configuration.

The recognized mapping mirrors what the core consumes: `apt_repos`,
`packages`, `arch`, `host_files`, `output_format`, and `reproducible`,
plus the generator-level keys (`kernel_modules`, `root_device`,
`kernel_package`). Unrecognized keys are ignored so one document can feed
multiple tools.
*/

use {
    crate::error::{GeneratorError, Result},
    image_packaging::{
        compose::OutputFormat,
        pipeline::{BuildRequest, OverlaySpec},
        repository::RepositoryConfig,
        signature::TrustPolicy,
    },
    serde::Deserialize,
    std::path::{Path, PathBuf},
};

/// One APT repository entry.
#[derive(Clone, Debug, Deserialize)]
pub struct AptRepo {
    /// Base URL, e.g. `https://deb.debian.org/debian`.
    pub apt_repo: String,

    /// Distribution suite, e.g. `bookworm`.
    pub distro: String,

    /// Optional per-repository architecture override.
    #[serde(default)]
    pub arch: Option<String>,

    #[serde(default = "default_components")]
    pub components: Vec<String>,

    /// Armored OpenPGP public key material.
    #[serde(default)]
    pub key: Option<String>,

    /// Trust policy; must be stated explicitly:
    /// `signed` or `unsigned-allowed`.
    pub trust: String,
}

fn default_components() -> Vec<String> {
    vec!["main".to_string()]
}

impl AptRepo {
    fn trust_policy(&self) -> Result<TrustPolicy> {
        match self.trust.as_str() {
            "signed" => Ok(TrustPolicy::Signed),
            "unsigned-allowed" => Ok(TrustPolicy::UnsignedAllowed),
            other => Err(GeneratorError::Config(format!(
                "unknown trust policy '{}' for {} (expected 'signed' or 'unsigned-allowed')",
                other, self.apt_repo
            ))),
        }
    }

    fn repository_config(&self) -> Result<RepositoryConfig> {
        Ok(RepositoryConfig {
            base_url: self.apt_repo.clone(),
            suite: self.distro.clone(),
            components: self.components.clone(),
            arch: self.arch.clone(),
            armored_keys: self.key.iter().cloned().collect(),
            trust: self.trust_policy()?,
        })
    }
}

/// One host file overlaid onto the image after extraction.
#[derive(Clone, Debug, Deserialize)]
pub struct HostFile {
    pub source: PathBuf,

    /// Destination within the image; defaults to the source file name at
    /// the image root.
    #[serde(default)]
    pub destination: Option<String>,

    /// Octal permission string, e.g. `"0755"`.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub gid: u32,
}

impl HostFile {
    fn overlay_spec(&self) -> Result<OverlaySpec> {
        let mode = self
            .mode
            .as_deref()
            .map(parse_octal_mode)
            .transpose()?;

        Ok(OverlaySpec {
            source: self.source.clone(),
            destination: self.destination.clone(),
            mode,
            uid: self.uid,
            gid: self.gid,
        })
    }
}

fn parse_octal_mode(s: &str) -> Result<u32> {
    u32::from_str_radix(s.trim_start_matches("0o"), 8)
        .map_err(|_| GeneratorError::Config(format!("bad octal mode: {}", s)))
}

/// The declarative image description consumed by the generators.
#[derive(Clone, Debug, Deserialize)]
pub struct ImageConfig {
    pub apt_repos: Vec<AptRepo>,

    /// Root packages; entries may embed version constraints.
    #[serde(default)]
    pub packages: Vec<String>,

    /// Target architecture (`amd64`, `arm64`, `armhf`, ...).
    pub arch: String,

    #[serde(default)]
    pub host_files: Vec<HostFile>,

    /// `{tar|cpio}[:{gzip|xz|zstd}]`. Generators supply their natural
    /// default when absent.
    #[serde(default)]
    pub output_format: Option<String>,

    #[serde(default)]
    pub reproducible: bool,

    /// Whether the essential package set is installed in addition to the
    /// requested packages.
    #[serde(default)]
    pub essential: Option<bool>,

    /// Kernel modules the initrd loads at boot.
    #[serde(default)]
    pub kernel_modules: Vec<String>,

    /// Root device the initrd hands over to, e.g. `/dev/mmcblk0p2`.
    #[serde(default)]
    pub root_device: Option<String>,

    /// Kernel package name for the boot generator.
    #[serde(default)]
    pub kernel_package: Option<String>,
}

impl ImageConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Parse a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    /// The output format, or the given generator default.
    pub fn output_format_or(&self, default: &str) -> Result<OutputFormat> {
        let spec = self.output_format.as_deref().unwrap_or(default);

        Ok(OutputFormat::parse(spec).map_err(GeneratorError::Imaging)?)
    }

    /// Lower the configuration into a core build request.
    pub fn build_request(
        &self,
        build_id: &str,
        format: OutputFormat,
        include_essential_default: bool,
    ) -> Result<BuildRequest> {
        let mut request = BuildRequest::new(&self.arch, format);

        request.build_id = build_id.to_string();
        request.reproducible = self.reproducible;
        request.include_essential = self.essential.unwrap_or(include_essential_default);
        request.packages = self.packages.clone();

        request.repos = self
            .apt_repos
            .iter()
            .map(|r| r.repository_config())
            .collect::<Result<Vec<_>>>()?;

        request.overlays = self
            .host_files
            .iter()
            .map(|f| f.overlay_spec())
            .collect::<Result<Vec<_>>>()?;

        if request.repos.is_empty() {
            return Err(GeneratorError::Config(
                "at least one repository is required".to_string(),
            ));
        }

        Ok(request)
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const CONFIG: &str = indoc! {"
        apt_repos:
          - apt_repo: https://deb.debian.org/debian
            distro: bookworm
            components: [main, contrib]
            trust: unsigned-allowed
        packages:
          - busybox
          - 'less (>= 500)'
        arch: arm64
        host_files:
          - source: ./files/hostname
            destination: etc/hostname
            mode: '0644'
        output_format: 'tar:gzip'
        reproducible: true
        kernel_modules: [ext4, mmc_block]
        unknown_future_option: ignored
    "};

    #[test]
    fn parse_full_config() -> Result<()> {
        let config = ImageConfig::from_yaml_str(CONFIG)?;

        assert_eq!(config.arch, "arm64");
        assert_eq!(config.packages.len(), 2);
        assert!(config.reproducible);
        assert_eq!(config.kernel_modules, vec!["ext4", "mmc_block"]);

        let request = config.build_request(
            "test",
            config.output_format_or("tar")?,
            true,
        )?;

        assert_eq!(request.repos.len(), 1);
        assert_eq!(request.repos[0].components, vec!["main", "contrib"]);
        assert_eq!(request.overlays.len(), 1);
        assert_eq!(request.overlays[0].mode, Some(0o644));
        assert!(request.reproducible);

        Ok(())
    }

    #[test]
    fn trust_policy_must_be_explicit() {
        let config = ImageConfig::from_yaml_str(indoc! {"
            apt_repos:
              - apt_repo: https://deb.debian.org/debian
                distro: bookworm
                trust: maybe
            arch: arm64
        "})
        .unwrap();

        assert!(config.build_request("t", OutputFormat::parse("tar").unwrap(), false).is_err());
    }

    #[test]
    fn missing_trust_fails_parse() {
        let res = ImageConfig::from_yaml_str(indoc! {"
            apt_repos:
              - apt_repo: https://deb.debian.org/debian
                distro: bookworm
            arch: arm64
        "});

        assert!(res.is_err());
    }

    #[test]
    fn bad_mode_rejected() {
        let host = HostFile {
            source: PathBuf::from("x"),
            destination: None,
            mode: Some("89".to_string()),
            uid: 0,
            gid: 0,
        };

        assert!(host.overlay_spec().is_err());
    }
}
