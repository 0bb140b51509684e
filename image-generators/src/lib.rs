// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Image generators for embedded Linux targets.

Three generators wrap the `image-packaging` core with thin wiring: each
lowers a declarative [config::ImageConfig] into core build calls.

* [root] — install packages plus the essential set, apply overlays, pack
  a root filesystem tarball.
* [initrd] — install packages, emit `/init`, pack a gzip'd newc cpio.
* [boot] — install the kernel package, lift the kernel image and device
  trees into a flat boot payload.

Process exit codes for tools wrapping these generators are defined on
[error::GeneratorError::exit_code].
*/

pub mod boot;
pub mod config;
pub mod error;
pub mod initrd;
pub mod root;

use {
    image_packaging::pipeline::PackageAudit,
    std::path::{Path, PathBuf},
};

/// A generated artifact plus its provenance summary.
pub struct GeneratedArtifact {
    /// Conventional file name (e.g. `initrd.cpio.gz`).
    pub file_name: String,

    /// The artifact content.
    pub bytes: Vec<u8>,

    /// SHA-256 hex digest of the content.
    pub sha256: String,

    /// `(name, version)` pairs of installed packages in unpack order.
    pub packages: Vec<(String, String)>,

    /// Per-package auditing records (conffiles, md5sums manifest,
    /// maintainer scripts) in unpack order.
    pub audits: Vec<PackageAudit>,
}

impl GeneratedArtifact {
    /// Write the artifact into a directory, returning its path.
    pub fn write_to(&self, directory: &Path) -> error::Result<PathBuf> {
        std::fs::create_dir_all(directory)?;

        let path = directory.join(&self.file_name);
        std::fs::write(&path, &self.bytes)?;

        Ok(path)
    }
}
