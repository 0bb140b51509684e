// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package entries from `Packages` indices. */

use crate::{
    control::ControlParagraph,
    dependency::{DependencyList, PackageDependencyFields},
    error::{ImagingError, Result},
    io::ContentDigest,
    version::PackageVersion,
};

/// A concrete binary package entry from a parsed `Packages` index.
///
/// This is a low-level wrapper around the control paragraph describing one
/// binary package, with typed accessors for well-known fields. Candidates
/// are cheap to clone and hashable; `(name, version, arch)` plus the owning
/// repository identify a candidate uniquely.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageCandidate<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> AsRef<ControlParagraph<'a>> for PackageCandidate<'a> {
    fn as_ref(&self) -> &ControlParagraph<'a> {
        &self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for PackageCandidate<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> PackageCandidate<'a> {
    pub fn package(&self) -> Result<&str> {
        self.paragraph.required_field_str("Package")
    }

    /// The `Version` field as its original string.
    pub fn version_str(&self) -> Result<&str> {
        self.paragraph.required_field_str("Version")
    }

    /// The `Version` field parsed into a [PackageVersion].
    pub fn version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(self.version_str()?)?)
    }

    pub fn architecture(&self) -> Result<&str> {
        self.paragraph.required_field_str("Architecture")
    }

    /// The relative path of the `.deb` under the repository base URL.
    pub fn filename(&self) -> Result<&str> {
        self.paragraph.required_field_str("Filename")
    }

    pub fn size(&self) -> Result<u64> {
        self.paragraph
            .field_u64("Size")
            .ok_or_else(|| ImagingError::ControlRequiredFieldMissing("Size".to_string()))?
    }

    /// The SHA-256 field as a hex string.
    pub fn sha256_hex(&self) -> Result<&str> {
        self.paragraph.required_field_str("SHA256")
    }

    /// The SHA-256 field parsed into a [ContentDigest].
    pub fn sha256(&self) -> Result<ContentDigest> {
        ContentDigest::sha256_hex(self.sha256_hex()?)
    }

    pub fn priority(&self) -> Option<&str> {
        self.paragraph.field_str("Priority")
    }

    /// Whether the package is flagged `Essential: yes`.
    pub fn essential(&self) -> bool {
        self.paragraph.field_bool("Essential").unwrap_or(false)
    }

    pub fn depends(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Depends")
    }

    pub fn pre_depends(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Pre-Depends")
    }

    pub fn provides(&self) -> Option<Result<DependencyList>> {
        self.paragraph.field_dependency_list("Provides")
    }

    /// Obtain parsed values of all fields defining package relationships.
    pub fn dependency_fields(&self) -> Result<PackageDependencyFields> {
        PackageDependencyFields::from_paragraph(&self.paragraph)
    }

    /// Validate the invariants an index entry must uphold.
    ///
    /// Required fields must be present, the SHA-256 digest must be 64 hex
    /// characters, and the filename must be a normalized relative path
    /// (no `..` components, no leading `/`).
    pub fn validate(&self) -> Result<()> {
        self.package()?;
        self.version()?;
        self.architecture()?;
        self.size()?;

        let sha256 = self.sha256_hex()?;
        if sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ImagingError::ControlParse(format!(
                "package {} has malformed SHA256 field",
                self.package().unwrap_or("<unknown>")
            )));
        }

        let filename = self.filename()?;
        if filename.starts_with('/') || filename.split('/').any(|part| part == "..") {
            return Err(ImagingError::ControlParse(format!(
                "package {} has non-normalized Filename: {}",
                self.package().unwrap_or("<unknown>"),
                filename
            )));
        }

        Ok(())
    }
}

/// A collection of binary package candidates.
#[derive(Clone, Debug, Default)]
pub struct PackageList<'a> {
    packages: Vec<PackageCandidate<'a>>,
}

impl<'a> PackageList<'a> {
    /// Add a candidate to this list.
    pub fn push(&mut self, candidate: PackageCandidate<'a>) {
        self.packages.push(candidate);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageCandidate<'a>> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl<'a> IntoIterator for PackageList<'a> {
    type Item = PackageCandidate<'a>;
    type IntoIter = std::vec::IntoIter<PackageCandidate<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.into_iter()
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::control::ControlParagraphReader, indoc::indoc};

    fn candidate(data: &str) -> PackageCandidate<'static> {
        let mut reader = ControlParagraphReader::new(std::io::Cursor::new(data.to_string()));
        PackageCandidate::from(reader.next().unwrap().unwrap())
    }

    const GOOD: &str = indoc! {"
        Package: busybox
        Version: 1:1.35.0-4
        Architecture: arm64
        Essential: yes
        Filename: pool/main/b/busybox/busybox_1.35.0-4_arm64.deb
        Size: 438292
        SHA256: 9e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4
        Depends: libc6 (>= 2.34)
    "};

    #[test]
    fn accessors() -> Result<()> {
        let c = candidate(GOOD);

        assert_eq!(c.package()?, "busybox");
        assert_eq!(c.version()?.epoch(), Some(1));
        assert_eq!(c.architecture()?, "arm64");
        assert!(c.essential());
        assert_eq!(c.size()?, 438292);
        assert_eq!(c.sha256()?.digest_bytes().len(), 32);
        assert!(c.depends().unwrap().is_ok());
        c.validate()?;

        Ok(())
    }

    #[test]
    fn validate_rejects_bad_sha256() {
        let c = candidate(indoc! {"
            Package: x
            Version: 1.0
            Architecture: all
            Filename: pool/x.deb
            Size: 1
            SHA256: abc123
        "});

        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_traversal_filename() {
        let c = candidate(indoc! {"
            Package: x
            Version: 1.0
            Architecture: all
            Filename: pool/../../../etc/passwd
            Size: 1
            SHA256: 9e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4
        "});

        assert!(c.validate().is_err());
    }
}
