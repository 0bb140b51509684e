// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file primitives.

`Release` files (or `InRelease` when a PGP cleartext signature is inlined)
are the entrypoint of a Debian repository. They are a single control
paragraph holding repository metadata plus checksum blocks (`MD5Sum`,
`SHA1`, `SHA256`) listing every index file the repository publishes.

[ReleaseFile] represents a parsed `Release`/`InRelease` file.
[ReleaseFileEntry] is one line of a checksum block; [PackagesFileEntry] is
an entry classified as a `Packages` index with its component, architecture,
and compression derived from its path.
*/

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        error::{ImagingError, Result},
        io::{Compression, ContentDigest},
    },
    chrono::{DateTime, FixedOffset},
    pgp_cleartext::CleartextHasher,
    std::{
        borrow::Cow,
        io::{BufRead, Read},
        ops::{Deref, DerefMut},
    },
};

/// Checksum type / digest mechanism used in a release file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    /// MD5.
    Md5,

    /// SHA-1.
    Sha1,

    /// SHA-256.
    Sha256,
}

impl ChecksumType {
    /// Emit variants in their preferred usage order.
    pub fn preferred_order() -> impl Iterator<Item = ChecksumType> {
        [Self::Sha256, Self::Sha1, Self::Md5].into_iter()
    }

    /// Name of the control field in `Release` files holding this variant.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Obtain a new hasher for this checksum flavor.
    pub fn new_hasher(&self) -> Box<dyn pgp::crypto::Hasher + Send> {
        Box::new(match self {
            Self::Md5 => CleartextHasher::md5(),
            Self::Sha1 => CleartextHasher::sha1(),
            Self::Sha256 => CleartextHasher::sha256(),
        })
    }
}

/// An entry for a file in a parsed `Release` file.
///
/// Instances correspond to one line in a checksum block.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseFileEntry<'a> {
    /// The path to this file within the repository, relative to the
    /// directory holding the release file.
    pub path: &'a str,

    /// The content digest of this file.
    pub digest: ContentDigest,

    /// The size of the file in bytes.
    pub size: u64,
}

impl<'a> ReleaseFileEntry<'a> {
    /// Obtain the `by-hash` path variant for this entry.
    pub fn by_hash_path(&self) -> String {
        if let Some((prefix, _)) = self.path.rsplit_once('/') {
            format!(
                "{}/by-hash/{}/{}",
                prefix,
                self.digest.checksum_type().field_name(),
                self.digest.digest_hex()
            )
        } else {
            format!(
                "by-hash/{}/{}",
                self.digest.checksum_type().field_name(),
                self.digest.digest_hex()
            )
        }
    }
}

/// A [ReleaseFileEntry] classified as a `Packages` index.
#[derive(Clone, Debug, PartialEq)]
pub struct PackagesFileEntry<'a> {
    /// The [ReleaseFileEntry] from which this instance was derived.
    entry: ReleaseFileEntry<'a>,

    /// The parsed component name (from the entry's path).
    pub component: Cow<'a, str>,

    /// The parsed architecture name (from the entry's path).
    pub architecture: Cow<'a, str>,

    /// File-level compression format being used.
    pub compression: Compression,
}

impl<'a> Deref for PackagesFileEntry<'a> {
    type Target = ReleaseFileEntry<'a>;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}

impl<'a> DerefMut for PackagesFileEntry<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry
    }
}

impl<'a> From<PackagesFileEntry<'a>> for ReleaseFileEntry<'a> {
    fn from(v: PackagesFileEntry<'a>) -> Self {
        v.entry
    }
}

impl<'a> TryFrom<ReleaseFileEntry<'a>> for PackagesFileEntry<'a> {
    type Error = ImagingError;

    fn try_from(entry: ReleaseFileEntry<'a>) -> std::result::Result<Self, Self::Error> {
        let parts = entry.path.split('/').collect::<Vec<_>>();

        let filename = *parts.last().expect("split always yields at least 1 part");

        let compression = match filename {
            "Packages" => Compression::None,
            "Packages.xz" => Compression::Xz,
            "Packages.gz" => Compression::Gzip,
            "Packages.zst" => Compression::Zstd,
            _ => {
                return Err(ImagingError::ReleaseIndexEntryMalformed(format!(
                    "not a Packages index: {}",
                    entry.path
                )));
            }
        };

        // Paths look like `{component}/binary-{arch}/Packages[.ext]`. The
        // component may span multiple directory levels; the architecture is
        // always the directory holding the file.
        let architecture = parts
            .iter()
            .rev()
            .nth(1)
            .and_then(|dir| dir.strip_prefix("binary-"))
            .ok_or_else(|| {
                ImagingError::ReleaseIndexEntryMalformed(format!(
                    "missing binary-<arch> path component: {}",
                    entry.path
                ))
            })?;

        let dir = &entry.path[..entry.path.len() - filename.len()];
        let component = dir
            .trim_end_matches('/')
            .strip_suffix(&format!("binary-{}", architecture))
            .map(|s| s.trim_end_matches('/'))
            .unwrap_or("");

        Ok(Self {
            entry,
            component: component.into(),
            architecture: architecture.into(),
            compression,
        })
    }
}

/// A Debian repository `Release` file.
///
/// Instances are wrappers around a [ControlParagraph]; [Deref] exposes the
/// paragraph's accessors directly.
pub struct ReleaseFile<'a> {
    paragraph: ControlParagraph<'a>,

    /// Parsed PGP cleartext signatures over this file, when it was read from
    /// an `InRelease` document.
    signatures: Option<pgp_cleartext::CleartextSignatures>,
}

impl<'a> Deref for ReleaseFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for ReleaseFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for ReleaseFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self {
            paragraph,
            signatures: None,
        }
    }
}

impl<'a> ReleaseFile<'a> {
    /// Construct an instance by reading data from a reader.
    ///
    /// The source must be a Debian control file with exactly 1 paragraph and
    /// must not carry PGP armor.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let paragraphs = ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        if paragraphs.len() != 1 {
            return Err(ImagingError::ReleaseParagraphMismatch(paragraphs.len()));
        }

        let paragraph = paragraphs
            .into_iter()
            .next()
            .expect("validated paragraph count above");

        Ok(Self {
            paragraph,
            signatures: None,
        })
    }

    /// Construct an instance from a PGP cleartext-signed `InRelease` document.
    ///
    /// The signature is parsed but NOT validated here; signature verification
    /// is a separate, explicit step driven by the caller's trust policy.
    pub fn from_armored_reader<R: Read>(reader: R) -> Result<Self> {
        let reader = std::io::BufReader::new(reader);
        let reader = pgp_cleartext::CleartextSignatureReader::new(reader);
        let mut reader = std::io::BufReader::new(reader);

        let mut slf = Self::from_reader(&mut reader)?;
        slf.signatures = Some(reader.into_inner().finalize());

        Ok(slf)
    }

    /// Obtain PGP signatures attached to this `InRelease` file.
    pub fn signatures(&self) -> Option<&pgp_cleartext::CleartextSignatures> {
        self.signatures.as_ref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.field_str("Origin")
    }

    pub fn suite(&self) -> Option<&str> {
        self.field_str("Suite")
    }

    pub fn codename(&self) -> Option<&str> {
        self.field_str("Codename")
    }

    /// Architectures advertised by this repository.
    pub fn architectures(&self) -> Option<impl Iterator<Item = &str> + '_> {
        self.field_iter_words("Architectures")
    }

    /// Components advertised by this repository.
    pub fn components(&self) -> Option<impl Iterator<Item = &str> + '_> {
        self.field_iter_words("Components")
    }

    /// The `Date` field parsed into a [DateTime].
    pub fn date(&self) -> Option<Result<DateTime<FixedOffset>>> {
        self.field_str("Date").map(parse_release_date)
    }

    /// The `Valid-Until` field parsed into a [DateTime].
    pub fn valid_until(&self) -> Option<Result<DateTime<FixedOffset>>> {
        self.field_str("Valid-Until").map(parse_release_date)
    }

    /// Whether the repository advertises `by-hash` index retrieval.
    pub fn acquire_by_hash(&self) -> Option<bool> {
        self.field_bool("Acquire-By-Hash")
    }

    /// Iterate over index file entries in the checksum block for `checksum`.
    ///
    /// Returns [None] if the block is absent.
    pub fn iter_index_entries(
        &self,
        checksum: ChecksumType,
    ) -> Option<impl Iterator<Item = Result<ReleaseFileEntry<'_>>> + '_> {
        self.field_iter_lines(checksum.field_name()).map(|lines| {
            lines
                .filter(|line| !line.is_empty())
                .map(move |line| parse_index_entry(line, checksum))
        })
    }

    /// Iterate over entries classified as `Packages` indices.
    ///
    /// Lines that are not `Packages` files are skipped; malformed lines
    /// surface as errors.
    pub fn iter_packages_indices(
        &self,
        checksum: ChecksumType,
    ) -> Option<impl Iterator<Item = Result<PackagesFileEntry<'_>>> + '_> {
        self.iter_index_entries(checksum).map(|entries| {
            entries.filter_map(|entry| match entry {
                Ok(entry) => match PackagesFileEntry::try_from(entry) {
                    Ok(packages) => Some(Ok(packages)),
                    Err(_) => None,
                },
                Err(e) => Some(Err(e)),
            })
        })
    }

    /// Find the index entry for an exact relative path.
    pub fn index_entry_by_path(
        &self,
        checksum: ChecksumType,
        path: &str,
    ) -> Option<Result<ReleaseFileEntry<'_>>> {
        self.iter_index_entries(checksum)?.find(|entry| match entry {
            Ok(entry) => entry.path == path,
            Err(_) => true,
        })
    }
}

fn parse_index_entry(line: &str, checksum: ChecksumType) -> Result<ReleaseFileEntry<'_>> {
    let mut words = line.split_ascii_whitespace();

    let (digest, size, path) = match (words.next(), words.next(), words.next(), words.next()) {
        (Some(digest), Some(size), Some(path), None) => (digest, size, path),
        _ => {
            return Err(ImagingError::ReleaseIndexEntryMalformed(line.to_string()));
        }
    };

    Ok(ReleaseFileEntry {
        path,
        digest: ContentDigest::from_hex_digest(checksum, digest)?,
        size: size.parse::<u64>()?,
    })
}

fn parse_release_date(s: &str) -> Result<DateTime<FixedOffset>> {
    // Release files commonly spell the zone `UTC`, which RFC 2822 parsers
    // reject.
    let normalized = s.trim().replace(" UTC", " +0000");

    DateTime::parse_from_rfc2822(&normalized)
        .map_err(|e| ImagingError::ControlParse(format!("bad date '{}': {}", s, e)))
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const RELEASE: &str = indoc! {"
        Origin: Debian
        Suite: stable
        Codename: bookworm
        Date: Sat, 10 Jun 2023 10:14:32 UTC
        Architectures: amd64 arm64 armhf
        Components: main contrib non-free
        SHA256:
         3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63   738242 main/binary-arm64/Packages
         3e9a121d599b56c08bc8f144e4830807c77c29d7114316d6984ba54695d3db7b    57319 main/binary-arm64/Packages.xz
         e3830f6fc5a946b5a5b46e8277e1d86f0bb48f782d386fc730f3f996941badb9    80488 main/binary-arm64/Packages.gz
         aa1b61d599b56c08bc8f144e4830807c77c29d7114316d6984ba54695d3db7bb      123 main/binary-arm64/Release
    "};

    #[test]
    fn parse_fields() -> Result<()> {
        let release = ReleaseFile::from_reader(std::io::Cursor::new(RELEASE))?;

        assert_eq!(release.origin(), Some("Debian"));
        assert_eq!(release.suite(), Some("stable"));
        assert_eq!(
            release.architectures().unwrap().collect::<Vec<_>>(),
            vec!["amd64", "arm64", "armhf"]
        );
        assert!(release.date().unwrap().is_ok());
        assert!(release.signatures().is_none());

        Ok(())
    }

    #[test]
    fn index_entries() -> Result<()> {
        let release = ReleaseFile::from_reader(std::io::Cursor::new(RELEASE))?;

        let entries = release
            .iter_index_entries(ChecksumType::Sha256)
            .unwrap()
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].size, 738242);
        assert_eq!(
            entries[1].by_hash_path(),
            "main/binary-arm64/by-hash/SHA256/3e9a121d599b56c08bc8f144e4830807c77c29d7114316d6984ba54695d3db7b"
        );

        Ok(())
    }

    #[test]
    fn packages_classification() -> Result<()> {
        let release = ReleaseFile::from_reader(std::io::Cursor::new(RELEASE))?;

        let entries = release
            .iter_packages_indices(ChecksumType::Sha256)
            .unwrap()
            .collect::<Result<Vec<_>>>()?;

        // The nested Release file is not a Packages index.
        assert_eq!(entries.len(), 3);

        for entry in &entries {
            assert_eq!(entry.component, "main");
            assert_eq!(entry.architecture, "arm64");
        }

        assert_eq!(entries[0].compression, Compression::None);
        assert_eq!(entries[1].compression, Compression::Xz);
        assert_eq!(entries[2].compression, Compression::Gzip);

        Ok(())
    }

    #[test]
    fn missing_sha256_block() -> Result<()> {
        let release =
            ReleaseFile::from_reader(std::io::Cursor::new("Origin: Debian\nSuite: stable\n"))?;

        assert!(release.iter_index_entries(ChecksumType::Sha256).is_none());

        Ok(())
    }
}
