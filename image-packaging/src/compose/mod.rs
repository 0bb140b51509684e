// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Compose staged trees into output artifacts.

The composer walks a [StagingTree]'s entry table in sorted path order and
emits a tar or cpio (newc) archive, optionally wrapped in gzip, xz, or
zstd. Ownership, mode, and device numbers come from the entry table, not
the on-disk mirror.

When reproducibility is requested the output bytes are a pure function of
the staged entries: entries are enumerated in byte-wise lexicographic path
order, mtimes are clamped to the fixed timestamp (`SOURCE_DATE_EPOCH` or
0), owners are written numerically with empty name fields, the gzip header
carries the fixed mtime and no file name, and xz runs single-threaded.
*/

mod cpio;
mod tar;

use {
    crate::{
        error::{ImagingError, Result},
        io::Compression,
        staging::StagingTree,
    },
    std::io::Write,
};

/// The archive container to emit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveFormat {
    Tar,
    Cpio,
}

/// An output format: container plus optional compression.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutputFormat {
    pub archive: ArchiveFormat,
    pub compression: Compression,
}

impl OutputFormat {
    /// Parse a format spec like `tar`, `cpio:gzip`, or `tar:zstd`.
    pub fn parse(s: &str) -> Result<Self> {
        let (archive, compression) = match s.split_once(':') {
            Some((archive, compression)) => (archive, Some(compression)),
            None => (s, None),
        };

        let archive = match archive {
            "tar" => ArchiveFormat::Tar,
            "cpio" => ArchiveFormat::Cpio,
            other => {
                return Err(ImagingError::Config(format!(
                    "unknown archive format: {}",
                    other
                )));
            }
        };

        let compression = match compression {
            None => Compression::None,
            Some("gzip") | Some("gz") => Compression::Gzip,
            Some("xz") => Compression::Xz,
            Some("zstd") | Some("zst") => Compression::Zstd,
            Some(other) => {
                return Err(ImagingError::Config(format!(
                    "unknown compression: {}",
                    other
                )));
            }
        };

        Ok(Self {
            archive,
            compression,
        })
    }

    /// Conventional file extension for this format.
    pub fn extension(&self) -> String {
        let base = match self.archive {
            ArchiveFormat::Tar => ".tar",
            ArchiveFormat::Cpio => ".cpio",
        };

        format!("{}{}", base, self.compression.extension())
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let archive = match self.archive {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Cpio => "cpio",
        };

        match self.compression {
            Compression::None => write!(f, "{}", archive),
            Compression::Gzip => write!(f, "{}:gzip", archive),
            Compression::Xz => write!(f, "{}:xz", archive),
            Compression::Zstd => write!(f, "{}:zstd", archive),
        }
    }
}

/// Options controlling composition.
#[derive(Clone, Debug, Default)]
pub struct ComposeOptions {
    /// Apply the determinism rules.
    pub reproducible: bool,

    /// Explicit fixed timestamp. When [None], `SOURCE_DATE_EPOCH` from the
    /// environment applies, else 0.
    pub source_date_epoch: Option<u64>,
}

impl ComposeOptions {
    /// The fixed mtime for reproducible output.
    pub fn fixed_mtime(&self) -> u64 {
        if let Some(epoch) = self.source_date_epoch {
            return epoch;
        }

        std::env::var("SOURCE_DATE_EPOCH")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    }

    /// Effective mtime for one entry: clamped, never later than the fixed
    /// timestamp, when reproducibility is on.
    fn entry_mtime(&self, entry_mtime: u64) -> u64 {
        if self.reproducible {
            entry_mtime.min(self.fixed_mtime())
        } else {
            entry_mtime
        }
    }
}

/// Compose the staged tree into archive bytes.
pub fn compose(
    staging: &StagingTree,
    format: OutputFormat,
    options: &ComposeOptions,
) -> Result<Vec<u8>> {
    staging.verify()?;

    // The snapshot comes out of a BTreeMap, giving the byte-wise
    // lexicographic path enumeration the determinism rules require.
    let entries = staging.snapshot();

    let body = match format.archive {
        ArchiveFormat::Tar => tar::write_tar(staging, &entries, options)?,
        ArchiveFormat::Cpio => cpio::write_cpio(staging, &entries, options)?,
    };

    compress_output(&body, format.compression, options)
}

fn compress_output(
    data: &[u8],
    compression: Compression,
    options: &ComposeOptions,
) -> Result<Vec<u8>> {
    Ok(match compression {
        Compression::None => data.to_vec(),
        Compression::Gzip => {
            // A fixed-MTIME header with no filename field keeps the gzip
            // container deterministic.
            let header = libflate::gzip::HeaderBuilder::new()
                .modification_time(options.fixed_mtime() as u32)
                .finish();

            let mut encoder = libflate::gzip::Encoder::with_options(
                Vec::new(),
                libflate::gzip::EncodeOptions::new().header(header),
            )?;
            encoder.write_all(data)?;
            encoder.finish().into_result()?
        }
        Compression::Xz => {
            // Single-threaded; block layout must not depend on worker count.
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder.write_all(data)?;
            encoder.finish()?
        }
        Compression::Zstd => {
            let mut encoder = zstd::Encoder::new(Vec::new(), 0)?;
            encoder.write_all(data)?;
            encoder.finish()?
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_formats() -> Result<()> {
        assert_eq!(
            OutputFormat::parse("tar")?,
            OutputFormat {
                archive: ArchiveFormat::Tar,
                compression: Compression::None
            }
        );
        assert_eq!(
            OutputFormat::parse("cpio:gzip")?,
            OutputFormat {
                archive: ArchiveFormat::Cpio,
                compression: Compression::Gzip
            }
        );
        assert_eq!(OutputFormat::parse("tar:zstd")?.extension(), ".tar.zst");
        assert!(OutputFormat::parse("rar").is_err());
        assert!(OutputFormat::parse("tar:lzma").is_err());

        Ok(())
    }

    #[test]
    fn format_display_round_trip() -> Result<()> {
        for s in ["tar", "tar:gzip", "cpio:xz", "cpio:zstd"] {
            assert_eq!(OutputFormat::parse(s)?.to_string(), s);
        }

        Ok(())
    }

    #[test]
    fn gzip_output_is_deterministic() -> Result<()> {
        let options = ComposeOptions {
            reproducible: true,
            source_date_epoch: Some(0),
        };

        let a = compress_output(b"payload", Compression::Gzip, &options)?;
        let b = compress_output(b"payload", Compression::Gzip, &options)?;
        assert_eq!(a, b);

        Ok(())
    }

    #[test]
    fn mtime_clamping() {
        let options = ComposeOptions {
            reproducible: true,
            source_date_epoch: Some(100),
        };

        assert_eq!(options.entry_mtime(50), 50);
        assert_eq!(options.entry_mtime(500), 100);

        let relaxed = ComposeOptions::default();
        assert_eq!(relaxed.entry_mtime(500), 500);
    }
}
