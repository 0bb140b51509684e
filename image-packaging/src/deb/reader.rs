// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `.deb` package archive reading. */

use {
    crate::{
        control::{ControlFile, ControlParagraph},
        deb::member_compression,
        error::{ImagingError, Result},
        io::{decompress_buffer, Compression},
        version::PackageVersion,
    },
    std::{
        collections::BTreeMap,
        io::{Cursor, Read},
    },
};

/// The parsed `control.tar` member of a package.
///
/// Holds the control paragraph plus the auxiliary metadata files dpkg
/// records: `conffiles`, `md5sums`, and maintainer scripts. Scripts are
/// stored verbatim and never executed here; whether and how to run them is
/// a policy decision for the surrounding generator.
#[derive(Clone, Debug, Default)]
pub struct ControlArchive {
    paragraph: ControlParagraph<'static>,

    /// Paths flagged as configuration files, one per `conffiles` line.
    conffiles: Vec<String>,

    /// `(hex digest, path)` pairs from the `md5sums` manifest.
    md5sums: Vec<(String, String)>,

    /// Maintainer scripts and other auxiliary control files by name
    /// (`preinst`, `postinst`, `prerm`, `postrm`, `config`, ...).
    scripts: BTreeMap<String, Vec<u8>>,
}

impl ControlArchive {
    fn from_tar_data(data: &[u8], package: &str) -> Result<Self> {
        let mut slf = Self::default();

        let mut archive = tar::Archive::new(Cursor::new(data));

        for entry in archive
            .entries()
            .map_err(|e| extraction_error(package, format!("control.tar: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| extraction_error(package, format!("control.tar: {}", e)))?;

            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = entry
                .path()
                .map_err(|e| extraction_error(package, format!("control.tar path: {}", e)))?
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let mut content = vec![];
            entry
                .read_to_end(&mut content)
                .map_err(|e| extraction_error(package, format!("control.tar {}: {}", name, e)))?;

            match name.as_str() {
                "control" => {
                    let control = ControlFile::parse_reader(&mut Cursor::new(&content))?;
                    slf.paragraph = control
                        .into_paragraphs()
                        .next()
                        .ok_or_else(|| {
                            extraction_error(package, "control file lacks a paragraph".to_string())
                        })?;
                }
                "conffiles" => {
                    slf.conffiles = String::from_utf8_lossy(&content)
                        .lines()
                        .filter(|l| !l.is_empty())
                        .map(|l| l.to_string())
                        .collect();
                }
                "md5sums" => {
                    slf.md5sums = String::from_utf8_lossy(&content)
                        .lines()
                        .filter_map(|line| {
                            line.split_once(char::is_whitespace)
                                .map(|(digest, path)| {
                                    (digest.to_string(), path.trim_start().to_string())
                                })
                        })
                        .collect();
                }
                "" => {}
                other => {
                    slf.scripts.insert(other.to_string(), content);
                }
            }
        }

        if slf.paragraph.is_empty() {
            return Err(extraction_error(
                package,
                "control.tar carries no control file".to_string(),
            ));
        }

        Ok(slf)
    }

    /// The package's control paragraph.
    pub fn paragraph(&self) -> &ControlParagraph<'static> {
        &self.paragraph
    }

    pub fn conffiles(&self) -> &[String] {
        &self.conffiles
    }

    pub fn md5sums(&self) -> &[(String, String)] {
        &self.md5sums
    }

    /// Maintainer scripts by name. Stored, not executed.
    pub fn scripts(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.scripts
    }
}

/// A parsed `.deb` archive.
///
/// The data member is retained compressed; [Self::data_entries] streams it
/// through the matching decompressor into a tar reader on demand.
#[derive(Debug)]
pub struct DebArchive {
    package: String,
    control: ControlArchive,
    data_compression: Compression,
    data: Vec<u8>,
}

impl DebArchive {
    /// Parse a `.deb` from a reader.
    ///
    /// `package` names the package for error context.
    pub fn parse<R: Read>(reader: R, package: &str) -> Result<Self> {
        let mut archive = ar::Archive::new(reader);

        let mut control: Option<ControlArchive> = None;
        let mut data: Option<(Compression, Vec<u8>)> = None;
        let mut member_index = 0usize;

        while let Some(entry) = archive.next_entry() {
            let mut entry =
                entry.map_err(|e| extraction_error(package, format!("ar parse: {}", e)))?;

            let name = String::from_utf8_lossy(entry.header().identifier())
                .trim_end_matches('/')
                .to_string();

            let mut content = vec![];
            entry
                .read_to_end(&mut content)
                .map_err(|e| extraction_error(package, format!("ar member {}: {}", name, e)))?;

            if member_index == 0 {
                // The first member must be `debian-binary` with format 2.0.
                if name != "debian-binary" {
                    return Err(extraction_error(
                        package,
                        format!("first archive member is {}, not debian-binary", name),
                    ));
                }

                if content != b"2.0\n" {
                    return Err(extraction_error(
                        package,
                        format!(
                            "unsupported deb format version: {:?}",
                            String::from_utf8_lossy(&content)
                        ),
                    ));
                }
            } else if name.starts_with("control.tar") {
                let compression = member_compression(&name, "control.tar")?;
                let decompressed = decompress_buffer(&content, compression)?;
                control = Some(ControlArchive::from_tar_data(&decompressed, package)?);
            } else if name.starts_with("data.tar") {
                if control.is_none() {
                    return Err(extraction_error(
                        package,
                        "data.tar precedes control.tar".to_string(),
                    ));
                }

                data = Some((member_compression(&name, "data.tar")?, content));
            } else {
                // Trailing members (e.g. signature blobs) are tolerated.
                log::debug!("{}: ignoring archive member {}", package, name);
            }

            member_index += 1;
        }

        if member_index == 0 {
            return Err(extraction_error(package, "not an ar archive".to_string()));
        }

        let control = control
            .ok_or_else(|| extraction_error(package, "missing control.tar member".to_string()))?;
        let (data_compression, data) =
            data.ok_or_else(|| extraction_error(package, "missing data.tar member".to_string()))?;

        Ok(Self {
            package: package.to_string(),
            control,
            data_compression,
            data,
        })
    }

    pub fn control(&self) -> &ControlArchive {
        &self.control
    }

    /// Check the embedded control file against the advertised identity.
    pub fn verify_matches(&self, name: &str, version: &PackageVersion) -> Result<()> {
        let control_name = self.control.paragraph().required_field_str("Package")?;
        let control_version =
            PackageVersion::parse(self.control.paragraph().required_field_str("Version")?)?;

        if control_name != name || &control_version != version {
            return Err(extraction_error(
                &self.package,
                format!(
                    "control file identifies as {} {}, expected {} {}",
                    control_name, control_version, name, version
                ),
            ));
        }

        Ok(())
    }

    /// Stream the data member through its decompressor into a tar reader.
    pub fn data_entries(&self) -> Result<tar::Archive<Box<dyn Read + '_>>> {
        let cursor = Cursor::new(self.data.as_slice());

        let reader: Box<dyn Read + '_> = match self.data_compression {
            Compression::None => Box::new(cursor),
            Compression::Gzip => Box::new(
                libflate::gzip::Decoder::new(cursor)
                    .map_err(|e| extraction_error(&self.package, format!("gzip: {}", e)))?,
            ),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(cursor)),
            Compression::Zstd => Box::new(
                zstd::stream::read::Decoder::new(cursor)
                    .map_err(|e| extraction_error(&self.package, format!("zstd: {}", e)))?,
            ),
        };

        Ok(tar::Archive::new(reader))
    }
}

fn extraction_error(package: &str, reason: String) -> ImagingError {
    ImagingError::Extraction {
        package: package.to_string(),
        reason,
    }
}
