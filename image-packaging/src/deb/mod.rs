// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Read `.deb` binary package files.

A `.deb` file is an `ar(5)` archive with 3 members in canonical order:
`debian-binary` (contents `2.0\n`), `control.tar`, and `data.tar`, the
tars optionally gzip, xz, or zstd compressed.
*/

pub mod reader;

pub use reader::{ControlArchive, DebArchive};

use crate::{
    error::{ImagingError, Result},
    io::Compression,
};

/// Derive the compression format from a tar member name.
///
/// `stem` is the member name without extension, e.g. `control.tar`.
pub(crate) fn member_compression(name: &str, stem: &str) -> Result<Compression> {
    match name.strip_prefix(stem) {
        Some("") => Ok(Compression::None),
        Some(".gz") => Ok(Compression::Gzip),
        Some(".xz") => Ok(Compression::Xz),
        Some(".zst") => Ok(Compression::Zstd),
        _ => Err(ImagingError::DebUnknownCompression(name.to_string())),
    }
}

/// In-memory construction of small `.deb` fixtures for tests.
#[cfg(test)]
pub(crate) mod test_support {
    use {
        super::*,
        std::io::{Cursor, Write},
        tar::{EntryType, Header},
    };

    pub(crate) fn compress_buffer(data: &[u8], compression: Compression) -> Result<Vec<u8>> {
        Ok(match compression {
            Compression::None => data.to_vec(),
            Compression::Gzip => {
                let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
                encoder.write_all(data)?;
                encoder.finish().into_result()?
            }
            Compression::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data)?;
                encoder.finish()?
            }
            Compression::Zstd => zstd::stream::encode_all(Cursor::new(data), 0)?,
        })
    }

    fn plain_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_mode(mode);
        header.set_size(size);
        header.set_mtime(1000);
        header.set_uid(0);
        header.set_gid(0);

        header
    }

    fn control_tar(name: &str, version: &str) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());

        let control = format!(
            "Package: {}\nVersion: {}\nArchitecture: arm64\n\
             Maintainer: Example Maintainer <maintainer@example.com>\n\
             Description: test fixture package\n",
            name, version
        );

        let mut add = |path: &str, content: &[u8], mode: u32| -> Result<()> {
            let mut header = plain_header(EntryType::Regular, mode, content.len() as u64);
            builder.append_data(&mut header, path, content)?;
            Ok(())
        };

        add("control", control.as_bytes(), 0o644)?;
        add("conffiles", b"/etc/widget.conf\n", 0o644)?;
        add(
            "md5sums",
            b"0123456789abcdef0123456789abcdef  usr/bin/widget\n",
            0o644,
        )?;
        add("postinst", b"#!/bin/sh\nexit 0\n", 0o755)?;

        Ok(builder.into_inner()?)
    }

    fn data_tar() -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());

        for dir in ["usr/", "usr/bin/", "etc/", "dev/", "var/", "var/log/"] {
            let mut header = plain_header(EntryType::Directory, 0o755, 0);
            builder.append_data(&mut header, dir, std::io::empty())?;
        }

        let script = b"#!/bin/sh\necho widget\n";
        let mut header = plain_header(EntryType::Regular, 0o755, script.len() as u64);
        builder.append_data(&mut header, "usr/bin/widget", &script[..])?;

        let conf = b"answer=42\n";
        let mut header = plain_header(EntryType::Regular, 0o644, conf.len() as u64);
        builder.append_data(&mut header, "etc/widget.conf", &conf[..])?;

        let mut header = plain_header(EntryType::Symlink, 0o777, 0);
        builder.append_link(&mut header, "usr/bin/widget-link", "widget")?;

        let mut header = plain_header(EntryType::Link, 0o644, 0);
        builder.append_link(&mut header, "usr/bin/widget-hard", "usr/bin/widget")?;

        // A device node and a non-root-owned file exercise the metadata
        // table when extraction runs unprivileged.
        let mut header = plain_header(EntryType::Char, 0o620, 0);
        header.set_device_major(5)?;
        header.set_device_minor(1)?;
        builder.append_data(&mut header, "dev/console", std::io::empty())?;

        let log = b"";
        let mut header = plain_header(EntryType::Regular, 0o640, 0);
        header.set_uid(104);
        header.set_gid(110);
        builder.append_data(&mut header, "var/log/widget.log", &log[..])?;

        Ok(builder.into_inner()?)
    }

    /// Build a complete `.deb` with the given data-member compression.
    pub(crate) fn build_test_deb(
        name: &str,
        version: &str,
        compression: Compression,
    ) -> Result<Vec<u8>> {
        let control = compress_buffer(&control_tar(name, version)?, compression)?;
        let data = compress_buffer(&data_tar()?, compression)?;

        let mut buf = vec![];
        let mut builder = ar::Builder::new(&mut buf);

        let header = ar::Header::new(b"debian-binary".to_vec(), 4);
        builder.append(&header, &b"2.0\n"[..])?;

        let header = ar::Header::new(
            format!("control.tar{}", compression.extension()).into_bytes(),
            control.len() as u64,
        );
        builder.append(&header, control.as_slice())?;

        let header = ar::Header::new(
            format!("data.tar{}", compression.extension()).into_bytes(),
            data.len() as u64,
        );
        builder.append(&header, data.as_slice())?;

        drop(builder);

        Ok(buf)
    }
}
