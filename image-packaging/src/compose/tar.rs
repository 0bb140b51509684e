// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Deterministic tar emission from the staging table. */

use {
    super::ComposeOptions,
    crate::{
        error::{ImagingError, Result},
        staging::{FileEntry, FileKind, Payload, StagingTree},
    },
    tar::{EntryType, Header},
};

fn payload_link(entry: &FileEntry) -> Result<&str> {
    match &entry.payload {
        Payload::Link(target) => Ok(target),
        _ => Err(ImagingError::Extraction {
            package: entry.origin.clone(),
            reason: format!("link entry {} lacks a target", entry.path),
        }),
    }
}

fn payload_device(entry: &FileEntry) -> (u32, u32) {
    match entry.payload {
        Payload::Device { major, minor } => (major, minor),
        _ => (0, 0),
    }
}

/// Write entries as a tar archive.
///
/// Headers are ustar-layout with GNU long-name extensions when a path
/// exceeds the header field. Owners are written numerically only;
/// `uname`/`gname` stay empty so no system name lookup can leak into the
/// output.
pub(super) fn write_tar(
    staging: &StagingTree,
    entries: &[FileEntry],
    options: &ComposeOptions,
) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in entries {
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_uid(entry.uid as u64);
        header.set_gid(entry.gid as u64);
        header.set_mtime(options.entry_mtime(entry.mtime));
        header.set_username("")?;
        header.set_groupname("")?;
        header.set_size(0);

        match entry.kind {
            FileKind::Directory => {
                header.set_entry_type(EntryType::Directory);
                builder.append_data(
                    &mut header,
                    format!("{}/", entry.path),
                    std::io::empty(),
                )?;
            }
            FileKind::Regular => {
                let data = match &entry.payload {
                    Payload::Blob(digest) => staging.blob_data(digest)?,
                    _ => vec![],
                };

                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, &entry.path, data.as_slice())?;
            }
            FileKind::Symlink => {
                header.set_entry_type(EntryType::Symlink);
                builder.append_link(&mut header, &entry.path, payload_link(entry)?)?;
            }
            FileKind::Hardlink => {
                header.set_entry_type(EntryType::Link);
                builder.append_link(&mut header, &entry.path, payload_link(entry)?)?;
            }
            FileKind::CharDevice | FileKind::BlockDevice => {
                let (major, minor) = payload_device(entry);

                header.set_entry_type(if entry.kind == FileKind::CharDevice {
                    EntryType::Char
                } else {
                    EntryType::Block
                });
                header.set_device_major(major)?;
                header.set_device_minor(minor)?;
                builder.append_data(&mut header, &entry.path, std::io::empty())?;
            }
            FileKind::Fifo => {
                header.set_entry_type(EntryType::Fifo);
                builder.append_data(&mut header, &entry.path, std::io::empty())?;
            }
        }
    }

    Ok(builder.into_inner()?)
}
