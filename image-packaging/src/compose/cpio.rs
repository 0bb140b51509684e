// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Deterministic cpio "new ASCII" (newc) emission.

The newc format frames each member with a `070701` magic followed by 13
8-digit hex fields, the NUL-terminated name padded to 4 bytes, and data
padded to 4 bytes. The archive ends with the `TRAILER!!!` member and is
padded to a 512-byte boundary.

Inode numbers are assigned sequentially in path order, so output bytes
depend only on the staged entries.
*/

use {
    super::ComposeOptions,
    crate::{
        error::{ImagingError, Result},
        staging::{FileEntry, FileKind, Payload, StagingTree},
    },
    std::io::Write,
};

const MAGIC: &[u8] = b"070701";

const MODE_REGULAR: u32 = 0o100000;
const MODE_DIRECTORY: u32 = 0o040000;
const MODE_SYMLINK: u32 = 0o120000;
const MODE_CHAR: u32 = 0o020000;
const MODE_BLOCK: u32 = 0o060000;
const MODE_FIFO: u32 = 0o010000;

struct NewcFields {
    inode: u32,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    mtime: u32,
    file_size: u32,
    rdev_major: u32,
    rdev_minor: u32,
}

fn write_member<W: Write>(writer: &mut W, fields: &NewcFields, name: &str, data: &[u8]) -> Result<()> {
    writer.write_all(MAGIC)?;

    // Field order per cpio(5): ino, mode, uid, gid, nlink, mtime, filesize,
    // devmajor, devminor, rdevmajor, rdevminor, namesize, check.
    for value in [
        fields.inode,
        fields.mode,
        fields.uid,
        fields.gid,
        fields.nlink,
        fields.mtime,
        fields.file_size,
        0,
        0,
        fields.rdev_major,
        fields.rdev_minor,
        name.len() as u32 + 1,
        0,
    ] {
        write!(writer, "{:08x}", value)?;
    }

    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\0")?;

    // Header (110 bytes) + name + NUL pads to a 4-byte boundary.
    let written = 110 + name.len() + 1;
    writer.write_all(&pad4(written))?;

    writer.write_all(data)?;
    writer.write_all(&pad4(data.len()))?;

    Ok(())
}

fn pad4(len: usize) -> Vec<u8> {
    vec![0u8; (4 - len % 4) % 4]
}

/// Write entries as a newc cpio archive.
///
/// Hardlinks are materialized as independent members carrying the target's
/// content, which keeps member emission single-pass and deterministic.
pub(super) fn write_cpio(
    staging: &StagingTree,
    entries: &[FileEntry],
    options: &ComposeOptions,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    for (position, entry) in entries.iter().enumerate() {
        let inode = position as u32 + 1;
        let mtime = options.entry_mtime(entry.mtime) as u32;

        let (type_bits, nlink, rdev, data) = match entry.kind {
            FileKind::Directory => (MODE_DIRECTORY, 2, (0, 0), vec![]),
            FileKind::Regular => {
                let data = match &entry.payload {
                    Payload::Blob(digest) => staging.blob_data(digest)?,
                    _ => vec![],
                };

                (MODE_REGULAR, 1, (0, 0), data)
            }
            FileKind::Hardlink => {
                let target = match &entry.payload {
                    Payload::Link(target) => target,
                    _ => unreachable!("hardlinks always carry a target"),
                };

                let target_entry = staging.entry(target).ok_or_else(|| {
                    ImagingError::Extraction {
                        package: entry.origin.clone(),
                        reason: format!("hardlink {} targets missing {}", entry.path, target),
                    }
                })?;

                let data = match &target_entry.payload {
                    Payload::Blob(digest) => staging.blob_data(digest)?,
                    _ => vec![],
                };

                (MODE_REGULAR, 1, (0, 0), data)
            }
            FileKind::Symlink => {
                let target = match &entry.payload {
                    Payload::Link(target) => target.clone(),
                    _ => unreachable!("symlinks always carry a target"),
                };

                (MODE_SYMLINK, 1, (0, 0), target.into_bytes())
            }
            FileKind::CharDevice | FileKind::BlockDevice => {
                let rdev = match entry.payload {
                    Payload::Device { major, minor } => (major, minor),
                    _ => (0, 0),
                };

                (
                    if entry.kind == FileKind::CharDevice {
                        MODE_CHAR
                    } else {
                        MODE_BLOCK
                    },
                    1,
                    rdev,
                    vec![],
                )
            }
            FileKind::Fifo => (MODE_FIFO, 1, (0, 0), vec![]),
        };

        let fields = NewcFields {
            inode,
            mode: type_bits | (entry.mode & 0o7777),
            uid: entry.uid,
            gid: entry.gid,
            nlink,
            mtime,
            file_size: data.len() as u32,
            rdev_major: rdev.0,
            rdev_minor: rdev.1,
        };

        write_member(&mut out, &fields, &entry.path, &data)?;
    }

    let trailer = NewcFields {
        inode: 0,
        mode: 0,
        uid: 0,
        gid: 0,
        nlink: 1,
        mtime: 0,
        file_size: 0,
        rdev_major: 0,
        rdev_minor: 0,
    };
    write_member(&mut out, &trailer, "TRAILER!!!", &[])?;

    // Pad the archive to the conventional 512-byte block boundary.
    let pad = (512 - out.len() % 512) % 512;
    out.extend(std::iter::repeat(0u8).take(pad));

    Ok(out)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            compose::{compose, ArchiveFormat, OutputFormat},
            deb::{test_support::build_test_deb, DebArchive},
            io::Compression,
        },
        std::io::Cursor,
    };

    fn staged_tree() -> (tempfile::TempDir, StagingTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = StagingTree::new(dir.path().join("stage")).unwrap();

        let deb = build_test_deb("widget", "1.0-1", Compression::Gzip).unwrap();
        let archive = DebArchive::parse(Cursor::new(deb), "widget").unwrap();
        tree.unpack_deb(&archive, "widget", []).unwrap();

        (dir, tree)
    }

    fn read_u32_hex(data: &[u8], offset: usize) -> u32 {
        u32::from_str_radix(std::str::from_utf8(&data[offset..offset + 8]).unwrap(), 16).unwrap()
    }

    #[test]
    fn archive_shape() -> Result<()> {
        let (_dir, tree) = staged_tree();

        let bytes = compose(
            &tree,
            OutputFormat {
                archive: ArchiveFormat::Cpio,
                compression: Compression::None,
            },
            &ComposeOptions {
                reproducible: true,
                source_date_epoch: Some(0),
            },
        )?;

        assert_eq!(&bytes[0..6], MAGIC);
        assert_eq!(bytes.len() % 512, 0);

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("TRAILER!!!"));
        assert!(text.contains("usr/bin/widget"));
        assert!(text.contains("dev/console"));

        Ok(())
    }

    #[test]
    fn first_member_fields() -> Result<()> {
        let (_dir, tree) = staged_tree();

        let bytes = write_cpio(
            &tree,
            &tree.snapshot(),
            &ComposeOptions {
                reproducible: true,
                source_date_epoch: Some(0),
            },
        )?;

        // First member is the sorted-first path: `dev`.
        let inode = read_u32_hex(&bytes, 6);
        let mode = read_u32_hex(&bytes, 6 + 8);
        let mtime = read_u32_hex(&bytes, 6 + 8 * 5);

        assert_eq!(inode, 1);
        assert_eq!(mode & 0o170000, MODE_DIRECTORY);
        assert_eq!(mtime, 0);

        let name_offset = 110;
        assert_eq!(&bytes[name_offset..name_offset + 3], b"dev");

        Ok(())
    }

    #[test]
    fn cpio_is_reproducible() -> Result<()> {
        let (_dir, tree) = staged_tree();

        let format = OutputFormat {
            archive: ArchiveFormat::Cpio,
            compression: Compression::Gzip,
        };
        let options = ComposeOptions {
            reproducible: true,
            source_date_epoch: Some(0),
        };

        let first = compose(&tree, format, &options)?;
        let second = compose(&tree, format, &options)?;

        assert_eq!(first, second);

        Ok(())
    }
}
