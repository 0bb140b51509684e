// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The staging tree: an in-memory file table plus best-effort disk mirror.

Package payloads and overlays are merged into a [StagingTree]. Every node
is recorded as a [FileEntry] in an in-memory table backed by a
content-addressed blob store for regular-file payloads. The filesystem
under the staging path mirrors the table where the host permits; when it
does not (device nodes without privileges, foreign ownership), the table
remains authoritative and the composer reproduces the attributes in the
output archive metadata. This replaces the external `fakeroot` wrapper the
build flow would otherwise need.
*/

use {
    crate::{
        deb::DebArchive,
        error::{ImagingError, Result},
        io::ContentDigest,
    },
    log::{debug, warn},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        fs,
        io::Read,
        path::{Path, PathBuf},
        sync::RwLock,
        time::UNIX_EPOCH,
    },
};

/// Origin marker for entries applied from host overlays.
pub const OVERLAY_ORIGIN: &str = "overlay";

/// The kind of a staged filesystem node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
}

/// Payload reference of a staged node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    /// SHA-256 hex of a blob in the content-addressed store.
    Blob(String),

    /// Symlink or hardlink target.
    Link(String),

    /// Device numbers for character and block devices.
    Device { major: u32, minor: u32 },

    /// No payload (directories, fifos).
    None,
}

/// One node in the staging tree.
#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Normalized path relative to the stage root (no leading `/`, no `.`
    /// or `..` components).
    pub path: String,
    pub kind: FileKind,
    /// Permission bits (12 bits: setuid/setgid/sticky + rwx).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
    pub size: u64,
    pub payload: Payload,
    /// Package name the entry came from, or [OVERLAY_ORIGIN].
    pub origin: String,
}

/// Normalize a tar/overlay path into staging form.
///
/// Returns [None] for the archive root entry.
pub fn normalize_path(path: &str) -> Result<Option<String>> {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    let trimmed = trimmed.trim_end_matches('/');

    if trimmed.is_empty() || trimmed == "." {
        return Ok(None);
    }

    if trimmed.split('/').any(|part| part == ".." || part == "." || part.is_empty()) {
        return Err(ImagingError::Extraction {
            package: "<path>".to_string(),
            reason: format!("non-normalized path in archive: {}", path),
        });
    }

    Ok(Some(trimmed.to_string()))
}

/// In-memory table of staged entries plus blob store and disk mirror.
///
/// The table is guarded by a reader-writer lock: merges take the writer
/// lock briefly per entry, while the composer's traversal works from a
/// consistent snapshot.
pub struct StagingTree {
    /// Directory holding the best-effort filesystem mirror.
    tree_root: PathBuf,

    /// Directory holding content-addressed regular-file payloads.
    blob_root: PathBuf,

    entries: RwLock<BTreeMap<String, FileEntry>>,

    /// Package → names it declares `Replaces` over; drives collision
    /// resolution.
    replaces: RwLock<HashMap<String, HashSet<String>>>,
}

impl StagingTree {
    /// Create a staging tree under a base directory.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let tree_root = base.join("tree");
        let blob_root = base.join("blobs");

        fs::create_dir_all(&tree_root)?;
        fs::create_dir_all(&blob_root)?;

        Ok(Self {
            tree_root,
            blob_root,
            entries: RwLock::new(BTreeMap::new()),
            replaces: RwLock::new(HashMap::new()),
        })
    }

    /// The on-disk mirror root.
    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("staging table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A sorted snapshot of all entries (byte-wise lexicographic by path).
    pub fn snapshot(&self) -> Vec<FileEntry> {
        self.entries
            .read()
            .expect("staging table lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Look up a single entry by normalized path.
    pub fn entry(&self, path: &str) -> Option<FileEntry> {
        self.entries
            .read()
            .expect("staging table lock poisoned")
            .get(path)
            .cloned()
    }

    /// Read a regular-file payload from the blob store.
    pub fn blob_data(&self, sha256_hex: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.blob_root.join(sha256_hex))?)
    }

    /// Unpack a parsed `.deb` data archive into the tree.
    ///
    /// `replaces` lists package names the unpacking package declares
    /// `Replaces` over.
    pub fn unpack_deb(
        &self,
        archive: &DebArchive,
        package: &str,
        replaces: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        self.replaces
            .write()
            .expect("replaces lock poisoned")
            .entry(package.to_string())
            .or_default()
            .extend(replaces);

        let mut tar = archive.data_entries()?;
        self.unpack_tar(&mut tar, package)
    }

    /// Merge every entry of a tar stream into the tree under one origin.
    pub fn unpack_tar<R: Read>(
        &self,
        tar: &mut tar::Archive<R>,
        package: &str,
    ) -> Result<()> {
        for entry in tar.entries().map_err(|e| extraction_error(package, e))? {
            let mut entry = entry.map_err(|e| extraction_error(package, e))?;

            let raw_path = entry
                .path()
                .map_err(|e| extraction_error(package, e))?
                .to_string_lossy()
                .to_string();

            let path = match normalize_path(&raw_path)? {
                Some(path) => path,
                None => continue,
            };

            // Gather header fields before the entry is read mutably.
            let header = entry.header();
            let mode = header.mode().map_err(|e| extraction_error(package, e))? & 0o7777;
            let uid = header.uid().map_err(|e| extraction_error(package, e))? as u32;
            let gid = header.gid().map_err(|e| extraction_error(package, e))? as u32;
            let mtime = header.mtime().map_err(|e| extraction_error(package, e))?;
            let declared_size = header.size().unwrap_or(0);
            let device_major = header
                .device_major()
                .unwrap_or_default()
                .unwrap_or(0);
            let device_minor = header
                .device_minor()
                .unwrap_or_default()
                .unwrap_or(0);
            let entry_type = header.entry_type();

            let staged = if entry_type.is_dir() {
                FileEntry {
                    path,
                    kind: FileKind::Directory,
                    mode,
                    uid,
                    gid,
                    mtime,
                    size: 0,
                    payload: Payload::None,
                    origin: package.to_string(),
                }
            } else if entry_type.is_symlink() {
                let target = entry
                    .link_name()
                    .map_err(|e| extraction_error(package, e))?
                    .ok_or_else(|| {
                        ImagingError::Extraction {
                            package: package.to_string(),
                            reason: format!("symlink {} lacks a target", path),
                        }
                    })?
                    .to_string_lossy()
                    .to_string();

                FileEntry {
                    path,
                    kind: FileKind::Symlink,
                    mode,
                    uid,
                    gid,
                    mtime,
                    size: 0,
                    payload: Payload::Link(target),
                    origin: package.to_string(),
                }
            } else if entry_type.is_hard_link() {
                let target = entry
                    .link_name()
                    .map_err(|e| extraction_error(package, e))?
                    .ok_or_else(|| ImagingError::Extraction {
                        package: package.to_string(),
                        reason: format!("hardlink {} lacks a target", path),
                    })?
                    .to_string_lossy()
                    .to_string();

                let target = normalize_path(&target)?.ok_or_else(|| ImagingError::Extraction {
                    package: package.to_string(),
                    reason: format!("hardlink {} targets the root", path),
                })?;

                FileEntry {
                    path,
                    kind: FileKind::Hardlink,
                    mode,
                    uid,
                    gid,
                    mtime,
                    size: 0,
                    payload: Payload::Link(target),
                    origin: package.to_string(),
                }
            } else if entry_type.is_character_special() || entry_type.is_block_special() {
                FileEntry {
                    path,
                    kind: if entry_type.is_character_special() {
                        FileKind::CharDevice
                    } else {
                        FileKind::BlockDevice
                    },
                    mode,
                    uid,
                    gid,
                    mtime,
                    size: 0,
                    payload: Payload::Device {
                        major: device_major,
                        minor: device_minor,
                    },
                    origin: package.to_string(),
                }
            } else if entry_type.is_fifo() {
                FileEntry {
                    path,
                    kind: FileKind::Fifo,
                    mode,
                    uid,
                    gid,
                    mtime,
                    size: 0,
                    payload: Payload::None,
                    origin: package.to_string(),
                }
            } else if entry_type.is_file() {
                let mut content = Vec::with_capacity(declared_size as usize);
                entry
                    .read_to_end(&mut content)
                    .map_err(|e| extraction_error(package, e))?;

                let digest = self.store_blob(&content)?;

                FileEntry {
                    path,
                    kind: FileKind::Regular,
                    mode,
                    uid,
                    gid,
                    mtime,
                    size: content.len() as u64,
                    payload: Payload::Blob(digest),
                    origin: package.to_string(),
                }
            } else {
                debug!(
                    "{}: skipping unsupported tar entry type {:?} at {}",
                    package, entry_type, raw_path
                );
                continue;
            };

            self.record(staged)?;
        }

        Ok(())
    }

    /// Apply a host file or directory on top of the staged tree.
    ///
    /// Overlays are applied after extraction and override package content
    /// unconditionally.
    pub fn apply_overlay(
        &self,
        source: &Path,
        destination: &str,
        mode: Option<u32>,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        let destination = normalize_path(destination)?.ok_or_else(|| {
            ImagingError::Config(format!(
                "overlay destination must not be the root: {}",
                destination
            ))
        })?;

        let metadata = fs::symlink_metadata(source)?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if metadata.is_dir() {
            self.force_record(FileEntry {
                path: destination.clone(),
                kind: FileKind::Directory,
                mode: mode.unwrap_or(0o755),
                uid,
                gid,
                mtime,
                size: 0,
                payload: Payload::None,
                origin: OVERLAY_ORIGIN.to_string(),
            })?;

            let mut children = fs::read_dir(source)?
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .map(|e| e.file_name())
                .collect::<Vec<_>>();
            children.sort();

            for child in children {
                let child_name = child.to_string_lossy().to_string();
                self.apply_overlay(
                    &source.join(&child),
                    &format!("{}/{}", destination, child_name),
                    // Directory-level mode only applies to the top entry.
                    None,
                    uid,
                    gid,
                )?;
            }

            return Ok(());
        }

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(source)?.to_string_lossy().to_string();

            return self.force_record(FileEntry {
                path: destination,
                kind: FileKind::Symlink,
                mode: 0o777,
                uid,
                gid,
                mtime,
                size: 0,
                payload: Payload::Link(target),
                origin: OVERLAY_ORIGIN.to_string(),
            });
        }

        let content = fs::read(source)?;
        let digest = self.store_blob(&content)?;

        #[cfg(unix)]
        let source_mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let source_mode = 0o644;

        self.force_record(FileEntry {
            path: destination,
            kind: FileKind::Regular,
            mode: mode.unwrap_or(source_mode),
            uid,
            gid,
            mtime,
            size: content.len() as u64,
            payload: Payload::Blob(digest),
            origin: OVERLAY_ORIGIN.to_string(),
        })
    }

    /// Stage a regular file from an in-memory buffer.
    ///
    /// Used by generators for synthesized content (e.g. an init script).
    /// Overrides any existing entry at the path.
    pub fn stage_file(
        &self,
        path: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        mtime: u64,
        content: &[u8],
        origin: &str,
    ) -> Result<()> {
        let path = normalize_path(path)?.ok_or_else(|| {
            ImagingError::Config("staged file path must not be the root".to_string())
        })?;

        let digest = self.store_blob(content)?;

        self.force_record(FileEntry {
            path,
            kind: FileKind::Regular,
            mode,
            uid,
            gid,
            mtime,
            size: content.len() as u64,
            payload: Payload::Blob(digest),
            origin: origin.to_string(),
        })
    }

    /// Store a payload in the content-addressed blob store.
    fn store_blob(&self, content: &[u8]) -> Result<String> {
        let digest = ContentDigest::sha256_of(content).digest_hex();
        let path = self.blob_root.join(&digest);

        if !path.is_file() {
            let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
            fs::write(&tmp, content)?;
            fs::rename(tmp, path)?;
        }

        Ok(digest)
    }

    /// Record an entry, applying the collision policy.
    fn record(&self, entry: FileEntry) -> Result<()> {
        self.ensure_parents(&entry)?;

        {
            let mut entries = self.entries.write().expect("staging table lock poisoned");

            if let Some(existing) = entries.get(&entry.path) {
                match self.resolve_collision(existing, &entry)? {
                    Collision::KeepExisting => {
                        return Ok(());
                    }
                    Collision::TakeIncoming => {}
                }
            }

            entries.insert(entry.path.clone(), entry.clone());
        }

        self.materialize(&entry);

        Ok(())
    }

    /// Record an entry unconditionally (overlay semantics).
    fn force_record(&self, entry: FileEntry) -> Result<()> {
        self.ensure_parents(&entry)?;

        self.entries
            .write()
            .expect("staging table lock poisoned")
            .insert(entry.path.clone(), entry.clone());

        self.materialize(&entry);

        Ok(())
    }

    /// Create missing parent directory entries.
    fn ensure_parents(&self, entry: &FileEntry) -> Result<()> {
        let mut parents = vec![];
        let mut current = entry.path.as_str();

        while let Some((parent, _)) = current.rsplit_once('/') {
            parents.push(parent.to_string());
            current = parent;
        }

        let mut created = vec![];

        {
            let mut entries = self.entries.write().expect("staging table lock poisoned");

            for parent in parents.into_iter().rev() {
                if let Some(existing) = entries.get(&parent) {
                    if existing.kind != FileKind::Directory {
                        return Err(ImagingError::FileConflict {
                            path: parent,
                            existing: existing.origin.clone(),
                            incoming: entry.origin.clone(),
                        });
                    }

                    continue;
                }

                let dir = FileEntry {
                    path: parent.clone(),
                    kind: FileKind::Directory,
                    mode: 0o755,
                    uid: 0,
                    gid: 0,
                    mtime: entry.mtime,
                    size: 0,
                    payload: Payload::None,
                    origin: entry.origin.clone(),
                };

                entries.insert(parent, dir.clone());
                created.push(dir);
            }
        }

        for dir in created {
            self.materialize(&dir);
        }

        Ok(())
    }

    fn resolve_collision(&self, existing: &FileEntry, incoming: &FileEntry) -> Result<Collision> {
        // Directories merge; the first recorded metadata stands.
        if existing.kind == FileKind::Directory && incoming.kind == FileKind::Directory {
            return Ok(Collision::KeepExisting);
        }

        if existing.origin == incoming.origin {
            return Ok(Collision::TakeIncoming);
        }

        // Identical content is silently shared: same kind, same payload
        // (blob hash, link target, or device numbers).
        if existing.kind == incoming.kind && existing.payload == incoming.payload {
            return Ok(Collision::KeepExisting);
        }

        let replaces = self.replaces.read().expect("replaces lock poisoned");

        let incoming_replaces_existing = replaces
            .get(&incoming.origin)
            .map(|r| r.contains(&existing.origin))
            .unwrap_or(false);
        let existing_replaces_incoming = replaces
            .get(&existing.origin)
            .map(|r| r.contains(&incoming.origin))
            .unwrap_or(false);

        if incoming_replaces_existing || existing_replaces_incoming {
            // Replaces relationship in either direction: the later unpack
            // wins.
            debug!(
                "{} replaces {} at {}",
                incoming.origin, existing.origin, incoming.path
            );
            return Ok(Collision::TakeIncoming);
        }

        Err(ImagingError::FileConflict {
            path: incoming.path.clone(),
            existing: existing.origin.clone(),
            incoming: incoming.origin.clone(),
        })
    }

    /// Mirror an entry onto the host filesystem, best effort.
    ///
    /// Failures to reproduce privileged attributes (ownership, device
    /// nodes) are expected when running unprivileged; the table remains
    /// authoritative and the composer writes those attributes into the
    /// output archive.
    fn materialize(&self, entry: &FileEntry) {
        let disk_path = self.tree_root.join(&entry.path);

        let res = match &entry.kind {
            FileKind::Directory => fs::create_dir_all(&disk_path),
            FileKind::Regular => self
                .blob_data(match &entry.payload {
                    Payload::Blob(digest) => digest,
                    _ => return,
                })
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                .and_then(|data| {
                    if disk_path.exists() {
                        fs::remove_file(&disk_path)?;
                    }
                    fs::write(&disk_path, data)
                }),
            FileKind::Symlink => {
                let target = match &entry.payload {
                    Payload::Link(target) => target,
                    _ => return,
                };

                if disk_path.exists() || fs::symlink_metadata(&disk_path).is_ok() {
                    let _ = fs::remove_file(&disk_path);
                }

                #[cfg(unix)]
                {
                    std::os::unix::fs::symlink(target, &disk_path)
                }
                #[cfg(not(unix))]
                {
                    Ok(())
                }
            }
            FileKind::Hardlink => {
                let target = match &entry.payload {
                    Payload::Link(target) => target,
                    _ => return,
                };

                if disk_path.exists() {
                    let _ = fs::remove_file(&disk_path);
                }

                fs::hard_link(self.tree_root.join(target), &disk_path)
            }
            // Device nodes and fifos cannot be created unprivileged; leave
            // a zero-byte placeholder so path-based tooling sees the node.
            FileKind::CharDevice | FileKind::BlockDevice | FileKind::Fifo => {
                fs::write(&disk_path, b"")
            }
        };

        if let Err(e) = res {
            warn!(
                "could not materialize {} on disk ({}); metadata table remains authoritative",
                entry.path, e
            );
            return;
        }

        #[cfg(unix)]
        if matches!(entry.kind, FileKind::Regular | FileKind::Directory) {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&disk_path, fs::Permissions::from_mode(entry.mode));
        }
    }

    /// Validate cross-entry invariants after all merges.
    ///
    /// Hardlinks must reference an existing regular file.
    pub fn verify(&self) -> Result<()> {
        let entries = self.entries.read().expect("staging table lock poisoned");

        for entry in entries.values() {
            if entry.kind == FileKind::Hardlink {
                let target = match &entry.payload {
                    Payload::Link(target) => target,
                    _ => {
                        continue;
                    }
                };

                match entries.get(target) {
                    Some(target_entry) if target_entry.kind == FileKind::Regular => {}
                    _ => {
                        return Err(ImagingError::Extraction {
                            package: entry.origin.clone(),
                            reason: format!(
                                "hardlink {} references missing regular file {}",
                                entry.path, target
                            ),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Remove the staging directories from disk.
    pub fn destroy(self) -> Result<()> {
        for dir in [&self.tree_root, &self.blob_root] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }

        Ok(())
    }
}

enum Collision {
    KeepExisting,
    TakeIncoming,
}

fn extraction_error(package: &str, e: impl std::fmt::Display) -> ImagingError {
    ImagingError::Extraction {
        package: package.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{deb::test_support::build_test_deb, deb::DebArchive, io::Compression},
        std::io::Cursor,
    };

    fn tree() -> (tempfile::TempDir, StagingTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = StagingTree::new(dir.path().join("stage")).unwrap();

        (dir, tree)
    }

    fn unpack_widget(tree: &StagingTree) {
        let deb = build_test_deb("widget", "1.0-1", Compression::Gzip).unwrap();
        let archive = DebArchive::parse(Cursor::new(deb), "widget").unwrap();
        tree.unpack_deb(&archive, "widget", []).unwrap();
    }

    #[test]
    fn unpack_records_all_kinds() -> Result<()> {
        let (_dir, tree) = tree();
        unpack_widget(&tree);

        let exe = tree.entry("usr/bin/widget").unwrap();
        assert_eq!(exe.kind, FileKind::Regular);
        assert_eq!(exe.mode, 0o755);
        assert_eq!(exe.origin, "widget");
        assert_eq!(tree.blob_data(match &exe.payload {
            Payload::Blob(d) => d,
            _ => panic!("expected blob"),
        })?, b"#!/bin/sh\necho widget\n");

        let link = tree.entry("usr/bin/widget-link").unwrap();
        assert_eq!(link.kind, FileKind::Symlink);
        assert_eq!(link.payload, Payload::Link("widget".to_string()));

        let hard = tree.entry("usr/bin/widget-hard").unwrap();
        assert_eq!(hard.kind, FileKind::Hardlink);

        // Device metadata is recorded even though the node cannot be
        // created unprivileged.
        let console = tree.entry("dev/console").unwrap();
        assert_eq!(console.kind, FileKind::CharDevice);
        assert_eq!(console.payload, Payload::Device { major: 5, minor: 1 });

        // Foreign ownership lives in the table.
        let log = tree.entry("var/log/widget.log").unwrap();
        assert_eq!((log.uid, log.gid), (104, 110));

        tree.verify()?;

        Ok(())
    }

    #[test]
    fn identical_content_is_shared() -> Result<()> {
        let (_dir, tree) = tree();
        unpack_widget(&tree);

        // A second package shipping a byte-identical file is fine.
        let deb = build_test_deb("widget", "1.0-1", Compression::Gzip).unwrap();
        let archive = DebArchive::parse(Cursor::new(deb), "widget2").unwrap();
        tree.unpack_deb(&archive, "widget2", []).unwrap();

        Ok(())
    }

    #[test]
    fn conflicting_content_errors_without_replaces() {
        let (_dir, tree) = tree();
        unpack_widget(&tree);

        // Overwrite the staged file with different content under another
        // origin.
        let digest = tree.store_blob(b"other content").unwrap();
        let res = tree.record(FileEntry {
            path: "usr/bin/widget".to_string(),
            kind: FileKind::Regular,
            mode: 0o755,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 13,
            payload: Payload::Blob(digest),
            origin: "gadget".to_string(),
        });

        assert!(matches!(res, Err(ImagingError::FileConflict { .. })));
    }

    #[test]
    fn replaces_lets_later_package_win() -> Result<()> {
        let (_dir, tree) = tree();
        unpack_widget(&tree);

        let digest = tree.store_blob(b"other content")?;

        // gadget Replaces widget, so its file content wins.
        tree.replaces
            .write()
            .unwrap()
            .entry("gadget".to_string())
            .or_default()
            .insert("widget".to_string());

        tree.record(FileEntry {
            path: "usr/bin/widget".to_string(),
            kind: FileKind::Regular,
            mode: 0o755,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 13,
            payload: Payload::Blob(digest.clone()),
            origin: "gadget".to_string(),
        })?;

        let entry = tree.entry("usr/bin/widget").unwrap();
        assert_eq!(entry.origin, "gadget");
        assert_eq!(entry.payload, Payload::Blob(digest));

        Ok(())
    }

    #[test]
    fn overlays_override_unconditionally() -> Result<()> {
        let (dir, tree) = tree();
        unpack_widget(&tree);

        let host_file = dir.path().join("widget.conf");
        fs::write(&host_file, b"overlaid\n")?;

        tree.apply_overlay(&host_file, "etc/widget.conf", Some(0o600), 10, 20)?;

        let entry = tree.entry("etc/widget.conf").unwrap();
        assert_eq!(entry.origin, OVERLAY_ORIGIN);
        assert_eq!(entry.mode, 0o600);
        assert_eq!((entry.uid, entry.gid), (10, 20));

        Ok(())
    }

    #[test]
    fn overlay_creates_missing_parents() -> Result<()> {
        let (dir, tree) = tree();

        let host_file = dir.path().join("issue");
        fs::write(&host_file, b"welcome\n")?;

        tree.apply_overlay(&host_file, "etc/motd.d/issue", None, 0, 0)?;

        assert_eq!(tree.entry("etc").unwrap().kind, FileKind::Directory);
        assert_eq!(tree.entry("etc/motd.d").unwrap().kind, FileKind::Directory);

        Ok(())
    }

    #[test]
    fn path_normalization() {
        assert_eq!(normalize_path("./usr/bin/sh").unwrap(), Some("usr/bin/sh".to_string()));
        assert_eq!(normalize_path("/etc/fstab").unwrap(), Some("etc/fstab".to_string()));
        assert_eq!(normalize_path("usr/").unwrap(), Some("usr".to_string()));
        assert_eq!(normalize_path("./").unwrap(), None);
        assert!(normalize_path("a/../b").is_err());
    }

    #[test]
    fn hardlink_to_missing_target_fails_verify() {
        let (_dir, tree) = tree();

        tree.force_record(FileEntry {
            path: "bin/dangling".to_string(),
            kind: FileKind::Hardlink,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 0,
            payload: Payload::Link("bin/missing".to_string()),
            origin: "pkg".to_string(),
        })
        .unwrap();

        assert!(tree.verify().is_err());
    }
}
