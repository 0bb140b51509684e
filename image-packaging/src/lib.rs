// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Embedded Linux image packaging primitives.

This crate implements the package-resolution and filesystem-assembly
engine behind the boot, initrd, and root filesystem generators: reading
Debian-style APT repositories, resolving versioned package dependencies,
downloading and verifying package archives, extracting them into a staging
tree without requiring root, and composing the staged tree into a
deterministic output archive.

# A Tour of Functionality

Repository metadata handling starts with *control files*, the `Name: value`
paragraph syntax underlying most Debian formats. [control::ControlParagraph]
defines a paragraph; [control::ControlParagraphReader] and
[control::ControlParagraphAsyncReader] stream paragraphs from readers.

[release::ReleaseFile] represents a parsed `Release`/`InRelease` file,
including its `SHA256` index block. [signature::Keyring] verifies cleartext
and detached repository signatures; the caller's [signature::TrustPolicy]
decides whether unsigned metadata is acceptable.

[version::PackageVersion] implements Debian version parsing and total
ordering. The dependency meta language (`libc6 (>= 2.4), a | b`) is parsed
by the [dependency] module.

[repository::RepositoryClient] drives index initialization against
HTTP(S) repositories, including flat repositories without a `dists/`
hierarchy; it produces a [repository::RepositoryIndex] addressable by name
and virtual name. [resolver::Resolver] computes a closed
[resolver::InstallSet] in deterministic topological unpack order.

[fetcher::HttpFetcher] downloads with retries, resumption, and a
content-addressed [cache::Cache]. [deb::DebArchive] parses `.deb` archives;
[staging::StagingTree] merges their payloads (and host overlays) into a
metadata table that stays authoritative where the host denies privileged
operations. [compose::compose] emits deterministic tar or cpio artifacts.

[pipeline::run_build] wires the stages together under a bounded worker
model with cooperative cancellation.
*/

pub mod binary_package;
pub mod cache;
pub mod compose;
pub mod control;
pub mod deb;
pub mod dependency;
pub mod error;
pub mod fetcher;
pub mod io;
pub mod pipeline;
pub mod release;
pub mod repository;
pub mod resolver;
pub mod signature;
pub mod staging;
pub mod version;
