// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("version string error: {0}")]
    Version(#[from] crate::version::VersionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error fetching {url} after {attempts} attempts: {message}")]
    Network {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("invalid signature over {url}")]
    SignatureInvalid { url: String },

    #[error("repository {url} is unsigned but policy requires a signature")]
    UnsignedRepo { url: String },

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("required control field missing: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("release file does not contain a SHA256 index")]
    ReleaseNoSha256Index,

    #[error("expected 1 paragraph in release file; got {0}")]
    ReleaseParagraphMismatch(usize),

    #[error("malformed index entry in release file: {0}")]
    ReleaseIndexEntryMalformed(String),

    #[error("no Packages index for component {component}, architecture {architecture}")]
    PackagesIndexNotFound {
        component: String,
        architecture: String,
    },

    #[error("{0}")]
    Unsatisfiable(crate::resolver::UnsatisfiableDependency),

    #[error("file conflict at {path}: provided by {existing} and {incoming}")]
    FileConflict {
        path: String,
        existing: String,
        incoming: String,
    },

    #[error("malformed package archive {package}: {reason}")]
    Extraction { package: String, reason: String },

    #[error("unknown compression in package archive member: {0}")]
    DebUnknownCompression(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, ImagingError>;
