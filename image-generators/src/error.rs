// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generator error handling and process exit codes. */

use {image_packaging::error::ImagingError, thiserror::Error};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Imaging(#[from] ImagingError),
}

pub type Result<T> = std::result::Result<T, GeneratorError>;

impl GeneratorError {
    /// Map an error to the documented process exit code.
    ///
    /// `2` configuration, `3` resolution, `4` fetch/verification, `5`
    /// extraction, `6` internal, `130` cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Yaml(_) => 2,
            Self::Io(_) => 6,
            Self::Imaging(e) => match e {
                ImagingError::Config(_) => 2,
                ImagingError::Unsatisfiable(_)
                | ImagingError::DependencyParse(_)
                | ImagingError::Version(_) => 3,
                ImagingError::Network { .. }
                | ImagingError::NotFound(_)
                | ImagingError::Integrity { .. }
                | ImagingError::SignatureInvalid { .. }
                | ImagingError::UnsignedRepo { .. }
                | ImagingError::ControlParse(_)
                | ImagingError::ReleaseNoSha256Index
                | ImagingError::ReleaseParagraphMismatch(_)
                | ImagingError::ReleaseIndexEntryMalformed(_)
                | ImagingError::PackagesIndexNotFound { .. } => 4,
                ImagingError::Extraction { .. }
                | ImagingError::FileConflict { .. }
                | ImagingError::DebUnknownCompression(_) => 5,
                ImagingError::Cancelled => 130,
                _ => 6,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(
            GeneratorError::Config("bad".to_string()).exit_code(),
            2
        );
        assert_eq!(
            GeneratorError::from(ImagingError::NotFound("u".to_string())).exit_code(),
            4
        );
        assert_eq!(
            GeneratorError::from(ImagingError::Cancelled).exit_code(),
            130
        );
        assert_eq!(
            GeneratorError::from(ImagingError::Extraction {
                package: "p".to_string(),
                reason: "r".to_string()
            })
            .exit_code(),
            5
        );
    }
}
