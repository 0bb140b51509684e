// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository signature verification.

Repositories publish either a cleartext-signed `InRelease` document or a
plain `Release` file with a detached `Release.gpg` signature. Verification
is a tri-state: [SignatureOutcome::Verified], [SignatureOutcome::Unsigned],
or [SignatureOutcome::Invalid]. The caller's [TrustPolicy] decides whether
`Unsigned` is acceptable; `Invalid` (a bad signature over present content)
is always fatal.
*/

use {
    crate::{
        error::{ImagingError, Result},
        release::ReleaseFile,
    },
    pgp::{Deserializable, SignedPublicKey, StandaloneSignature},
    std::io::Cursor,
};

/// Whether unsigned repository metadata is acceptable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrustPolicy {
    /// Repository metadata must carry a signature verifiable by the keyring.
    Signed,

    /// Unsigned metadata is accepted. Signed metadata is still verified and
    /// a bad signature remains fatal.
    UnsignedAllowed,
}

/// The result of a signature verification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureOutcome {
    /// A signature was present and verified against the keyring.
    Verified,

    /// No signature material was available to verify against.
    Unsigned,

    /// A signature was present but did not verify.
    Invalid,
}

/// A set of armored OpenPGP public keys supplied by configuration.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: Vec<SignedPublicKey>,
}

impl Keyring {
    /// Add an armored public key to the keyring.
    pub fn add_armored_key(&mut self, armored: &str) -> Result<()> {
        let (key, _) = SignedPublicKey::from_armor_single(Cursor::new(armored.as_bytes()))?;
        self.keys.push(key);

        Ok(())
    }

    /// Construct a keyring from an iterable of armored public keys.
    pub fn from_armored_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut keyring = Self::default();

        for key in keys {
            keyring.add_armored_key(key)?;
        }

        Ok(keyring)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Verify the cleartext signatures attached to an `InRelease` file.
    pub fn verify_cleartext(&self, release: &ReleaseFile<'_>) -> SignatureOutcome {
        let signatures = match release.signatures() {
            Some(signatures) => signatures,
            None => {
                return SignatureOutcome::Unsigned;
            }
        };

        if self.keys.is_empty() {
            // A signature exists but there is nothing to check it against.
            return SignatureOutcome::Unsigned;
        }

        for key in &self.keys {
            if signatures.verify(key).is_ok() {
                return SignatureOutcome::Verified;
            }
        }

        SignatureOutcome::Invalid
    }

    /// Verify a detached signature (`Release.gpg`) over release content.
    ///
    /// Both armored and binary signature encodings are accepted.
    pub fn verify_detached(&self, content: &[u8], signature: &[u8]) -> SignatureOutcome {
        if self.keys.is_empty() {
            return SignatureOutcome::Unsigned;
        }

        let parsed = StandaloneSignature::from_armor_single(Cursor::new(signature))
            .map(|(sig, _)| sig)
            .or_else(|_| StandaloneSignature::from_bytes(Cursor::new(signature)));

        let signature = match parsed {
            Ok(signature) => signature,
            Err(_) => {
                return SignatureOutcome::Invalid;
            }
        };

        for key in &self.keys {
            if signature.verify(key, content).is_ok() {
                return SignatureOutcome::Verified;
            }
        }

        SignatureOutcome::Invalid
    }
}

/// Apply a trust policy to a verification outcome.
///
/// Returns `Ok(())` when the outcome is acceptable under the policy.
/// `url` provides error context only.
pub fn enforce_policy(outcome: SignatureOutcome, policy: TrustPolicy, url: &str) -> Result<()> {
    match (outcome, policy) {
        (SignatureOutcome::Verified, _) => Ok(()),
        (SignatureOutcome::Unsigned, TrustPolicy::UnsignedAllowed) => Ok(()),
        (SignatureOutcome::Unsigned, TrustPolicy::Signed) => Err(ImagingError::UnsignedRepo {
            url: url.to_string(),
        }),
        (SignatureOutcome::Invalid, _) => Err(ImagingError::SignatureInvalid {
            url: url.to_string(),
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unsigned_release_is_unsigned() {
        let release = ReleaseFile::from_reader(std::io::Cursor::new("Origin: Test\n")).unwrap();
        let keyring = Keyring::default();

        assert_eq!(
            keyring.verify_cleartext(&release),
            SignatureOutcome::Unsigned
        );
    }

    #[test]
    fn policy_enforcement() {
        assert!(enforce_policy(SignatureOutcome::Verified, TrustPolicy::Signed, "u").is_ok());
        assert!(
            enforce_policy(SignatureOutcome::Unsigned, TrustPolicy::UnsignedAllowed, "u").is_ok()
        );
        assert!(matches!(
            enforce_policy(SignatureOutcome::Unsigned, TrustPolicy::Signed, "u"),
            Err(ImagingError::UnsignedRepo { .. })
        ));
        assert!(matches!(
            enforce_policy(SignatureOutcome::Invalid, TrustPolicy::UnsignedAllowed, "u"),
            Err(ImagingError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn garbage_detached_signature_is_invalid() {
        let mut keyring = Keyring::default();
        // Verification against any non-empty keyring classifies garbage
        // signature bytes as Invalid. An empty keyring cannot distinguish,
        // so it reports Unsigned.
        assert_eq!(
            keyring.verify_detached(b"content", b"not a signature"),
            SignatureOutcome::Unsigned
        );

        assert!(keyring.add_armored_key("not armored at all").is_err());
    }
}
