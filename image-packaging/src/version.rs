// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling. */

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A Debian package version.
///
/// Versions have the format `[epoch:]upstream_version[-debian_revision]` and
/// sort according to the rules in
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
/// The total order implemented here obeys those rules, including the special
/// casing of `~`, which sorts before everything, even the end of a component.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // Epoch is the part before the first colon, if present.
        // upstream_version and debian_revision split on the last hyphen.

        let (epoch, remainder) = if let Some(pos) = s.find(':') {
            (Some(&s[0..pos]), &s[pos + 1..])
        } else {
            (None, s)
        };

        let (upstream, debian) = if let Some(pos) = remainder.rfind('-') {
            (&remainder[0..pos], Some(&remainder[pos + 1..]))
        } else {
            (remainder, None)
        };

        let epoch = if let Some(epoch) = epoch {
            if !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        // The upstream_version must contain only alphanumerics and the
        // characters . + - ~ and hyphens only when a debian_revision follows.
        if !upstream.chars().all(|c| match c {
            c if c.is_ascii_alphanumeric() => true,
            '.' | '+' | '~' => true,
            '-' => debian.is_some(),
            _ => false,
        }) {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let upstream_version = upstream.to_string();

        let debian_revision = if let Some(debian) = debian {
            if !debian.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '+' | '.' | '~' => true,
                _ => false,
            }) {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }

            Some(debian.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream_version,
            debian_revision,
        })
    }

    /// The `epoch` component of the version string, if defined explicitly.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Assumed value of the `epoch` component, defaulting to `0`.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// `upstream` component of the version string.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// `debian_revision` component of the version string.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.upstream_version)?;

        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split a string at the first digit character.
///
/// Returns the leading run of non-digits and everything from the first digit
/// on. Either value can be empty.
fn split_leading_nondigits(s: &str) -> (&str, &str) {
    match s.chars().position(|c| c.is_ascii_digit()) {
        Some(pos) => (&s[0..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Split a string at the first non-digit character.
fn split_leading_digits(s: &str) -> (&str, &str) {
    let pos = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .unwrap_or(s.len());

    (&s[0..pos], &s[pos..])
}

/// Compare two digit runs numerically.
///
/// Leading zeros are ignored and an empty run counts as zero. Comparing by
/// stripped length then lexically avoids any integer-width limit on the
/// run.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Sort rank of a character in the modified lexical order.
///
/// Tilde sorts before anything (including end of string, rank 1), letters
/// sort before non-letters.
fn char_rank(c: char) -> u32 {
    match c {
        '~' => 0,
        c if c.is_ascii_alphabetic() => 2,
        _ => 3,
    }
}

fn lexical_compare(a: &str, b: &str) -> Ordering {
    // Comparison of ASCII values modified so that all letters sort earlier
    // than all non-letters and so that a tilde sorts before anything, even
    // the end of a part. A missing character has rank 1, between tilde and
    // letters.
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();

    loop {
        match (a_chars.next(), b_chars.next()) {
            (None, None) => {
                return Ordering::Equal;
            }
            (a_char, b_char) => {
                let a_rank = a_char.map(char_rank).unwrap_or(1);
                let b_rank = b_char.map(char_rank).unwrap_or(1);

                match a_rank.cmp(&b_rank) {
                    Ordering::Equal => {}
                    res => {
                        return res;
                    }
                }

                // Same rank. Within a rank, plain ASCII order decides.
                match (a_char, b_char) {
                    (Some(x), Some(y)) => match x.cmp(&y) {
                        Ordering::Equal => {}
                        res => {
                            return res;
                        }
                    },
                    // Both exhausted-with-tilde cases were handled by rank.
                    _ => {}
                }
            }
        }
    }
}

/// Compare a version component string using Debian rules.
///
/// The comparison alternates between a modified lexical comparison of
/// non-digit runs and a numeric comparison of digit runs until both inputs
/// are exhausted.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a_remaining = a;
    let mut b_remaining = b;

    loop {
        let (a_nondigit, a_rest) = split_leading_nondigits(a_remaining);
        let (b_nondigit, b_rest) = split_leading_nondigits(b_remaining);

        match lexical_compare(a_nondigit, b_nondigit) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        let (a_digits, a_rest) = split_leading_digits(a_rest);
        let (b_digits, b_rest) = split_leading_digits(b_rest);

        match compare_digit_runs(a_digits, b_digits) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        if a_rest.is_empty() && b_rest.is_empty() {
            return Ordering::Equal;
        }

        a_remaining = a_rest;
        b_remaining = b_rest;
    }
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epoch compares numerically, then upstream, then revision. The
        // absence of a debian revision is equivalent to `0`.
        match self.epoch_assumed().cmp(&other.epoch_assumed()) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        match compare_component(&self.upstream_version, &other.upstream_version) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        let a = self.debian_revision.as_deref().unwrap_or("0");
        let b = other.debian_revision.as_deref().unwrap_or("0");

        compare_component(a, b)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            PackageVersion::parse("1:4.7.0+dfsg1-2")?,
            PackageVersion {
                epoch: Some(1),
                upstream_version: "4.7.0+dfsg1".into(),
                debian_revision: Some("2".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("3.3.2.final~github")?,
            PackageVersion {
                epoch: None,
                upstream_version: "3.3.2.final~github".into(),
                debian_revision: None,
            }
        );
        assert_eq!(
            PackageVersion::parse("0.18.0+dfsg-2+b1")?,
            PackageVersion {
                epoch: None,
                upstream_version: "0.18.0+dfsg".into(),
                debian_revision: Some("2+b1".into())
            }
        );

        assert!(PackageVersion::parse("a:1.0").is_err());
        assert!(PackageVersion::parse("1.0_1").is_err());

        Ok(())
    }

    #[test]
    fn format_round_trip() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            let v = PackageVersion::parse(s)?;
            assert_eq!(format!("{}", v), s);
        }

        Ok(())
    }

    #[test]
    fn lexical_order() {
        assert_eq!(lexical_compare("~", ""), Ordering::Less);
        assert_eq!(lexical_compare("", "~"), Ordering::Greater);
        assert_eq!(lexical_compare("~~", "~"), Ordering::Less);
        assert_eq!(lexical_compare("~~", "~~a"), Ordering::Less);
        assert_eq!(lexical_compare("", "a"), Ordering::Less);
        assert_eq!(lexical_compare("a", ""), Ordering::Greater);
        assert_eq!(lexical_compare("a", "+"), Ordering::Less);
        assert_eq!(lexical_compare("z", "+"), Ordering::Less);
    }

    #[test]
    fn component_order() {
        assert_eq!(
            compare_component("1.0~beta1~svn1245", "1.0~beta1"),
            Ordering::Less
        );
        assert_eq!(compare_component("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(compare_component("1a", "10a"), Ordering::Less);
        assert_eq!(compare_component("01", "1"), Ordering::Equal);
        // Digit runs wider than any machine integer still compare.
        assert_eq!(
            compare_component("999999999999999999999999", "2"),
            Ordering::Greater
        );
    }

    fn cmp(a: &str, b: &str) -> Ordering {
        PackageVersion::parse(a)
            .unwrap()
            .cmp(&PackageVersion::parse(b).unwrap())
    }

    #[test]
    fn version_sort() {
        let mut versions = vec!["2.0", "1.0-1z", "1:1.0", "1.0", "1.1", "1.0-10z", "1.0-1a"]
            .into_iter()
            .map(|s| PackageVersion::parse(s).unwrap())
            .collect::<Vec<_>>();
        versions.sort();

        assert_eq!(
            versions.iter().map(|v| format!("{}", v)).collect::<Vec<_>>(),
            vec!["1.0", "1.0-1a", "1.0-1z", "1.0-10z", "1.1", "2.0", "1:1.0"]
        );
    }

    #[test]
    fn tilde_sorts_low() {
        assert_eq!(cmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0~", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0~~", "1.0~"), Ordering::Less);
    }

    #[test]
    fn order_is_antisymmetric() {
        let samples = [
            "1.0", "1.0-1", "1.0-1a", "1.0~rc1", "1:0.5", "2.0+dfsg-1", "0.9z",
        ];

        for a in samples {
            for b in samples {
                assert_eq!(cmp(a, b), cmp(b, a).reverse(), "{} vs {}", a, b);
                if a == b {
                    assert_eq!(cmp(a, b), Ordering::Equal);
                }
            }
        }
    }

    #[test]
    fn revision_defaults_to_zero() {
        assert_eq!(cmp("1.0", "1.0-0"), Ordering::Equal);
        assert_eq!(cmp("1.0-0~", "1.0"), Ordering::Less);
    }
}
