// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The package dependency meta language.

Control fields like `Depends` hold expressions such as
`libc6 (>= 2.4), debconf | debconf-2.0`. This module parses those
expressions into typed values and evaluates version constraints against
concrete [PackageVersion] instances.
*/

use {
    crate::{
        control::ControlParagraph,
        error::{ImagingError, Result},
        version::PackageVersion,
    },
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
    },
};

/// A version comparison operator in a dependency constraint.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VersionRelation {
    /// `<<`
    StrictlyEarlier,
    /// `<=`
    EarlierOrEqual,
    /// `=`
    Equal,
    /// `>=`
    LaterOrEqual,
    /// `>>`
    StrictlyLater,
}

impl VersionRelation {
    /// Parse an operator token.
    ///
    /// The single-character forms `<` and `>` are deprecated spellings of
    /// `<=` and `>=` per Debian policy and are accepted as such.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "<<" => Ok(Self::StrictlyEarlier),
            "<=" | "<" => Ok(Self::EarlierOrEqual),
            "=" => Ok(Self::Equal),
            ">=" | ">" => Ok(Self::LaterOrEqual),
            ">>" => Ok(Self::StrictlyLater),
            _ => Err(ImagingError::DependencyParse(format!(
                "unknown version relation: {}",
                s
            ))),
        }
    }

    /// Whether an [Ordering] of candidate-versus-operand satisfies this relation.
    pub fn permits(&self, ordering: Ordering) -> bool {
        match self {
            Self::StrictlyEarlier => ordering == Ordering::Less,
            Self::EarlierOrEqual => ordering != Ordering::Greater,
            Self::Equal => ordering == Ordering::Equal,
            Self::LaterOrEqual => ordering != Ordering::Less,
            Self::StrictlyLater => ordering == Ordering::Greater,
        }
    }
}

impl Display for VersionRelation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StrictlyEarlier => "<<",
            Self::EarlierOrEqual => "<=",
            Self::Equal => "=",
            Self::LaterOrEqual => ">=",
            Self::StrictlyLater => ">>",
        })
    }
}

/// A version constraint: an operator and an operand version.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VersionConstraint {
    pub relation: VersionRelation,
    pub version: PackageVersion,
}

impl VersionConstraint {
    /// Whether a concrete version satisfies this constraint.
    ///
    /// `=` requires equality including the epoch; the strict operators are
    /// strict.
    pub fn satisfied_by(&self, candidate: &PackageVersion) -> bool {
        self.relation.permits(candidate.cmp(&self.version))
    }
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.relation, self.version)
    }
}

/// A single package reference inside a dependency expression.
///
/// e.g. `libc6 (>= 2.4)` or `python3:any`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageRef {
    name: String,
    constraint: Option<VersionConstraint>,
    /// Architecture qualifier following the package name, e.g. the `any` in
    /// `python3:any`.
    architecture: Option<String>,
}

impl PackageRef {
    /// Construct a reference by name with no constraint.
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            constraint: None,
            architecture: None,
        }
    }

    /// Parse a single reference like `name[:arch] [(op version)]`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() {
            return Err(ImagingError::DependencyParse(
                "empty package reference".to_string(),
            ));
        }

        let (spec, constraint) = if let Some(open) = s.find('(') {
            let close = s.rfind(')').ok_or_else(|| {
                ImagingError::DependencyParse(format!("unterminated constraint in '{}'", s))
            })?;

            let inner = s[open + 1..close].trim();
            let (relation, version) = inner.split_once(char::is_whitespace).ok_or_else(|| {
                ImagingError::DependencyParse(format!("malformed constraint in '{}'", s))
            })?;

            (
                s[0..open].trim(),
                Some(VersionConstraint {
                    relation: VersionRelation::parse(relation)?,
                    version: PackageVersion::parse(version.trim())?,
                }),
            )
        } else {
            (s, None)
        };

        // Build-profile / architecture restriction lists ([amd64], <!nocheck>)
        // only occur in source-package relationships; reject them rather than
        // silently misparse.
        if spec.contains('[') || spec.contains('<') {
            return Err(ImagingError::DependencyParse(format!(
                "unsupported restriction syntax in '{}'",
                s
            )));
        }

        let (name, architecture) = match spec.split_once(':') {
            Some((name, arch)) => (name, Some(arch.to_string())),
            None => (spec, None),
        };

        if name.is_empty() {
            return Err(ImagingError::DependencyParse(format!(
                "missing package name in '{}'",
                s
            )));
        }

        Ok(Self {
            name: name.to_string(),
            constraint,
            architecture,
        })
    }

    /// The package name being referenced.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version constraint, if any.
    pub fn constraint(&self) -> Option<&VersionConstraint> {
        self.constraint.as_ref()
    }

    /// The architecture qualifier, if any.
    pub fn architecture(&self) -> Option<&str> {
        self.architecture.as_deref()
    }

    /// Whether a concrete `(name, version)` pair satisfies this reference.
    pub fn matches(&self, name: &str, version: &PackageVersion) -> bool {
        if self.name != name {
            return false;
        }

        match &self.constraint {
            Some(constraint) => constraint.satisfied_by(version),
            None => true,
        }
    }
}

impl Display for PackageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;

        if let Some(arch) = &self.architecture {
            write!(f, ":{}", arch)?;
        }

        if let Some(constraint) = &self.constraint {
            write!(f, " {}", constraint)?;
        }

        Ok(())
    }
}

/// One entry in a dependency list: a disjunction of alternatives.
///
/// e.g. the `debconf | debconf-2.0` in
/// `Depends: debconf | debconf-2.0, libc6`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Dependency {
    alternatives: Vec<PackageRef>,
}

impl Dependency {
    /// Parse an alternation like `a (>= 1) | b`.
    pub fn parse(s: &str) -> Result<Self> {
        let alternatives = s
            .split('|')
            .map(PackageRef::parse)
            .collect::<Result<Vec<_>>>()?;

        if alternatives.is_empty() {
            return Err(ImagingError::DependencyParse(format!(
                "no alternatives in '{}'",
                s
            )));
        }

        Ok(Self { alternatives })
    }

    /// The alternatives, in written order.
    pub fn alternatives(&self) -> &[PackageRef] {
        &self.alternatives
    }

    /// Whether any alternative matches the `(name, version)` pair.
    pub fn matches(&self, name: &str, version: &PackageVersion) -> bool {
        self.alternatives.iter().any(|r| r.matches(name, version))
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(
            &self
                .alternatives
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(" | "),
        )
    }
}

/// A parsed dependency field value: a conjunction of [Dependency] entries.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct DependencyList {
    dependencies: Vec<Dependency>,
}

impl DependencyList {
    /// Parse an expression like `libc6 (>= 2.4), debconf | debconf-2.0`.
    pub fn parse(s: &str) -> Result<Self> {
        let dependencies = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Dependency::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { dependencies })
    }

    /// Iterate over entries in written order.
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }
}

impl Display for DependencyList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(
            &self
                .dependencies
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        )
    }
}

/// The collection of control fields that define relationships between packages.
#[derive(Clone, Debug, Default)]
pub struct PackageDependencyFields {
    pub depends: Option<DependencyList>,
    pub pre_depends: Option<DependencyList>,
    pub provides: Option<DependencyList>,
    pub conflicts: Option<DependencyList>,
    pub breaks: Option<DependencyList>,
    pub replaces: Option<DependencyList>,
}

impl PackageDependencyFields {
    /// Obtain an instance from the relationship fields of a control paragraph.
    pub fn from_paragraph(paragraph: &ControlParagraph) -> Result<Self> {
        let get = |field: &str| -> Result<Option<DependencyList>> {
            paragraph.field_dependency_list(field).transpose()
        };

        Ok(Self {
            depends: get("Depends")?,
            pre_depends: get("Pre-Depends")?,
            provides: get("Provides")?,
            conflicts: get("Conflicts")?,
            breaks: get("Breaks")?,
            replaces: get("Replaces")?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn version(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn parse_simple() -> Result<()> {
        let dl = DependencyList::parse("libc6 (>= 2.4), debconf | debconf-2.0")?;
        assert_eq!(dl.len(), 2);

        let entries = dl.iter().collect::<Vec<_>>();
        assert_eq!(entries[0].alternatives().len(), 1);
        assert_eq!(entries[0].alternatives()[0].name(), "libc6");
        assert_eq!(entries[1].alternatives().len(), 2);
        assert_eq!(entries[1].alternatives()[1].name(), "debconf-2.0");

        Ok(())
    }

    #[test]
    fn parse_arch_qualifier() -> Result<()> {
        let r = PackageRef::parse("python3:any (>= 3.9)")?;
        assert_eq!(r.name(), "python3");
        assert_eq!(r.architecture(), Some("any"));
        assert!(r.constraint().is_some());

        Ok(())
    }

    #[test]
    fn display_round_trip() -> Result<()> {
        let s = "libc6 (>= 2.4), debconf | debconf-2.0, python3:any";
        assert_eq!(DependencyList::parse(s)?.to_string(), s);

        Ok(())
    }

    #[test]
    fn constraint_evaluation() -> Result<()> {
        let r = PackageRef::parse("b (>= 1)")?;
        assert!(r.matches("b", &version("1.0")));
        assert!(r.matches("b", &version("2.0")));
        assert!(!r.matches("b", &version("0.9")));
        assert!(!r.matches("c", &version("2.0")));

        let strict = PackageRef::parse("b (<< 2)")?;
        assert!(strict.matches("b", &version("1.9")));
        assert!(!strict.matches("b", &version("2")));

        let eq = PackageRef::parse("b (= 1:1.0)")?;
        assert!(eq.matches("b", &version("1:1.0")));
        // Equality includes the epoch.
        assert!(!eq.matches("b", &version("1.0")));

        Ok(())
    }

    #[test]
    fn deprecated_single_character_relations() -> Result<()> {
        let r = PackageRef::parse("b (> 1)")?;
        assert!(r.matches("b", &version("1")));
        assert!(r.matches("b", &version("2")));

        Ok(())
    }

    #[test]
    fn reject_malformed() {
        assert!(PackageRef::parse("").is_err());
        assert!(PackageRef::parse("a (>= 1").is_err());
        assert!(PackageRef::parse("a (bogus 1)").is_err());
        assert!(DependencyList::parse("a,,b").is_ok());
    }

    #[test]
    fn tilde_in_constraint() -> Result<()> {
        let r = PackageRef::parse("kernel (>= 5.10~rc1)")?;
        assert!(r.matches("kernel", &version("5.10")));
        assert!(!r.matches("kernel", &version("5.10~beta")));

        Ok(())
    }
}
