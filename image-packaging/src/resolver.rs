// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency resolution.

The resolver computes a closed install set satisfying a list of root
package references against one or more repository indexes in priority
order. The search is best-first with backtracking: for every obligation it
commits to the highest-ranked viable candidate and records the remaining
options as a backtrack point. `Conflicts`/`Breaks` against already-chosen
packages (not overridden by `Replaces`) reject candidates and, when no
option remains, unwind to the most recent decision.

Resolution is purely in-memory and runs to completion on one worker; the
result is total and deterministic for fixed inputs.
*/

use {
    crate::{
        dependency::{Dependency, PackageRef},
        error::{ImagingError, Result},
        repository::{CandidateHandle, RepositoryIndex},
        version::PackageVersion,
    },
    log::{debug, warn},
    std::{
        collections::{BTreeMap, HashMap, HashSet, VecDeque},
        fmt::{Display, Formatter},
        sync::Arc,
    },
};

/// A dependency that could not be satisfied, with enough context to
/// reproduce: the root→leaf chain and every candidate considered along with
/// the reason it was rejected.
#[derive(Clone, Debug)]
pub struct UnsatisfiableDependency {
    /// Package names from the requested root down to the unsatisfied node.
    pub chain: Vec<String>,

    /// The dependency expression that failed.
    pub expression: String,

    /// Candidates considered for the failing expression.
    pub rejections: Vec<Rejection>,
}

/// Why one candidate was rejected while evaluating a dependency.
#[derive(Clone, Debug)]
pub struct Rejection {
    pub package: String,
    pub version: String,
    pub reason: String,
}

impl Display for UnsatisfiableDependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsatisfiable dependency '{}' (via {})",
            self.expression,
            self.chain.join(" -> ")
        )?;

        if self.rejections.is_empty() {
            write!(f, "; no candidates found")?;
        } else {
            for rejection in &self.rejections {
                write!(
                    f,
                    "\n  candidate {} {} rejected: {}",
                    rejection.package, rejection.version, rejection.reason
                )?;
            }
        }

        Ok(())
    }
}

/// Result of resolution: candidates in topological unpack order
/// (dependencies before dependents).
#[derive(Clone, Debug, Default)]
pub struct InstallSet {
    packages: Vec<Arc<CandidateHandle>>,
}

impl InstallSet {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CandidateHandle>> {
        self.packages.iter()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Package names in unpack order.
    pub fn names(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.name.as_str()).collect()
    }
}

impl IntoIterator for InstallSet {
    type Item = Arc<CandidateHandle>;
    type IntoIter = std::vec::IntoIter<Arc<CandidateHandle>>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.into_iter()
    }
}

/// An outstanding dependency to satisfy.
#[derive(Clone, Debug)]
struct Obligation {
    dependency: Dependency,
    /// Names from the root request to the package declaring this
    /// dependency; used for error reporting only.
    chain: Vec<String>,
}

/// Mutable search state, snapshotted at every decision point.
#[derive(Clone, Default)]
struct SearchState {
    chosen: BTreeMap<String, Arc<CandidateHandle>>,
    frontier: VecDeque<Obligation>,
}

/// A backtrack point: the state before a decision plus the options not yet
/// tried.
struct DecisionPoint {
    state: SearchState,
    obligation: Obligation,
    remaining: VecDeque<Arc<CandidateHandle>>,
}

/// Dependency resolver over repository indexes in priority order.
pub struct Resolver {
    indexes: Vec<Arc<RepositoryIndex>>,
    arch: String,
    include_essential: bool,
    pins: HashMap<String, PackageVersion>,
}

impl Resolver {
    /// Construct a resolver for a target architecture.
    ///
    /// `indexes` must be ordered by configured repository priority,
    /// highest first.
    pub fn new(indexes: Vec<Arc<RepositoryIndex>>, arch: impl ToString) -> Self {
        Self {
            indexes,
            arch: arch.to_string(),
            include_essential: false,
            pins: HashMap::new(),
        }
    }

    /// Also install every package flagged `Essential: yes` in any index.
    pub fn include_essential(mut self, include: bool) -> Self {
        self.include_essential = include;
        self
    }

    /// Pin a package to an exact version.
    pub fn pin(mut self, name: impl ToString, version: PackageVersion) -> Self {
        self.pins.insert(name.to_string(), version);
        self
    }

    /// Compute a closed install set for the given roots.
    pub fn resolve(&self, roots: &[PackageRef]) -> Result<InstallSet> {
        let mut state = SearchState::default();

        for root in roots {
            state.frontier.push_back(Obligation {
                dependency: Dependency::parse(&root.to_string())
                    .map_err(|_| ImagingError::DependencyParse(root.to_string()))?,
                chain: vec!["<requested>".to_string()],
            });
        }

        if self.include_essential {
            let mut essential_names = self
                .indexes
                .iter()
                .flat_map(|index| index.essential_candidates(&self.arch))
                .map(|c| c.name.clone())
                .collect::<Vec<_>>();
            essential_names.sort();
            essential_names.dedup();

            for name in essential_names {
                state.frontier.push_back(Obligation {
                    dependency: Dependency::parse(&name)?,
                    chain: vec!["<essential>".to_string()],
                });
            }
        }

        let mut decisions: Vec<DecisionPoint> = vec![];

        while let Some(obligation) = state.frontier.pop_front() {
            if self.obligation_satisfied(&state, &obligation)? {
                continue;
            }

            let (mut options, rejections) = self.viable_options(&state, &obligation)?;

            if let Some(choice) = options.pop_front() {
                let snapshot = SearchState {
                    chosen: state.chosen.clone(),
                    frontier: state.frontier.clone(),
                };

                self.commit(&mut state, &obligation, choice)?;

                if !options.is_empty() {
                    decisions.push(DecisionPoint {
                        state: snapshot,
                        obligation,
                        remaining: options,
                    });
                }

                continue;
            }

            // No viable option. Unwind to the most recent decision that
            // still has alternatives. The failed obligation is dropped with
            // the abandoned branch: it only existed because of the choice
            // being reverted, and the restored frontier retains any copy
            // that predated it.
            match decisions.pop() {
                Some(decision) => {
                    debug!(
                        "backtracking over '{}' to retry '{}'",
                        obligation.dependency, decision.obligation.dependency
                    );

                    state = decision.state;

                    let mut retry_options = decision.remaining;
                    let retry_obligation = decision.obligation;

                    let choice = retry_options
                        .pop_front()
                        .expect("decision points always hold at least one option");

                    let snapshot = SearchState {
                        chosen: state.chosen.clone(),
                        frontier: state.frontier.clone(),
                    };

                    self.commit(&mut state, &retry_obligation, choice)?;

                    if !retry_options.is_empty() {
                        decisions.push(DecisionPoint {
                            state: snapshot,
                            obligation: retry_obligation,
                            remaining: retry_options,
                        });
                    }
                }
                None => {
                    return Err(ImagingError::Unsatisfiable(UnsatisfiableDependency {
                        chain: obligation.chain.clone(),
                        expression: obligation.dependency.to_string(),
                        rejections,
                    }));
                }
            }
        }

        self.unpack_order(state.chosen)
    }

    /// Whether an obligation is already satisfied by the chosen set.
    fn obligation_satisfied(&self, state: &SearchState, obligation: &Obligation) -> Result<bool> {
        for alternative in obligation.dependency.alternatives() {
            if let Some(chosen) = state.chosen.get(alternative.name()) {
                if alternative.matches(&chosen.name, &chosen.version) {
                    return Ok(true);
                }
            }

            for chosen in state.chosen.values() {
                if provides_satisfies(chosen, alternative)? {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// Enumerate viable candidates for an obligation in deterministic
    /// preference order, along with rejection records for reporting.
    fn viable_options(
        &self,
        state: &SearchState,
        obligation: &Obligation,
    ) -> Result<(VecDeque<Arc<CandidateHandle>>, Vec<Rejection>)> {
        let mut options = VecDeque::new();
        let mut rejections = vec![];
        let mut seen = HashSet::new();

        for alternative in obligation.dependency.alternatives() {
            // Real candidates first, repos in priority order, versions
            // descending within a repo. The version constraint is applied
            // here rather than in the index lookup so rejected versions are
            // recorded for error reporting.
            for index in &self.indexes {
                for candidate in index.get_package(alternative.name(), &self.arch, None) {
                    if let Some(constraint) = alternative.constraint() {
                        if !constraint.satisfied_by(&candidate.version) {
                            rejections.push(Rejection {
                                package: candidate.name.clone(),
                                version: candidate.version.to_string(),
                                reason: format!("does not satisfy {}", constraint),
                            });
                            continue;
                        }
                    }

                    self.consider(state, candidate, &mut options, &mut rejections, &mut seen)?;
                }
            }

            // Virtual providers, unless a real package already matched this
            // alternative name.
            if options.iter().all(|c| c.name != alternative.name()) {
                for index in &self.indexes {
                    for provider in index.providers_of(alternative.name(), &self.arch) {
                        if provides_satisfies(&provider, alternative)? {
                            self.consider(
                                state,
                                provider,
                                &mut options,
                                &mut rejections,
                                &mut seen,
                            )?;
                        }
                    }
                }
            }
        }

        Ok((options, rejections))
    }

    /// Vet a single candidate against pins, prior choices, and conflicts.
    fn consider(
        &self,
        state: &SearchState,
        candidate: Arc<CandidateHandle>,
        options: &mut VecDeque<Arc<CandidateHandle>>,
        rejections: &mut Vec<Rejection>,
        seen: &mut HashSet<(String, String, String)>,
    ) -> Result<()> {
        let key = (
            candidate.name.clone(),
            candidate.version.to_string(),
            candidate.repo_id.clone(),
        );
        if !seen.insert(key) {
            return Ok(());
        }

        let mut reject = |reason: String| {
            rejections.push(Rejection {
                package: candidate.name.clone(),
                version: candidate.version.to_string(),
                reason,
            });
        };

        if let Some(pin) = self.pins.get(&candidate.name) {
            if *pin != candidate.version {
                reject(format!("pinned to version {}", pin));
                return Ok(());
            }
        }

        if let Some(chosen) = state.chosen.get(&candidate.name) {
            if chosen.version != candidate.version {
                reject(format!("already selected at version {}", chosen.version));
            }
            // Identical selection adds nothing.
            return Ok(());
        }

        for chosen in state.chosen.values() {
            if let Some(reason) = conflict_between(&candidate, chosen)? {
                reject(reason);
                return Ok(());
            }
        }

        options.push_back(candidate);

        Ok(())
    }

    /// Add a candidate to the chosen set and enqueue its dependencies.
    fn commit(
        &self,
        state: &mut SearchState,
        obligation: &Obligation,
        candidate: Arc<CandidateHandle>,
    ) -> Result<()> {
        let fields = candidate.candidate.dependency_fields()?;

        let mut chain = obligation.chain.clone();
        chain.push(candidate.name.clone());

        for list in [&fields.pre_depends, &fields.depends] {
            if let Some(list) = list {
                for dependency in list.iter() {
                    state.frontier.push_back(Obligation {
                        dependency: dependency.clone(),
                        chain: chain.clone(),
                    });
                }
            }
        }

        debug!("selected {} {}", candidate.name, candidate.version);
        state.chosen.insert(candidate.name.clone(), candidate);

        Ok(())
    }

    /// Order the closed set topologically for unpacking.
    ///
    /// `Pre-Depends` edges are strict: a cycle through them is fatal.
    /// `Depends` edges are best-effort: cycles are broken by releasing the
    /// lexicographically smallest blocked package.
    fn unpack_order(&self, chosen: BTreeMap<String, Arc<CandidateHandle>>) -> Result<InstallSet> {
        // name → (strict deps, soft deps) among chosen members.
        let mut strict: BTreeMap<&str, HashSet<String>> = BTreeMap::new();
        let mut soft: BTreeMap<&str, HashSet<String>> = BTreeMap::new();

        for (name, handle) in &chosen {
            let fields = handle.candidate.dependency_fields()?;

            let resolve_edges = |list: &Option<crate::dependency::DependencyList>,
                                 out: &mut HashSet<String>|
             -> Result<()> {
                if let Some(list) = list {
                    for dependency in list.iter() {
                        if let Some(satisfier) = satisfying_member(&chosen, dependency)? {
                            if satisfier != *name {
                                out.insert(satisfier);
                            }
                        }
                    }
                }

                Ok(())
            };

            let mut strict_edges = HashSet::new();
            let mut soft_edges = HashSet::new();
            resolve_edges(&fields.pre_depends, &mut strict_edges)?;
            resolve_edges(&fields.depends, &mut soft_edges)?;

            strict.insert(name.as_str(), strict_edges);
            soft.insert(name.as_str(), soft_edges);
        }

        let mut ordered = Vec::with_capacity(chosen.len());
        let mut placed: HashSet<String> = HashSet::new();

        // BTreeMap iteration gives the name-order tie-break for free.
        while placed.len() < chosen.len() {
            let ready = chosen
                .keys()
                .find(|name| {
                    !placed.contains(name.as_str())
                        && strict[name.as_str()].iter().all(|d| placed.contains(d))
                        && soft[name.as_str()].iter().all(|d| placed.contains(d))
                })
                .cloned();

            let next = match ready {
                Some(name) => name,
                None => {
                    // Every unplaced node is blocked. Release the smallest
                    // node whose strict dependencies are met; only soft
                    // cycles may be broken.
                    let candidate = chosen
                        .keys()
                        .find(|name| {
                            !placed.contains(name.as_str())
                                && strict[name.as_str()].iter().all(|d| placed.contains(d))
                        })
                        .cloned();

                    match candidate {
                        Some(name) => {
                            warn!("dependency cycle broken at {}", name);
                            name
                        }
                        None => {
                            let remaining = chosen
                                .keys()
                                .filter(|n| !placed.contains(n.as_str()))
                                .cloned()
                                .collect::<Vec<_>>();

                            return Err(ImagingError::Unsatisfiable(UnsatisfiableDependency {
                                chain: remaining,
                                expression: "Pre-Depends cycle".to_string(),
                                rejections: vec![],
                            }));
                        }
                    }
                }
            };

            placed.insert(next.clone());
            ordered.push(chosen[&next].clone());
        }

        Ok(InstallSet { packages: ordered })
    }
}

/// Which chosen member satisfies a dependency entry, if any.
///
/// Prefers a real-name match; falls back to `Provides`. Deterministic via
/// the BTreeMap iteration order of the chosen set.
fn satisfying_member(
    chosen: &BTreeMap<String, Arc<CandidateHandle>>,
    dependency: &Dependency,
) -> Result<Option<String>> {
    for alternative in dependency.alternatives() {
        if let Some(handle) = chosen.get(alternative.name()) {
            if alternative.matches(&handle.name, &handle.version) {
                return Ok(Some(handle.name.clone()));
            }
        }
    }

    for alternative in dependency.alternatives() {
        for handle in chosen.values() {
            if provides_satisfies(handle, alternative)? {
                return Ok(Some(handle.name.clone()));
            }
        }
    }

    Ok(None)
}

/// Whether a candidate's `Provides` satisfies a dependency alternative.
///
/// An unversioned `Provides` never satisfies a versioned dependency.
fn provides_satisfies(handle: &CandidateHandle, alternative: &PackageRef) -> Result<bool> {
    let provides = match handle.candidate.provides() {
        Some(provides) => provides?,
        None => {
            return Ok(false);
        }
    };

    for provided in provides.iter().flat_map(|d| d.alternatives()) {
        if provided.name() != alternative.name() {
            continue;
        }

        match (alternative.constraint(), provided.constraint()) {
            (None, _) => {
                return Ok(true);
            }
            (Some(wanted), Some(given)) => {
                if wanted.satisfied_by(&given.version) {
                    return Ok(true);
                }
            }
            (Some(_), None) => {}
        }
    }

    Ok(false)
}

/// Whether two candidates conflict, honoring `Replaces` overrides.
///
/// Returns a human-readable reason when they do.
fn conflict_between(
    candidate: &CandidateHandle,
    chosen: &CandidateHandle,
) -> Result<Option<String>> {
    if let Some(reason) = directed_conflict(candidate, chosen)? {
        return Ok(Some(reason));
    }

    directed_conflict(chosen, candidate).map(|r| {
        r.map(|_| {
            format!(
                "already-selected {} {} conflicts with it",
                chosen.name, chosen.version
            )
        })
    })
}

fn directed_conflict(a: &CandidateHandle, b: &CandidateHandle) -> Result<Option<String>> {
    let fields = a.candidate.dependency_fields()?;

    let matches_b = |list: &Option<crate::dependency::DependencyList>| -> bool {
        list.as_ref()
            .map(|list| list.iter().any(|d| d.matches(&b.name, &b.version)))
            .unwrap_or(false)
    };

    let conflicts = matches_b(&fields.conflicts);
    let breaks = matches_b(&fields.breaks);

    if !conflicts && !breaks {
        return Ok(None);
    }

    // `Replaces` paired with `Conflicts` on the same name overrides.
    if conflicts && matches_b(&fields.replaces) {
        return Ok(None);
    }

    Ok(Some(format!(
        "{} {} declares {} against {} {}",
        a.name,
        a.version,
        if conflicts { "Conflicts" } else { "Breaks" },
        b.name,
        b.version
    )))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            binary_package::PackageCandidate,
            control::ControlParagraphReader,
            repository::RepositoryIndex,
        },
        reqwest::Url,
    };

    const FAKE_SHA: &str = "9e09d1583e0950bf5413b4c0ec2ab60a14a3a217b8b820e8e945eb312093d3b4";

    /// Build an index from terse `name|version|extra-fields` descriptors.
    fn index(priority: usize, packages: &[&str]) -> Arc<RepositoryIndex> {
        let mut text = String::new();

        for spec in packages {
            let mut parts = spec.splitn(3, '|');
            let name = parts.next().unwrap();
            let version = parts.next().unwrap();
            let extra = parts.next().unwrap_or("");

            text.push_str(&format!(
                "Package: {name}\nVersion: {version}\nArchitecture: arm64\n\
                 Filename: pool/{name}_{version}.deb\nSize: 1\nSHA256: {FAKE_SHA}\n"
            ));
            for line in extra.split(';').filter(|l| !l.is_empty()) {
                text.push_str(line);
                text.push('\n');
            }
            text.push('\n');
        }

        let mut candidates = crate::binary_package::PackageList::default();
        for p in ControlParagraphReader::new(std::io::Cursor::new(text)) {
            candidates.push(PackageCandidate::from(p.unwrap()));
        }

        Arc::new(
            RepositoryIndex::from_candidates(
                format!("repo{}", priority),
                priority,
                Url::parse("http://example.com/debian/").unwrap(),
                candidates,
            )
            .unwrap(),
        )
    }

    fn refs(names: &[&str]) -> Vec<PackageRef> {
        names.iter().map(|n| PackageRef::parse(n).unwrap()).collect()
    }

    #[test]
    fn simple_resolution_prefers_highest_version() -> Result<()> {
        let repo = index(
            0,
            &["a|1.0|Depends: b (>= 1)", "b|1.0", "b|2.0"],
        );

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["a"]))?;

        assert_eq!(set.names(), vec!["b", "a"]);
        assert_eq!(set.iter().next().unwrap().version.to_string(), "2.0");

        Ok(())
    }

    #[test]
    fn virtual_dependency_repo_priority_tie_break() -> Result<()> {
        let repo_a = index(0, &["postfix|3.7|Provides: mail-transport-agent"]);
        let repo_b = index(
            1,
            &[
                "exim4|4.96|Provides: mail-transport-agent",
                "depends-on-mta|1.0|Depends: mail-transport-agent",
            ],
        );

        let set = Resolver::new(vec![repo_a, repo_b], "arm64")
            .resolve(&refs(&["depends-on-mta"]))?;

        assert!(set.names().contains(&"postfix"));
        assert!(!set.names().contains(&"exim4"));

        Ok(())
    }

    #[test]
    fn already_chosen_provider_is_preferred() -> Result<()> {
        let repo = index(
            0,
            &[
                "exim4|4.96|Provides: mail-transport-agent",
                "postfix|3.7|Provides: mail-transport-agent",
                "wants-postfix|1.0|Depends: postfix",
                "wants-mta|1.0|Depends: mail-transport-agent",
            ],
        );

        let set = Resolver::new(vec![repo], "arm64")
            .resolve(&refs(&["wants-postfix", "wants-mta"]))?;

        assert!(set.names().contains(&"postfix"));
        assert!(!set.names().contains(&"exim4"));

        Ok(())
    }

    #[test]
    fn alternatives_commit_to_first_satisfiable() -> Result<()> {
        let repo = index(0, &["a|1.0|Depends: missing | b", "b|1.0"]);

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["a"]))?;
        assert_eq!(set.names(), vec!["b", "a"]);

        Ok(())
    }

    #[test]
    fn conflicting_candidate_is_rejected() -> Result<()> {
        // c@2.0 conflicts with the already-chosen a; the resolver must fall
        // back to c@1.0.
        let repo = index(
            0,
            &[
                "a|1.0|Depends: c",
                "c|2.0|Conflicts: a",
                "c|1.0",
            ],
        );

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["a"]))?;

        assert_eq!(set.names(), vec!["c", "a"]);
        assert_eq!(set.iter().next().unwrap().version.to_string(), "1.0");

        Ok(())
    }

    #[test]
    fn replaces_overrides_conflicts() -> Result<()> {
        let repo = index(
            0,
            &[
                "a|1.0",
                "b|1.0|Conflicts: a;Replaces: a",
                "root|1.0|Depends: a, b",
            ],
        );

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["root"]))?;
        assert_eq!(set.len(), 3);

        Ok(())
    }

    #[test]
    fn unsatisfiable_reports_chain_and_rejections() {
        let repo = index(0, &["a|1.0|Depends: b (>= 2)", "b|1.0"]);

        let err = Resolver::new(vec![repo], "arm64")
            .resolve(&refs(&["a"]))
            .unwrap_err();

        match err {
            ImagingError::Unsatisfiable(unsat) => {
                assert_eq!(unsat.chain, vec!["<requested>", "a"]);
                assert_eq!(unsat.expression, "b (>= 2)");
                assert_eq!(unsat.rejections.len(), 1);
                assert_eq!(unsat.rejections[0].version, "1.0");
                assert!(unsat.rejections[0].reason.contains(">= 2"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn backtracking_across_alternatives() -> Result<()> {
        // b's dependency d does not exist; the resolver must revert the
        // b branch and take the c alternative.
        let repo = index(
            0,
            &["a|1.0|Depends: b | c", "b|1.0|Depends: d", "c|1.0"],
        );

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["a"]))?;
        assert_eq!(set.names(), vec!["c", "a"]);

        Ok(())
    }

    #[test]
    fn resolution_is_deterministic() -> Result<()> {
        let repos = || {
            vec![
                index(0, &["a|1.0|Depends: b, c", "b|1.0", "c|1.0|Depends: d"]),
                index(1, &["b|2.0", "d|1.0"]),
            ]
        };

        let first = Resolver::new(repos(), "arm64").resolve(&refs(&["a"]))?;
        let second = Resolver::new(repos(), "arm64").resolve(&refs(&["a"]))?;

        let render = |set: &InstallSet| {
            set.iter()
                .map(|c| format!("{} {} {}", c.name, c.version, c.repo_id))
                .collect::<Vec<_>>()
        };

        assert_eq!(render(&first), render(&second));
        // Priority order: b comes from repo0 even though repo1 has 2.0.
        assert!(render(&first).contains(&"b 1.0 repo0".to_string()));

        Ok(())
    }

    #[test]
    fn depends_cycle_broken_by_name() -> Result<()> {
        let repo = index(
            0,
            &["x|1.0|Depends: y", "y|1.0|Depends: x"],
        );

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["x"]))?;
        // Cycle broken at the lexicographically smallest member.
        assert_eq!(set.names(), vec!["x", "y"]);

        Ok(())
    }

    #[test]
    fn pre_depends_cycle_is_fatal() {
        let repo = index(
            0,
            &["x|1.0|Pre-Depends: y", "y|1.0|Pre-Depends: x"],
        );

        let err = Resolver::new(vec![repo], "arm64")
            .resolve(&refs(&["x"]))
            .unwrap_err();

        assert!(matches!(err, ImagingError::Unsatisfiable(_)));
    }

    #[test]
    fn essential_packages_are_seeded() -> Result<()> {
        let repo = index(
            0,
            &["base-files|12|Essential: yes", "a|1.0"],
        );

        let set = Resolver::new(vec![repo], "arm64")
            .include_essential(true)
            .resolve(&refs(&["a"]))?;

        assert!(set.names().contains(&"base-files"));

        Ok(())
    }

    #[test]
    fn version_pin_is_honored() -> Result<()> {
        let repo = index(0, &["b|1.0", "b|2.0"]);

        let set = Resolver::new(vec![repo], "arm64")
            .pin("b", PackageVersion::parse("1.0").unwrap())
            .resolve(&refs(&["b"]))?;

        assert_eq!(set.iter().next().unwrap().version.to_string(), "1.0");

        Ok(())
    }

    #[test]
    fn pre_depends_order_is_strict() -> Result<()> {
        let repo = index(
            0,
            &["z|1.0", "a|1.0|Pre-Depends: z"],
        );

        let set = Resolver::new(vec![repo], "arm64").resolve(&refs(&["a"]))?;
        assert_eq!(set.names(), vec!["z", "a"]);

        Ok(())
    }
}
