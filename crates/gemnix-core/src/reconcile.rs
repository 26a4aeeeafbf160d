//! Group and platform reconciliation over the resolved dependency graph.
//!
//! Every resolved gem is visible in the union of the groups and platforms of
//! the gems that (transitively) depend on it. The lockfile graph may contain
//! cycles, so the union is computed as a monotone fixed point: repeated full
//! passes over the spec list until one pass changes nothing.

use gemnix_schema::{DirectDependency, Lockfile, ResolvedSpec, BUNDLER, DEFAULT_GROUP};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("gem dependency '{dep_name}' not specified in {lockfile}")]
    UnresolvedDependency { dep_name: String, lockfile: String },
}

/// Visibility of one package after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledEntry {
    pub name: String,
    /// Resolved version; `None` for a direct dependency the lockfile never resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub groups: BTreeSet<String>,
    pub platforms: BTreeSet<String>,
    /// Created on demand for the bootstrapping tool rather than read from input.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub synthesized: bool,
}

impl ReconciledEntry {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: None,
            groups: BTreeSet::new(),
            platforms: BTreeSet::new(),
            synthesized: false,
        }
    }
}

/// The reconciled entries, in seeding order, plus bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    entries: Vec<ReconciledEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    passes: usize,
}

impl Reconciliation {
    pub fn get(&self, name: &str) -> Option<&ReconciledEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReconciledEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of passes run, including the final pass that changed nothing.
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn into_entries(self) -> Vec<ReconciledEntry> {
        self.entries
    }

    fn push(&mut self, entry: ReconciledEntry) -> usize {
        let i = self.entries.len();
        self.index.insert(entry.name.clone(), i);
        self.entries.push(entry);
        i
    }
}

/// Computes the group/platform fixed point for one lockfile.
#[derive(Debug, Clone)]
pub struct Reconciler {
    lockfile: String,
    bundler_version: Option<String>,
}

impl Reconciler {
    /// `lockfile` names the input in error messages; `bundler_version` is the
    /// `BUNDLED WITH` version given to a synthesized `bundler` entry.
    pub fn new(lockfile: impl Into<String>, bundler_version: Option<String>) -> Self {
        Self {
            lockfile: lockfile.into(),
            bundler_version,
        }
    }

    pub fn for_lockfile(lock: &Lockfile) -> Self {
        Self::new(lock.origin(), lock.bundler_version.clone())
    }

    /// Initial state: one entry per direct dependency, then an empty entry for
    /// every resolved name not already present.
    pub fn seed(&self, direct: &[DirectDependency], specs: &[ResolvedSpec]) -> Reconciliation {
        let mut state = Reconciliation::default();
        for dep in direct {
            if state.contains(&dep.name) {
                continue;
            }
            state.push(ReconciledEntry {
                name: dep.name.clone(),
                version: None,
                groups: dep.groups.clone(),
                platforms: dep.platforms.clone(),
                synthesized: false,
            });
        }
        for spec in specs {
            match state.index.get(&spec.name) {
                Some(&i) => {
                    let entry = &mut state.entries[i];
                    if entry.version.is_none() {
                        entry.version = Some(spec.version.clone());
                    }
                }
                None => {
                    let mut entry = ReconciledEntry::empty(&spec.name);
                    entry.version = Some(spec.version.clone());
                    state.push(entry);
                }
            }
        }
        state
    }

    /// Run one full pass over `specs`, propagating each owner's groups and
    /// platforms to its dependencies. Returns whether anything changed.
    pub fn pass(
        &self,
        state: &mut Reconciliation,
        specs: &[ResolvedSpec],
    ) -> Result<bool, ReconcileError> {
        let mut changed = false;
        for spec in specs {
            let Some(&owner) = state.index.get(&spec.name) else {
                continue;
            };
            for edge in &spec.dependencies {
                let target = match state.index.get(&edge.name) {
                    Some(&i) => i,
                    None if edge.name == BUNDLER => {
                        debug!("synthesizing {BUNDLER} entry for {}", spec.name);
                        changed = true;
                        state.push(ReconciledEntry {
                            version: self.bundler_version.clone(),
                            synthesized: true,
                            ..ReconciledEntry::empty(BUNDLER)
                        })
                    }
                    None => {
                        return Err(ReconcileError::UnresolvedDependency {
                            dep_name: edge.name.clone(),
                            lockfile: self.lockfile.clone(),
                        });
                    }
                };

                let (new_groups, new_platforms) = {
                    let owner = &state.entries[owner];
                    let target = &state.entries[target];
                    let groups: BTreeSet<String> = owner
                        .groups
                        .iter()
                        .filter(|g| g.as_str() != DEFAULT_GROUP)
                        .chain(&target.groups)
                        .cloned()
                        .collect();
                    let platforms: BTreeSet<String> =
                        owner.platforms.union(&target.platforms).cloned().collect();
                    (groups, platforms)
                };

                let target = &mut state.entries[target];
                if new_groups != target.groups || new_platforms != target.platforms {
                    target.groups = new_groups;
                    target.platforms = new_platforms;
                    changed = true;
                }
            }
        }
        state.passes += 1;
        Ok(changed)
    }

    /// Seed and iterate to the fixed point.
    pub fn reconcile(
        &self,
        direct: &[DirectDependency],
        specs: &[ResolvedSpec],
    ) -> Result<Reconciliation, ReconcileError> {
        let mut state = self.seed(direct, specs);
        while self.pass(&mut state, specs)? {}
        debug!(
            "reconciled {} entries in {} passes",
            state.len(),
            state.passes
        );
        Ok(state)
    }
}
