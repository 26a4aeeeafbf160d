use crate::lockfile::Lockfile;
use crate::{ALL_PLATFORMS, DEFAULT_GROUP};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("failed to read declaration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse declaration: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("gem name must not be empty")]
    EmptyGemName,
    #[error("fetch.jobs must be at least 1")]
    ZeroJobs,
}

/// Visibility declarations for direct dependencies, read from `gemnix.toml`.
///
/// The lockfile already names every direct dependency; this file only adds
/// what a `Gemfile` expresses through `group` and `platforms` blocks.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    #[serde(default)]
    pub gems: BTreeMap<String, GemSection>,
    #[serde(default)]
    pub fetch: FetchSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GemSection {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
    /// Version constraint, for gems not listed in the lockfile's `DEPENDENCIES`.
    #[serde(default)]
    pub version: Option<String>,
}

/// Fetch settings. Every field can be overridden from the command line.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FetchSection {
    #[serde(default)]
    pub jobs: Option<usize>,
    #[serde(default)]
    pub cache_dirs: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub remote: Option<String>,
}

/// A package declared explicitly by the consuming project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDependency {
    pub name: String,
    pub declared_version_constraint: Option<String>,
    pub groups: BTreeSet<String>,
    pub platforms: BTreeSet<String>,
}

impl DirectDependency {
    /// A dependency in the `default` group with no platform restriction.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_version_constraint: None,
            groups: BTreeSet::from([DEFAULT_GROUP.to_owned()]),
            platforms: BTreeSet::from([ALL_PLATFORMS.to_owned()]),
        }
    }

    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.declared_version_constraint = Some(constraint.into());
        self
    }

    /// Replace the group set. An empty list keeps the `default` group.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups = normalize_set(groups);
        if !groups.is_empty() {
            self.groups = groups;
        }
        self
    }

    /// Replace the platform set. An empty list keeps the `all` platform.
    #[must_use]
    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let platforms = normalize_set(platforms);
        if !platforms.is_empty() {
            self.platforms = platforms;
        }
        self
    }
}

impl Declaration {
    pub fn validate(&self) -> Result<(), DeclarationError> {
        if self.gems.keys().any(|name| name.trim().is_empty()) {
            return Err(DeclarationError::EmptyGemName);
        }
        if self.fetch.jobs == Some(0) {
            return Err(DeclarationError::ZeroJobs);
        }
        Ok(())
    }
}

pub fn parse_declaration_str(input: &str) -> Result<Declaration, DeclarationError> {
    let decl: Declaration = toml::from_str(input)?;
    decl.validate()?;
    Ok(decl)
}

pub fn parse_declaration_file(path: impl AsRef<Path>) -> Result<Declaration, DeclarationError> {
    let content = fs::read_to_string(path)?;
    parse_declaration_str(&content)
}

/// Build the direct-dependency list: every `DEPENDENCIES` entry of the
/// lockfile in lockfile order, then gems only named in the declaration.
pub fn direct_dependencies(lock: &Lockfile, decl: &Declaration) -> Vec<DirectDependency> {
    let mut out: Vec<DirectDependency> = lock
        .dependencies
        .iter()
        .map(|locked| {
            let mut dep = DirectDependency::new(locked.name.clone());
            dep.declared_version_constraint.clone_from(&locked.constraint);
            apply_section(dep, decl.gems.get(&locked.name))
        })
        .collect();

    for (name, section) in &decl.gems {
        if out.iter().any(|d| d.name == *name) {
            continue;
        }
        out.push(apply_section(
            DirectDependency::new(name.trim()),
            Some(section),
        ));
    }
    out
}

fn apply_section(dep: DirectDependency, section: Option<&GemSection>) -> DirectDependency {
    let Some(section) = section else {
        return dep;
    };
    let mut dep = dep
        .with_groups(section.groups.iter().cloned())
        .with_platforms(section.platforms.iter().cloned());
    if dep.declared_version_constraint.is_none() {
        dep.declared_version_constraint.clone_from(&section.version);
    }
    dep
}

fn normalize_set<I, S>(values: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values
        .into_iter()
        .map(|v| v.into().trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockfile::LockedDependency;

    fn lock_with(deps: &[(&str, Option<&str>)]) -> Lockfile {
        Lockfile {
            dependencies: deps
                .iter()
                .map(|(n, c)| LockedDependency {
                    name: (*n).to_owned(),
                    constraint: c.map(str::to_owned),
                    pinned: false,
                })
                .collect(),
            ..Lockfile::default()
        }
    }

    #[test]
    fn parses_gem_sections() {
        let decl = parse_declaration_str(
            r#"
[gems.rspec]
groups = ["development", "test"]

[gems.io-console]
platforms = ["windows"]

[fetch]
jobs = 8
cache_dirs = ["vendor/cache"]
"#,
        )
        .unwrap();
        assert_eq!(decl.gems["rspec"].groups, vec!["development", "test"]);
        assert_eq!(decl.gems["io-console"].platforms, vec!["windows"]);
        assert_eq!(decl.fetch.jobs, Some(8));
        assert_eq!(decl.fetch.cache_dirs, vec!["vendor/cache"]);
    }

    #[test]
    fn empty_declaration_is_valid() {
        let decl = parse_declaration_str("").unwrap();
        assert!(decl.gems.is_empty());
        assert_eq!(decl.fetch, FetchSection::default());
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(parse_declaration_str("[gems.rake]\ngroup = [\"test\"]\n").is_err());
        assert!(parse_declaration_str("[bogus]\n").is_err());
    }

    #[test]
    fn rejects_zero_jobs() {
        let err = parse_declaration_str("[fetch]\njobs = 0\n").unwrap_err();
        assert!(matches!(err, DeclarationError::ZeroJobs));
    }

    #[test]
    fn defaults_are_default_group_and_all_platforms() {
        let dep = DirectDependency::new("rake");
        assert_eq!(dep.groups, BTreeSet::from(["default".to_owned()]));
        assert_eq!(dep.platforms, BTreeSet::from(["all".to_owned()]));
    }

    #[test]
    fn empty_group_list_keeps_default() {
        let dep = DirectDependency::new("rake").with_groups(Vec::<String>::new());
        assert!(dep.groups.contains("default"));
    }

    #[test]
    fn direct_dependencies_merge_lockfile_and_declaration() {
        let lock = lock_with(&[("rails", Some("~> 7.0")), ("rspec", None)]);
        let decl = parse_declaration_str(
            r#"
[gems.rspec]
groups = ["test"]

[gems.debug]
groups = ["development"]
version = ">= 1.0"
"#,
        )
        .unwrap();

        let deps = direct_dependencies(&lock, &decl);
        let names: Vec<_> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["rails", "rspec", "debug"]);

        assert_eq!(deps[0].declared_version_constraint.as_deref(), Some("~> 7.0"));
        assert!(deps[0].groups.contains("default"));
        assert_eq!(deps[1].groups, BTreeSet::from(["test".to_owned()]));
        assert_eq!(deps[2].declared_version_constraint.as_deref(), Some(">= 1.0"));
    }

    #[test]
    fn declaration_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gemnix.toml");
        fs::write(&path, "[gems.pg]\nplatforms = [\"mri\"]\n").unwrap();
        let decl = parse_declaration_file(&path).unwrap();
        assert_eq!(decl.gems["pg"].platforms, vec!["mri"]);
    }
}
