use crate::types::{ContentHash, Revision};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};

/// Non-registry origin of a package. Registry gems carry no source descriptor;
/// they are fetched by name, version, and hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Path {
        path: String,
    },
    Git {
        url: String,
        rev: Revision,
        #[serde(rename = "fetchSubmodules")]
        fetch_submodules: bool,
    },
}

/// A precompiled build of a gem for one (CPU, OS) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub target: String,
    #[serde(rename = "targetCPU")]
    pub target_cpu: String,
    #[serde(rename = "targetOS")]
    pub target_os: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Hash of this platform's own archive.
    #[serde(default, rename = "sha256", skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

/// One interpreter a platform family resolves to, e.g. `{ engine = "mingw"; }`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlatformAlias {
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PlatformAlias {
    pub fn engine(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            version: None,
        }
    }
}

/// The per-package record of the output gemset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceDescriptor>,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<PlatformAlias>,
    #[serde(default)]
    pub targets: Vec<TargetDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<String>,
    #[serde(default, rename = "sha256", skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

impl PackageDescriptor {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            source: None,
            dependencies: BTreeSet::new(),
            groups: Vec::new(),
            platforms: Vec::new(),
            targets: Vec::new(),
            remotes: Vec::new(),
            hash: None,
        }
    }
}

/// Ordered mapping from package name to descriptor.
///
/// Order is insertion order; serialization emits a map in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gemset {
    entries: Vec<(String, PackageDescriptor)>,
    index: HashMap<String, usize>,
}

impl Gemset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A replaced entry keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: PackageDescriptor) {
        let name = name.into();
        if let Some(&i) = self.index.get(&name) {
            self.entries[i].1 = descriptor;
        } else {
            self.index.insert(name.clone(), self.entries.len());
            self.entries.push((name, descriptor));
        }
    }

    pub fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PackageDescriptor> {
        self.index.get(name).map(|&i| &mut self.entries[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PackageDescriptor)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Gemset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, descriptor) in &self.entries {
            map.serialize_entry(name, descriptor)?;
        }
        map.end()
    }
}
