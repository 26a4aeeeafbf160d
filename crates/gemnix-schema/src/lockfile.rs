use crate::types::Revision;
use crate::RUBY_PLATFORM;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("failed to read lockfile: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed lockfile at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Where a resolved gem comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GemSource {
    /// A gem server such as rubygems.org. Several mirrors may be listed.
    Registry { remotes: Vec<String> },
    /// A git checkout pinned to a revision.
    Git {
        url: String,
        revision: Revision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default)]
        submodules: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        glob: Option<String>,
    },
    /// A directory in (or next to) the project.
    Path { path: String },
}

impl GemSource {
    pub fn kind(&self) -> &'static str {
        match self {
            GemSource::Registry { .. } => "registry",
            GemSource::Git { .. } => "git",
            GemSource::Path { .. } => "path",
        }
    }
}

/// A `(name, constraint)` dependency edge of a resolved spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

impl DependencyEdge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }
}

/// One fully pinned entry of the lockfile's resolved graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSpec {
    pub name: String,
    pub version: String,
    /// `ruby` for portable gems, otherwise a composite token like `x86_64-linux`.
    pub platform: String,
    pub source: GemSource,
    pub dependencies: Vec<DependencyEdge>,
}

impl ResolvedSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>, source: GemSource) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            platform: RUBY_PLATFORM.to_owned(),
            source,
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(DependencyEdge::new(name));
        self
    }

    /// Whether this spec is a precompiled, platform-specific build.
    pub fn is_native(&self) -> bool {
        self.platform != RUBY_PLATFORM
    }

    /// `name-version` or `name-version-platform`, the basename of the `.gem` archive.
    pub fn full_name(&self) -> String {
        if self.is_native() {
            format!("{}-{}-{}", self.name, self.version, self.platform)
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }
}

/// An entry of the `DEPENDENCIES` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedDependency {
    pub name: String,
    pub constraint: Option<String>,
    /// `true` when the entry carries a `!`, i.e. it is pinned to a non-registry source.
    pub pinned: bool,
}

/// A parsed `Gemfile.lock`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    /// Set when the lockfile was read from disk; used in error reports.
    pub path: Option<PathBuf>,
    pub specs: Vec<ResolvedSpec>,
    pub platforms: Vec<String>,
    pub dependencies: Vec<LockedDependency>,
    pub ruby_version: Option<String>,
    pub bundler_version: Option<String>,
}

impl Lockfile {
    pub fn parse_str(input: &str) -> Result<Self, LockfileError> {
        Parser::default().parse(input)
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockfileError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut lock = Self::parse_str(&content)?;
        lock.path = Some(path.to_path_buf());
        Ok(lock)
    }

    /// Human-readable origin for error messages.
    pub fn origin(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "<in-memory lockfile>".to_owned(), |p| p.display().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Git,
    Path,
    Gem,
}

#[derive(Debug)]
struct PendingSpec {
    name: String,
    version: String,
    platform: String,
    dependencies: Vec<DependencyEdge>,
}

#[derive(Debug)]
struct SourceBlock {
    kind: SourceKind,
    header_line: usize,
    remotes: Vec<String>,
    revision: Option<String>,
    branch: Option<String>,
    submodules: bool,
    glob: Option<String>,
    specs: Vec<PendingSpec>,
}

impl SourceBlock {
    fn new(kind: SourceKind, header_line: usize) -> Self {
        Self {
            kind,
            header_line,
            remotes: Vec::new(),
            revision: None,
            branch: None,
            submodules: false,
            glob: None,
            specs: Vec::new(),
        }
    }

    fn into_specs(self) -> Result<Vec<ResolvedSpec>, LockfileError> {
        let source = match self.kind {
            SourceKind::Gem => GemSource::Registry {
                remotes: self.remotes,
            },
            SourceKind::Git => {
                let url = self.remotes.into_iter().next().ok_or_else(|| {
                    malformed(self.header_line, "GIT section has no remote")
                })?;
                let revision = self.revision.ok_or_else(|| {
                    malformed(self.header_line, "GIT section has no revision")
                })?;
                GemSource::Git {
                    url,
                    revision: Revision::new(revision),
                    branch: self.branch,
                    submodules: self.submodules,
                    glob: self.glob,
                }
            }
            SourceKind::Path => {
                let path = self.remotes.into_iter().next().ok_or_else(|| {
                    malformed(self.header_line, "PATH section has no remote")
                })?;
                GemSource::Path { path }
            }
        };

        Ok(self
            .specs
            .into_iter()
            .map(|p| ResolvedSpec {
                name: p.name,
                version: p.version,
                platform: p.platform,
                source: source.clone(),
                dependencies: p.dependencies,
            })
            .collect())
    }
}

#[derive(Debug)]
enum Section {
    Preamble,
    Source(SourceBlock),
    Platforms,
    Dependencies,
    RubyVersion,
    BundledWith,
    Ignored,
}

#[derive(Debug, Default)]
struct Parser {
    lock: Lockfile,
}

impl Parser {
    fn parse(mut self, input: &str) -> Result<Lockfile, LockfileError> {
        let mut section = Section::Preamble;

        for (idx, raw) in input.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let indent = line.len() - line.trim_start_matches(' ').len();
            let content = line.trim_start();

            if indent == 0 {
                self.finish(std::mem::replace(&mut section, Section::Preamble))?;
                section = match content {
                    "GIT" => Section::Source(SourceBlock::new(SourceKind::Git, line_no)),
                    "PATH" => Section::Source(SourceBlock::new(SourceKind::Path, line_no)),
                    "GEM" => Section::Source(SourceBlock::new(SourceKind::Gem, line_no)),
                    "PLATFORMS" => Section::Platforms,
                    "DEPENDENCIES" => Section::Dependencies,
                    "RUBY VERSION" => Section::RubyVersion,
                    "BUNDLED WITH" => Section::BundledWith,
                    _ => Section::Ignored,
                };
                continue;
            }

            match &mut section {
                Section::Preamble => {
                    return Err(malformed(line_no, "indented line outside of any section"));
                }
                Section::Source(block) => parse_source_line(block, indent, content, line_no)?,
                Section::Platforms => self.lock.platforms.push(content.to_owned()),
                Section::Dependencies => {
                    let dep = parse_locked_dependency(content, line_no)?;
                    self.lock.dependencies.push(dep);
                }
                Section::RubyVersion => self.lock.ruby_version = Some(content.to_owned()),
                Section::BundledWith => self.lock.bundler_version = Some(content.to_owned()),
                Section::Ignored => {}
            }
        }
        self.finish(section)?;
        Ok(self.lock)
    }

    fn finish(&mut self, section: Section) -> Result<(), LockfileError> {
        if let Section::Source(block) = section {
            self.lock.specs.extend(block.into_specs()?);
        }
        Ok(())
    }
}

fn parse_source_line(
    block: &mut SourceBlock,
    indent: usize,
    content: &str,
    line_no: usize,
) -> Result<(), LockfileError> {
    match indent {
        2 => {
            let Some((key, value)) = content.split_once(':') else {
                return Err(malformed(line_no, format!("expected 'key: value', got '{content}'")));
            };
            let value = value.trim();
            match key {
                "remote" => block.remotes.push(value.to_owned()),
                "revision" => block.revision = Some(value.to_owned()),
                "branch" => block.branch = Some(value.to_owned()),
                "submodules" => block.submodules = value == "true",
                "glob" => block.glob = Some(value.to_owned()),
                _ => {}
            }
        }
        4 => {
            let (name, version) = split_name_and_parens(content);
            let Some(version) = version else {
                return Err(malformed(line_no, format!("spec '{name}' has no version")));
            };
            let (version, platform) = match version.split_once('-') {
                Some((v, p)) => (v.to_owned(), p.to_owned()),
                None => (version.to_owned(), RUBY_PLATFORM.to_owned()),
            };
            block.specs.push(PendingSpec {
                name: name.to_owned(),
                version,
                platform,
                dependencies: Vec::new(),
            });
        }
        6 => {
            let Some(spec) = block.specs.last_mut() else {
                return Err(malformed(line_no, "dependency listed before any spec"));
            };
            let (name, constraint) = split_name_and_parens(content);
            spec.dependencies.push(DependencyEdge {
                name: name.to_owned(),
                constraint: constraint.map(str::to_owned),
            });
        }
        _ => {
            return Err(malformed(line_no, format!("unexpected indentation {indent}")));
        }
    }
    Ok(())
}

fn parse_locked_dependency(content: &str, line_no: usize) -> Result<LockedDependency, LockfileError> {
    let (name, constraint) = split_name_and_parens(content);
    let (name, pinned) = match name.strip_suffix('!') {
        Some(n) => (n, true),
        None => (name, false),
    };
    if name.is_empty() {
        return Err(malformed(line_no, "empty dependency name"));
    }
    Ok(LockedDependency {
        name: name.to_owned(),
        constraint: constraint.map(str::to_owned),
        pinned,
    })
}

/// Split `name (inner)` into `("name", Some("inner"))`; `name` alone gives `None`.
fn split_name_and_parens(content: &str) -> (&str, Option<&str>) {
    match content.split_once(" (") {
        Some((name, rest)) => (name, Some(rest.trim_end_matches(')'))),
        None => (content, None),
    }
}

fn malformed(line: usize, reason: impl Into<String>) -> LockfileError {
    LockfileError::Malformed {
        line,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"GIT
  remote: https://github.com/twalpole/apparition.git
  revision: ca86be4d54af835d531dbcd2b86e7b2c77f85f34
  specs:
    apparition (0.6.0)
      capybara (~> 3.13, < 4)
      websocket-driver (>= 0.6.5)

PATH
  remote: lib/phony_gem
  specs:
    phony_gem (0.1.0)

GEM
  remote: https://rubygems.org/
  specs:
    capybara (3.39.2)
      nokogiri (~> 1.8)
    nokogiri (1.15.4-x86_64-linux)
      racc (~> 1.4)
    racc (1.7.1)
    sqlite3 (1.6.6-arm64-darwin)
    sqlite3 (1.6.6-x86_64-linux)
    websocket-driver (0.7.6)
      websocket-extensions (>= 0.1.0)
    websocket-extensions (0.1.5)

PLATFORMS
  arm64-darwin
  x86_64-linux

DEPENDENCIES
  apparition!
  capybara (>= 3.26)
  phony_gem!
  sqlite3 (~> 1.4)

RUBY VERSION
   ruby 3.2.2p53

BUNDLED WITH
   2.4.19
";

    #[test]
    fn parses_all_sources() {
        let lock = Lockfile::parse_str(SAMPLE).unwrap();
        assert_eq!(lock.specs.len(), 9);

        let apparition = &lock.specs[0];
        assert_eq!(apparition.name, "apparition");
        assert_eq!(apparition.version, "0.6.0");
        match &apparition.source {
            GemSource::Git {
                url,
                revision,
                submodules,
                ..
            } => {
                assert_eq!(url, "https://github.com/twalpole/apparition.git");
                assert_eq!(revision, "ca86be4d54af835d531dbcd2b86e7b2c77f85f34");
                assert!(!submodules);
            }
            other => panic!("expected git source, got {other:?}"),
        }

        assert_eq!(
            lock.specs[1].source,
            GemSource::Path {
                path: "lib/phony_gem".to_owned()
            }
        );
        assert_eq!(
            lock.specs[2].source,
            GemSource::Registry {
                remotes: vec!["https://rubygems.org/".to_owned()]
            }
        );
    }

    #[test]
    fn parses_dependency_constraints() {
        let lock = Lockfile::parse_str(SAMPLE).unwrap();
        let deps = &lock.specs[0].dependencies;
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].name, "capybara");
        assert_eq!(deps[0].constraint.as_deref(), Some("~> 3.13, < 4"));
        assert!(lock.specs[5].dependencies.is_empty());
    }

    #[test]
    fn splits_native_platform_from_version() {
        let lock = Lockfile::parse_str(SAMPLE).unwrap();
        let nokogiri = lock.specs.iter().find(|s| s.name == "nokogiri").unwrap();
        assert_eq!(nokogiri.version, "1.15.4");
        assert_eq!(nokogiri.platform, "x86_64-linux");
        assert!(nokogiri.is_native());
        assert_eq!(nokogiri.full_name(), "nokogiri-1.15.4-x86_64-linux");

        let racc = lock.specs.iter().find(|s| s.name == "racc").unwrap();
        assert!(!racc.is_native());
        assert_eq!(racc.full_name(), "racc-1.7.1");
    }

    #[test]
    fn keeps_duplicate_names_for_platform_variants() {
        let lock = Lockfile::parse_str(SAMPLE).unwrap();
        let sqlite: Vec<_> = lock.specs.iter().filter(|s| s.name == "sqlite3").collect();
        assert_eq!(sqlite.len(), 2);
        assert_eq!(sqlite[0].platform, "arm64-darwin");
        assert_eq!(sqlite[1].platform, "x86_64-linux");
    }

    #[test]
    fn parses_trailer_sections() {
        let lock = Lockfile::parse_str(SAMPLE).unwrap();
        assert_eq!(lock.platforms, vec!["arm64-darwin", "x86_64-linux"]);
        assert_eq!(lock.ruby_version.as_deref(), Some("ruby 3.2.2p53"));
        assert_eq!(lock.bundler_version.as_deref(), Some("2.4.19"));
        assert_eq!(lock.dependencies.len(), 4);
        assert!(lock.dependencies[0].pinned);
        assert_eq!(lock.dependencies[0].name, "apparition");
        assert_eq!(lock.dependencies[1].constraint.as_deref(), Some(">= 3.26"));
        assert!(!lock.dependencies[1].pinned);
    }

    #[test]
    fn git_submodules_flag() {
        let input = r"GIT
  remote: https://example.com/repo.git
  revision: 0123456789abcdef
  submodules: true
  specs:
    thing (1.0.0)
";
        let lock = Lockfile::parse_str(input).unwrap();
        match &lock.specs[0].source {
            GemSource::Git { submodules, .. } => assert!(submodules),
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn git_without_revision_is_rejected() {
        let input = r"GIT
  remote: https://example.com/repo.git
  specs:
    thing (1.0.0)
";
        let err = Lockfile::parse_str(input).unwrap_err();
        assert!(err.to_string().contains("no revision"));
    }

    #[test]
    fn spec_without_version_is_rejected() {
        let input = "GEM\n  remote: https://rubygems.org/\n  specs:\n    broken\n";
        let err = Lockfile::parse_str(input).unwrap_err();
        match err {
            LockfileError::Malformed { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn dependency_before_spec_is_rejected() {
        let input = "GEM\n  remote: https://rubygems.org/\n  specs:\n      orphan (>= 1)\n";
        assert!(Lockfile::parse_str(input).is_err());
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let input = "PLUGIN SOURCE\n  remote: x\n\nGEM\n  remote: https://rubygems.org/\n  specs:\n    rake (13.0.6)\n";
        let lock = Lockfile::parse_str(input).unwrap();
        assert_eq!(lock.specs.len(), 1);
    }

    #[test]
    fn read_from_file_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Gemfile.lock");
        std::fs::write(&path, SAMPLE).unwrap();
        let lock = Lockfile::read_from_file(&path).unwrap();
        assert_eq!(lock.path.as_deref(), Some(path.as_path()));
        assert!(lock.origin().ends_with("Gemfile.lock"));
    }
}
