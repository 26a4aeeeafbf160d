use crate::platform::{expand_platform_aliases, normalize_targets};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::CoreError;
use gemnix_fetch::{
    ArtifactKey, FetchConfig, FetchedHash, HashFetcher, HashOrigin, KnownHashes, Prefetcher,
};
use gemnix_schema::{
    DirectDependency, GemSource, Gemset, Lockfile, PackageDescriptor, PlatformAlias,
    ResolvedSpec, SourceDescriptor, TargetDescriptor, BUNDLER, DEFAULT_GROUP,
};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Explicit inputs of one conversion. Nothing here is read from the
/// environment.
#[derive(Debug, Clone, Default)]
pub struct ConvertConfig {
    /// Directory path sources are recorded relative to.
    pub project_root: PathBuf,
    pub fetch: FetchConfig,
    /// Gemset written by an earlier run; its hashes are reused where the
    /// lockfile still pins the same artifact.
    pub previous: Option<Gemset>,
}

impl ConvertConfig {
    pub fn new(project_root: impl Into<PathBuf>, fetch: FetchConfig) -> Self {
        Self {
            project_root: project_root.into(),
            fetch,
            previous: None,
        }
    }

    pub fn with_previous_gemset(mut self, gemset: Gemset) -> Self {
        self.previous = Some(gemset);
        self
    }
}

/// Result of a successful conversion.
#[derive(Debug)]
pub struct Conversion {
    pub gemset: Gemset,
    pub reconciliation: Reconciliation,
    pub remote_fetches: usize,
    pub local_hits: usize,
    /// Specs whose hash came from the previous gemset.
    pub reused: usize,
}

/// Turns a lockfile plus direct-dependency visibility into a gemset.
pub struct Converter {
    config: ConvertConfig,
    fetcher: HashFetcher,
}

impl Converter {
    /// A converter that fetches over the network.
    pub fn new(config: ConvertConfig) -> Self {
        let fetcher = HashFetcher::with_network(config.fetch.clone());
        Self { config, fetcher }
    }

    pub fn with_prefetcher(config: ConvertConfig, prefetcher: Box<dyn Prefetcher>) -> Self {
        let fetcher = HashFetcher::new(config.fetch.clone(), prefetcher);
        Self { config, fetcher }
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &HashFetcher {
        &self.fetcher
    }

    /// Reconcile, normalize, fetch, and assemble.
    ///
    /// Packages appear in first-encounter order of the lockfile specs; a
    /// `bundler` entry without a resolved spec comes last. Reconciliation
    /// and platform errors are reported before any network access.
    pub fn convert(
        &self,
        lock: &Lockfile,
        direct: &[DirectDependency],
    ) -> Result<Conversion, CoreError> {
        info!("converting {} ({} specs)", lock.origin(), lock.specs.len());
        let reconciliation = Reconciler::for_lockfile(lock).reconcile(direct, &lock.specs)?;

        let targets = lock
            .specs
            .iter()
            .map(normalize_targets)
            .collect::<Result<Vec<_>, _>>()?;
        let aliases = reconciliation
            .iter()
            .map(|entry| Ok((entry.name.as_str(), expand_platform_aliases(entry)?)))
            .collect::<Result<HashMap<_, _>, CoreError>>()?;

        if let Some(previous) = &self.config.previous {
            self.fetcher.remember(recorded_hashes(lock, previous));
        }
        let specs: Vec<&ResolvedSpec> = lock.specs.iter().collect();
        let fetched = self.fetcher.fetch_all(&specs)?;

        let lockfile_dir = lock
            .path
            .as_deref()
            .and_then(Path::parent)
            .map_or_else(|| self.config.project_root.clone(), Path::to_path_buf);

        let mut gemset = Gemset::new();
        let mut local_hits = 0;
        for ((spec, hash), spec_targets) in lock.specs.iter().zip(&fetched).zip(targets) {
            if let FetchedHash::Registry {
                origin: HashOrigin::LocalCache,
                ..
            } = hash
            {
                local_hits += 1;
            }

            if let Some(descriptor) = gemset.get_mut(&spec.name) {
                merge_variant(descriptor, spec, hash, spec_targets);
            } else {
                let mut descriptor =
                    self.new_descriptor(spec, &reconciliation, &aliases, &lockfile_dir);
                merge_variant(&mut descriptor, spec, hash, spec_targets);
                gemset.insert(spec.name.clone(), descriptor);
            }
        }

        // Any reconciled bundler not backed by a lockfile spec is the host's
        // own bundler: listed so dependents resolve, never fetched.
        if let Some(bundler) = reconciliation.get(BUNDLER) {
            if !gemset.contains(BUNDLER) {
                debug!("adding {BUNDLER} entry without source");
                let version = bundler
                    .version
                    .clone()
                    .or_else(|| lock.bundler_version.clone())
                    .unwrap_or_default();
                let mut descriptor = PackageDescriptor::new(version);
                descriptor.groups = output_groups(bundler.groups.iter());
                descriptor.platforms = aliases.get(BUNDLER).cloned().unwrap_or_default();
                gemset.insert(BUNDLER, descriptor);
            }
        }

        let remote_fetches = self.fetcher.remote_fetch_count();
        let reused = self.fetcher.reused_count();
        info!(
            "assembled {} packages ({} vendored, {} reused, {} fetched)",
            gemset.len(),
            local_hits,
            reused,
            remote_fetches
        );
        Ok(Conversion {
            gemset,
            reconciliation,
            remote_fetches,
            local_hits,
            reused,
        })
    }

    fn new_descriptor(
        &self,
        spec: &ResolvedSpec,
        reconciliation: &Reconciliation,
        aliases: &HashMap<&str, Vec<PlatformAlias>>,
        lockfile_dir: &Path,
    ) -> PackageDescriptor {
        let mut descriptor = PackageDescriptor::new(spec.version.clone());
        if let Some(entry) = reconciliation.get(&spec.name) {
            descriptor.groups = output_groups(entry.groups.iter());
            descriptor.platforms = aliases.get(spec.name.as_str()).cloned().unwrap_or_default();
        } else {
            descriptor.groups = output_groups(std::iter::empty());
        }
        match &spec.source {
            GemSource::Registry { remotes } => {
                descriptor.remotes = if remotes.is_empty() {
                    vec![self.config.fetch.default_remote.clone()]
                } else {
                    remotes
                        .iter()
                        .map(|r| r.trim_end_matches('/').to_owned())
                        .collect()
                };
            }
            GemSource::Path { path } => {
                descriptor.source = Some(SourceDescriptor::Path {
                    path: relative_path(path, lockfile_dir, &self.config.project_root),
                });
            }
            GemSource::Git { .. } => {}
        }
        descriptor
    }
}

/// Hashes in `previous` that still describe an artifact pinned by `lock`.
///
/// The version must match. Native builds need a target for the same
/// platform; git checkouts need the same url, revision and submodule flag.
pub fn recorded_hashes(lock: &Lockfile, previous: &Gemset) -> KnownHashes {
    let mut known = KnownHashes::new();
    for spec in &lock.specs {
        let Some(descriptor) = previous.get(&spec.name) else {
            continue;
        };
        if descriptor.version != spec.version {
            continue;
        }
        match &spec.source {
            GemSource::Registry { .. } => {
                let hash = if spec.is_native() {
                    descriptor
                        .targets
                        .iter()
                        .find(|t| t.target == spec.platform)
                        .and_then(|t| t.hash.clone())
                } else {
                    descriptor.hash.clone()
                };
                if let Some(hash) = hash {
                    known.insert_artifact(ArtifactKey::of(spec), hash);
                }
            }
            GemSource::Git {
                url,
                revision,
                submodules,
                ..
            } => {
                let same_checkout = matches!(
                    &descriptor.source,
                    Some(SourceDescriptor::Git { url: u, rev, fetch_submodules })
                        if u == url && rev == revision && fetch_submodules == submodules
                );
                if let (true, Some(hash)) = (same_checkout, &descriptor.hash) {
                    known.insert_repo(url.clone(), revision.clone(), *submodules, hash.clone());
                }
            }
            GemSource::Path { .. } => {}
        }
    }
    debug!("{} hashes reusable from the previous gemset", known.len());
    known
}

/// Fold one lockfile variant of a package into its descriptor. Portable and
/// git variants provide the package hash; native variants add a target
/// carrying their own hash.
fn merge_variant(
    descriptor: &mut PackageDescriptor,
    spec: &ResolvedSpec,
    fetched: &FetchedHash,
    targets: Vec<TargetDescriptor>,
) {
    descriptor
        .dependencies
        .extend(spec.dependencies.iter().map(|d| d.name.clone()));

    if let FetchedHash::Git(repo) = fetched {
        descriptor.source = Some(SourceDescriptor::Git {
            url: repo.url.clone(),
            rev: repo.rev.clone(),
            fetch_submodules: repo.fetch_submodules,
        });
    }

    if targets.is_empty() {
        if let Some(hash) = fetched.hash() {
            descriptor.hash = Some(hash.clone());
        }
        return;
    }
    for mut target in targets {
        target.hash = fetched.hash().cloned();
        match descriptor
            .targets
            .binary_search_by(|t| t.target.cmp(&target.target))
        {
            Ok(i) => descriptor.targets[i] = target,
            Err(i) => descriptor.targets.insert(i, target),
        }
    }
}

/// Groups as written to the gemset. A package whose only visibility came
/// through the (non-inherited) `default` group is listed as `default`.
fn output_groups<'a>(groups: impl Iterator<Item = &'a String>) -> Vec<String> {
    let groups: Vec<String> = groups.cloned().collect();
    if groups.is_empty() {
        vec![DEFAULT_GROUP.to_owned()]
    } else {
        groups
    }
}

/// Express a lockfile path source relative to `project_root`. Paths outside
/// the root are kept as the lockfile wrote them.
fn relative_path(path: &str, lockfile_dir: &Path, project_root: &Path) -> String {
    let joined = lockfile_dir.join(path);
    match joined.strip_prefix(project_root) {
        Ok(rel) => {
            let rel: PathBuf = rel
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect();
            if rel.as_os_str().is_empty() {
                ".".to_owned()
            } else {
                rel.display().to_string()
            }
        }
        Err(_) => path.to_owned(),
    }
}
