use crate::local::LocalCache;
use crate::network::NetworkPrefetcher;
use crate::{FetchConfig, FetchError, Prefetcher, RepoPrefetch};
use gemnix_schema::{ContentHash, GemSource, ResolvedSpec, Revision};
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Where a registry hash came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashOrigin {
    LocalCache,
    Remote,
    /// Recorded by an earlier run in the existing gemset.
    PreviousGemset,
}

/// Integrity data obtained for one resolved spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedHash {
    Registry {
        hash: ContentHash,
        origin: HashOrigin,
    },
    Git(RepoPrefetch),
    /// Path sources are trusted as-is; nothing is hashed.
    Path,
}

impl FetchedHash {
    pub fn hash(&self) -> Option<&ContentHash> {
        match self {
            FetchedHash::Registry { hash, .. } => Some(hash),
            FetchedHash::Git(repo) => Some(&repo.hash),
            FetchedHash::Path => None,
        }
    }
}

/// Identity of a registry artifact. Two specs with the same key share one download.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub name: String,
    pub version: String,
    pub platform: String,
}

impl ArtifactKey {
    pub fn of(spec: &ResolvedSpec) -> Self {
        Self {
            name: spec.name.clone(),
            version: spec.version.clone(),
            platform: spec.platform.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RepoKey {
    url: String,
    rev: Revision,
    fetch_submodules: bool,
}

/// Hashes recorded by an earlier conversion, keyed the way fetches are.
/// A spec whose key is present is answered without any I/O.
#[derive(Debug, Clone, Default)]
pub struct KnownHashes {
    gems: HashMap<ArtifactKey, ContentHash>,
    repos: HashMap<RepoKey, ContentHash>,
}

impl KnownHashes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_artifact(&mut self, key: ArtifactKey, hash: ContentHash) {
        self.gems.insert(key, hash);
    }

    pub fn insert_repo(
        &mut self,
        url: impl Into<String>,
        rev: Revision,
        fetch_submodules: bool,
        hash: ContentHash,
    ) {
        let key = RepoKey {
            url: url.into(),
            rev,
            fetch_submodules,
        };
        self.repos.insert(key, hash);
    }

    pub fn extend(&mut self, other: KnownHashes) {
        self.gems.extend(other.gems);
        self.repos.extend(other.repos);
    }

    pub fn len(&self) -> usize {
        self.gems.len() + self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gems.is_empty() && self.repos.is_empty()
    }
}

/// Per-run memo table. Each key owns a slot whose lock is held for the whole
/// fetch, so concurrent callers of the same key wait instead of fetching twice.
struct Memo<K, V> {
    slots: Mutex<HashMap<K, Arc<Mutex<Option<V>>>>>,
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_try_insert(
        &self,
        key: K,
        fetch: impl FnOnce() -> Result<V, FetchError>,
    ) -> Result<V, FetchError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key).or_default())
        };
        let mut value = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(v) = value.as_ref() {
            return Ok(v.clone());
        }
        let fetched = fetch()?;
        *value = Some(fetched.clone());
        Ok(fetched)
    }
}

/// Obtains content hashes for resolved specs, local cache first.
///
/// One `HashFetcher` corresponds to one conversion run: its memo tables
/// guarantee at most one remote fetch per artifact for the lifetime of the value.
pub struct HashFetcher {
    prefetcher: Box<dyn Prefetcher>,
    cache: LocalCache,
    config: FetchConfig,
    gems: Memo<ArtifactKey, ContentHash>,
    repos: Memo<RepoKey, RepoPrefetch>,
    known: Mutex<KnownHashes>,
    remote_fetches: AtomicUsize,
    reused: AtomicUsize,
}

impl HashFetcher {
    pub fn new(config: FetchConfig, prefetcher: Box<dyn Prefetcher>) -> Self {
        Self {
            prefetcher,
            cache: LocalCache::new(config.cache_dirs.clone()),
            config,
            gems: Memo::new(),
            repos: Memo::new(),
            known: Mutex::new(KnownHashes::new()),
            remote_fetches: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// A fetcher backed by HTTP and `nix-prefetch-git`.
    pub fn with_network(config: FetchConfig) -> Self {
        let prefetcher = NetworkPrefetcher::new(&config);
        Self::new(config, Box::new(prefetcher))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Number of remote fetch operations performed so far.
    pub fn remote_fetch_count(&self) -> usize {
        self.remote_fetches.load(Ordering::SeqCst)
    }

    /// Number of specs answered from previously recorded hashes.
    pub fn reused_count(&self) -> usize {
        self.reused.load(Ordering::SeqCst)
    }

    /// Add previously recorded hashes. Later calls win on conflicting keys.
    pub fn remember(&self, known: KnownHashes) {
        if known.is_empty() {
            return;
        }
        debug!("remembering {} recorded hashes", known.len());
        self.known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(known);
    }

    fn known_artifact(&self, key: &ArtifactKey) -> Option<ContentHash> {
        let known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        known.gems.get(key).cloned()
    }

    fn known_repo(&self, key: &RepoKey) -> Option<ContentHash> {
        let known = self.known.lock().unwrap_or_else(PoisonError::into_inner);
        known.repos.get(key).cloned()
    }

    /// Obtain integrity data for one spec. Every failure is reported as
    /// [`FetchError::FetchFailed`] naming the spec.
    pub fn fetch_hash(&self, spec: &ResolvedSpec) -> Result<FetchedHash, FetchError> {
        let result = match &spec.source {
            GemSource::Registry { remotes } => self.fetch_registry(spec, remotes),
            GemSource::Git {
                url,
                revision,
                submodules,
                ..
            } => self
                .fetch_repo(url, revision, *submodules)
                .map(FetchedHash::Git),
            GemSource::Path { .. } => Ok(FetchedHash::Path),
        };
        result.map_err(|cause| FetchError::FetchFailed {
            name: spec.name.clone(),
            version: spec.version.clone(),
            source_kind: spec.source.kind().to_owned(),
            cause: Box::new(cause),
        })
    }

    /// Hash the vendored archive for `spec`, if present. Performs no network
    /// access and never writes; unreadable archives count as a miss.
    pub fn fetch_local_hash(&self, spec: &ResolvedSpec) -> Option<ContentHash> {
        match self.cache.hash(spec) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("ignoring unreadable vendored archive for {}: {e}", spec.full_name());
                None
            }
        }
    }

    /// Download and hash the registry artifact for `spec`, trying each remote
    /// in order. Memoized per (name, version, platform).
    pub fn fetch_remote_hash(
        &self,
        spec: &ResolvedSpec,
        remotes: &[String],
    ) -> Result<ContentHash, FetchError> {
        self.gems.get_or_try_insert(ArtifactKey::of(spec), || {
            let urls = artifact_urls(spec, remotes, &self.config.default_remote);
            if self.config.offline {
                return Err(FetchError::Offline(urls.join(", ")));
            }
            self.remote_fetches.fetch_add(1, Ordering::SeqCst);

            let mut last_err = None;
            for url in &urls {
                info!("fetching {url}");
                match self.prefetcher.fetch_and_hash_url(url) {
                    Ok(hash) => return Ok(hash),
                    Err(e) => {
                        debug!("{url}: {e}");
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| FetchError::NotFound(spec.full_name())))
        })
    }

    fn fetch_registry(
        &self,
        spec: &ResolvedSpec,
        remotes: &[String],
    ) -> Result<FetchedHash, FetchError> {
        if let Some(hash) = self.known_artifact(&ArtifactKey::of(spec)) {
            debug!("{}: hash recorded in existing gemset", spec.full_name());
            self.reused.fetch_add(1, Ordering::SeqCst);
            return Ok(FetchedHash::Registry {
                hash,
                origin: HashOrigin::PreviousGemset,
            });
        }
        if let Some(hash) = self.fetch_local_hash(spec) {
            debug!("{}: vendored archive hit", spec.full_name());
            return Ok(FetchedHash::Registry {
                hash,
                origin: HashOrigin::LocalCache,
            });
        }
        let hash = self.fetch_remote_hash(spec, remotes)?;
        Ok(FetchedHash::Registry {
            hash,
            origin: HashOrigin::Remote,
        })
    }

    fn fetch_repo(
        &self,
        url: &str,
        rev: &Revision,
        fetch_submodules: bool,
    ) -> Result<RepoPrefetch, FetchError> {
        let key = RepoKey {
            url: url.to_owned(),
            rev: rev.clone(),
            fetch_submodules,
        };
        if let Some(hash) = self.known_repo(&key) {
            debug!("{url}: hash recorded in existing gemset");
            self.reused.fetch_add(1, Ordering::SeqCst);
            return Ok(RepoPrefetch {
                url: url.to_owned(),
                rev: rev.clone(),
                hash,
                fetch_submodules,
                date: None,
                path: None,
            });
        }
        self.repos.get_or_try_insert(key, || {
            if self.config.offline {
                return Err(FetchError::Offline(url.to_owned()));
            }
            self.remote_fetches.fetch_add(1, Ordering::SeqCst);
            info!("prefetching {url} at {rev}");
            self.prefetcher
                .fetch_and_hash_repo(url, rev, fetch_submodules)
        })
    }

    /// Fetch hashes for all `specs` on up to `jobs` worker threads.
    ///
    /// Results are returned in input order. The first failure stops workers
    /// from picking up new specs and is returned; no partial result escapes.
    pub fn fetch_all(&self, specs: &[&ResolvedSpec]) -> Result<Vec<FetchedHash>, FetchError> {
        if specs.is_empty() {
            return Ok(Vec::new());
        }
        let workers = self.config.jobs.clamp(1, specs.len());
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let slots: Vec<Mutex<Option<Result<FetchedHash, FetchError>>>> =
            specs.iter().map(|_| Mutex::new(None)).collect();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if failed.load(Ordering::SeqCst) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(spec) = specs.get(i) else {
                        break;
                    };
                    let result = self.fetch_hash(spec);
                    if result.is_err() {
                        failed.store(true, Ordering::SeqCst);
                    }
                    *slots[i].lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
                });
            }
        });

        let mut out = Vec::with_capacity(specs.len());
        for slot in slots {
            match slot.into_inner().unwrap_or_else(PoisonError::into_inner) {
                Some(Ok(fetched)) => out.push(fetched),
                Some(Err(e)) => return Err(e),
                None => {}
            }
        }
        Ok(out)
    }
}

/// Canonical download URLs of a registry artifact, one per remote.
pub fn artifact_urls(spec: &ResolvedSpec, remotes: &[String], default_remote: &str) -> Vec<String> {
    let file = format!("{}.gem", spec.full_name());
    let remotes: Vec<&str> = if remotes.is_empty() {
        vec![default_remote]
    } else {
        remotes.iter().map(String::as_str).collect()
    };
    remotes
        .into_iter()
        .map(|remote| format!("{}/gems/{file}", remote.trim_end_matches('/')))
        .collect()
}
