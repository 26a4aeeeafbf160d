use gemnix_schema::FetchSection;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REMOTE: &str = "https://rubygems.org";
pub const DEFAULT_JOBS: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PREFETCH_GIT: &str = "nix-prefetch-git";

/// Explicit fetch configuration. Nothing in this crate reads ambient process
/// state; everything it needs is passed in here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Directories holding vendored `.gem` archives, searched in order.
    pub cache_dirs: Vec<PathBuf>,
    /// Registry used when a lockfile `GEM` section lists no remote.
    pub default_remote: String,
    /// Upper bound on concurrent remote fetches.
    pub jobs: usize,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Refuse all remote fetches.
    pub offline: bool,
    /// Program used to prefetch git sources.
    pub prefetch_git: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_dirs: Vec::new(),
            default_remote: DEFAULT_REMOTE.to_owned(),
            jobs: DEFAULT_JOBS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            offline: false,
            prefetch_git: DEFAULT_PREFETCH_GIT.to_owned(),
        }
    }
}

impl FetchConfig {
    /// Layer a `[fetch]` declaration section over this config. Relative
    /// cache directories are resolved against `project_root`.
    #[must_use]
    pub fn with_section(mut self, section: &FetchSection, project_root: &Path) -> Self {
        if let Some(jobs) = section.jobs {
            self.jobs = jobs.max(1);
        }
        if let Some(secs) = section.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(ref remote) = section.remote {
            self.default_remote = remote.trim_end_matches('/').to_owned();
        }
        for dir in &section.cache_dirs {
            let dir = project_root.join(dir);
            if !self.cache_dirs.contains(&dir) {
                self.cache_dirs.push(dir);
            }
        }
        self
    }

    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dirs.push(dir.into());
        self
    }

    #[must_use]
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }
}
