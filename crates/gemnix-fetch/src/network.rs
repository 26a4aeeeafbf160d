use crate::git::GitPrefetch;
use crate::http::HttpHasher;
use crate::{FetchConfig, FetchError, Prefetcher, RepoPrefetch};
use gemnix_schema::{ContentHash, Revision};

/// The production [`Prefetcher`]: HTTP downloads for registry artifacts and
/// `nix-prefetch-git` for repositories.
pub struct NetworkPrefetcher {
    http: HttpHasher,
    git: GitPrefetch,
}

impl NetworkPrefetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            http: HttpHasher::new(config.timeout),
            git: GitPrefetch::new(config.prefetch_git.clone()),
        }
    }
}

impl Prefetcher for NetworkPrefetcher {
    fn fetch_and_hash_url(&self, url: &str) -> Result<ContentHash, FetchError> {
        self.http.hash_url(url)
    }

    fn fetch_and_hash_repo(
        &self,
        url: &str,
        rev: &Revision,
        fetch_submodules: bool,
    ) -> Result<RepoPrefetch, FetchError> {
        self.git.prefetch(url, rev, fetch_submodules)
    }
}
