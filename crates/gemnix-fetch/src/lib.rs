//! Content hash acquisition for gemnix.
//!
//! This crate turns each resolved spec into a content hash: registry gems are
//! hashed from the vendored cache when possible and otherwise downloaded and
//! hashed, git sources are prefetched with `nix-prefetch-git`, and path sources
//! are recorded without a hash. Remote fetches are memoized per artifact and
//! may fan out over a bounded set of worker threads.

pub mod config;
pub mod fetcher;
pub mod git;
pub mod http;
pub mod local;
pub mod network;

pub use config::FetchConfig;
pub use fetcher::{ArtifactKey, FetchedHash, HashFetcher, HashOrigin, KnownHashes};
pub use git::GitPrefetch;
pub use http::HttpHasher;
pub use local::{sha256_file, LocalCache};
pub use network::NetworkPrefetcher;

use gemnix_schema::{ContentHash, Revision};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("'{program}' failed: {reason}")]
    Subprocess { program: String, reason: String },
    #[error("unexpected prefetch output: {0}")]
    InvalidOutput(String),
    #[error("remote fetch of {0} refused in offline mode")]
    Offline(String),
    #[error("failed to fetch {source_kind} gem {name} ({version}): {cause}")]
    FetchFailed {
        name: String,
        version: String,
        source_kind: String,
        #[source]
        cause: Box<FetchError>,
    },
}

/// Result of prefetching a repository at a pinned revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPrefetch {
    pub url: String,
    pub rev: Revision,
    pub hash: ContentHash,
    pub fetch_submodules: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Store path of the checkout, when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// The two network capabilities the hash fetcher depends on.
///
/// Implementations may block on network or subprocess I/O; they are the
/// only code allowed to do so.
pub trait Prefetcher: Send + Sync {
    /// Download `url` and return the hash of its content.
    fn fetch_and_hash_url(&self, url: &str) -> Result<ContentHash, FetchError>;

    /// Check out `url` at `rev` and return the hash of the checkout.
    fn fetch_and_hash_repo(
        &self,
        url: &str,
        rev: &Revision,
        fetch_submodules: bool,
    ) -> Result<RepoPrefetch, FetchError>;
}
