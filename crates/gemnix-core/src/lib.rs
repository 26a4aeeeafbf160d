//! Conversion engine for gemnix.
//!
//! This crate ties the lockfile model and the hash fetcher together into the
//! `Converter`: group and platform reconciliation over the resolved graph,
//! platform normalization for native gems, and assembly of the ordered
//! gemset that is finally rendered as `gemset.nix`.

pub mod assembler;
pub mod platform;
pub mod reconcile;

pub use assembler::{recorded_hashes, ConvertConfig, Conversion, Converter};
pub use platform::{expand_platform_aliases, family_aliases, normalize_targets, PlatformError};
pub use reconcile::{ReconcileError, ReconciledEntry, Reconciler, Reconciliation};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("lockfile error: {0}")]
    Lockfile(#[from] gemnix_schema::LockfileError),
    #[error("declaration error: {0}")]
    Declaration(#[from] gemnix_schema::DeclarationError),
    #[error("reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("fetch error: {0}")]
    Fetch(#[from] gemnix_fetch::FetchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
