use gemnix_schema::{ContentHash, ResolvedSpec};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Read-only view of vendored gem archives (`bundle pack` / `bundle cache` output).
///
/// Lookups never create, modify, or delete files.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    dirs: Vec<PathBuf>,
}

impl LocalCache {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Path of the vendored archive for `spec`, if any cache directory holds it.
    pub fn locate(&self, spec: &ResolvedSpec) -> Option<PathBuf> {
        let file_name = format!("{}.gem", spec.full_name());
        self.dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|path| path.is_file())
    }

    /// Hash the vendored archive for `spec`. `Ok(None)` means a cache miss.
    pub fn hash(&self, spec: &ResolvedSpec) -> io::Result<Option<ContentHash>> {
        match self.locate(spec) {
            Some(path) => {
                tracing::debug!("hashing vendored {}", path.display());
                sha256_file(&path).map(Some)
            }
            None => Ok(None),
        }
    }
}

/// SHA-256 of a file's content in Nix base-32.
pub fn sha256_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentHash::from_sha256_digest(&hasher.finalize()))
}
