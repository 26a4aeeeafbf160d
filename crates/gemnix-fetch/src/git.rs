use crate::{FetchError, RepoPrefetch};
use gemnix_schema::{ContentHash, Revision};
use serde::Deserialize;
use std::process::Command;

/// Prefetches git repositories by running `nix-prefetch-git`, which clones
/// the repository into the Nix store and prints a JSON description.
pub struct GitPrefetch {
    program: String,
}

#[derive(Debug, Deserialize)]
struct PrefetchGitOutput {
    url: String,
    rev: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

impl GitPrefetch {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn command(&self, url: &str, rev: &Revision, fetch_submodules: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--url", url, "--rev", rev.as_str(), "--quiet"]);
        if fetch_submodules {
            cmd.arg("--fetch-submodules");
        }
        cmd
    }

    pub fn prefetch(
        &self,
        url: &str,
        rev: &Revision,
        fetch_submodules: bool,
    ) -> Result<RepoPrefetch, FetchError> {
        tracing::debug!("{} --url {url} --rev {rev}", self.program);
        let output = self
            .command(url, rev, fetch_submodules)
            .output()
            .map_err(|e| FetchError::Subprocess {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Subprocess {
                program: self.program.clone(),
                reason: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        parse_prefetch_output(&output.stdout, fetch_submodules)
    }
}

/// The submodule flag is the one requested; whatever the tool echoes back
/// is ignored.
fn parse_prefetch_output(stdout: &[u8], fetch_submodules: bool) -> Result<RepoPrefetch, FetchError> {
    let parsed: PrefetchGitOutput =
        serde_json::from_slice(stdout).map_err(|e| FetchError::InvalidOutput(e.to_string()))?;
    let sha256 = parsed
        .sha256
        .filter(|h| !h.is_empty())
        .ok_or_else(|| FetchError::InvalidOutput("missing sha256".to_owned()))?;
    Ok(RepoPrefetch {
        url: parsed.url,
        rev: Revision::new(parsed.rev),
        hash: ContentHash::new(sha256),
        fetch_submodules,
        date: parsed.date,
        path: parsed.path,
    })
}
