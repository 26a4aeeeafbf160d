use super::{json_pretty, load_inputs, spin_fail, spin_ok, spinner, Output, EXIT_SUCCESS};
use gemnix_core::{ConvertConfig, Converter};
use gemnix_fetch::FetchConfig;
use gemnix_schema::{read_gemset_file, write_gemset_file, Gemset};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Vendored archives written by `bundle pack`, relative to the project root.
const BUNDLE_CACHE_DIR: &str = "vendor/cache";

#[derive(Debug, Clone)]
pub struct ConvertArgs {
    pub lockfile: PathBuf,
    pub declarations: Option<PathBuf>,
    pub gemset: PathBuf,
    pub cache_dirs: Vec<PathBuf>,
    pub jobs: Option<usize>,
    pub offline: bool,
    pub remote: Option<String>,
    pub timeout: Option<u64>,
    pub prefetch_git: Option<String>,
    pub refresh: bool,
}

pub fn run(args: &ConvertArgs, output: Output) -> Result<u8, String> {
    let inputs = load_inputs(&args.lockfile, args.declarations.as_deref())?;
    let fetch = fetch_config(args, &inputs.declaration.fetch, &inputs.project_root)?;
    let mut config = ConvertConfig::new(&inputs.project_root, fetch);
    if !args.refresh {
        if let Some(previous) = previous_gemset(&args.gemset) {
            config = config.with_previous_gemset(previous);
        }
    }
    let converter = Converter::new(config);

    let pb = if output.interactive() {
        Some(spinner(&format!(
            "converting {} gems...",
            inputs.lock.specs.len()
        )))
    } else {
        None
    };
    let conversion = match converter.convert(&inputs.lock, &inputs.direct) {
        Ok(c) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "gemset assembled");
            }
            c
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "conversion failed");
            }
            return Err(e.to_string());
        }
    };

    if output.json {
        println!("{}", json_pretty(&conversion.gemset)?);
        return Ok(EXIT_SUCCESS);
    }

    write_gemset_file(&conversion.gemset, &args.gemset)
        .map_err(|e| format!("failed to write {}: {e}", args.gemset.display()))?;
    if !output.quiet {
        println!(
            "wrote {} ({} gems, {} vendored, {} reused, {} fetched)",
            args.gemset.display(),
            conversion.gemset.len(),
            conversion.local_hits,
            conversion.reused,
            conversion.remote_fetches
        );
    }
    Ok(EXIT_SUCCESS)
}

/// The gemset a previous run wrote at `path`. A missing file is normal; an
/// unreadable one is ignored.
fn previous_gemset(path: &Path) -> Option<Gemset> {
    if !path.is_file() {
        return None;
    }
    match read_gemset_file(path) {
        Ok(gemset) => {
            tracing::debug!("{} packages recorded in {}", gemset.len(), path.display());
            Some(gemset)
        }
        Err(e) => {
            tracing::warn!("ignoring existing {}: {e}", path.display());
            None
        }
    }
}

/// Flags override the `[fetch]` declaration section, which overrides defaults.
fn fetch_config(
    args: &ConvertArgs,
    section: &gemnix_schema::FetchSection,
    project_root: &Path,
) -> Result<FetchConfig, String> {
    let mut config = FetchConfig::default();
    for dir in &args.cache_dirs {
        config = config.with_cache_dir(dir);
    }
    config = config
        .with_section(section, project_root)
        .offline(args.offline);

    let bundle_cache = project_root.join(BUNDLE_CACHE_DIR);
    if !config.cache_dirs.contains(&bundle_cache) {
        config.cache_dirs.push(bundle_cache);
    }
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            return Err("--jobs must be at least 1".to_owned());
        }
        config.jobs = jobs;
    }
    if let Some(ref remote) = args.remote {
        config.default_remote = remote.trim_end_matches('/').to_owned();
    }
    if let Some(secs) = args.timeout {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(ref program) = args.prefetch_git {
        config.prefetch_git.clone_from(program);
    }
    Ok(config)
}
