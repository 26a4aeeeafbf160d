pub mod completions;
pub mod convert;
pub mod man_pages;
pub mod reconcile;

use gemnix_core::CoreError;
use gemnix_schema::{
    direct_dependencies, parse_declaration_file, Declaration, DirectDependency, Lockfile,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INPUT_ERROR: u8 = 2;
pub const EXIT_FETCH_ERROR: u8 = 3;

pub const DECLARATION_FILE: &str = "gemnix.toml";

/// How results are presented on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn interactive(self) -> bool {
        !self.json && !self.quiet
    }
}

/// Parsed command inputs shared by `convert` and `reconcile`.
#[derive(Debug)]
pub struct Inputs {
    pub lock: Lockfile,
    pub declaration: Declaration,
    pub direct: Vec<DirectDependency>,
    /// Directory holding the lockfile; path sources are relative to it.
    pub project_root: PathBuf,
}

/// Read the lockfile and the declaration file. Without an explicit
/// declaration path, `gemnix.toml` next to the lockfile is used if present.
pub fn load_inputs(lockfile: &Path, declarations: Option<&Path>) -> Result<Inputs, String> {
    let lock = Lockfile::read_from_file(lockfile).map_err(|e| CoreError::from(e).to_string())?;
    let project_root = project_root(lockfile);

    let declaration = match declarations {
        Some(path) => read_declaration(path)?,
        None => {
            let candidate = project_root.join(DECLARATION_FILE);
            if candidate.is_file() {
                read_declaration(&candidate)?
            } else {
                tracing::debug!("no {} found; using defaults", candidate.display());
                Declaration::default()
            }
        }
    };
    let direct = direct_dependencies(&lock, &declaration);
    Ok(Inputs {
        lock,
        declaration,
        direct,
        project_root,
    })
}

fn read_declaration(path: &Path) -> Result<Declaration, String> {
    parse_declaration_file(path)
        .map_err(|e| format!("{} ({})", CoreError::from(e), path.display()))
}

fn project_root(lockfile: &Path) -> PathBuf {
    match lockfile.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_group(group: &str) -> String {
    use console::Style;
    match group {
        "default" => Style::new().green().apply_to(group).to_string(),
        "test" => Style::new().yellow().apply_to(group).to_string(),
        "development" => Style::new().cyan().apply_to(group).to_string(),
        other => Style::new().bold().apply_to(other).to_string(),
    }
}
