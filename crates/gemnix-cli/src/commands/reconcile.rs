use super::{colorize_group, json_pretty, load_inputs, Output, EXIT_SUCCESS};
use gemnix_core::{CoreError, ReconciledEntry, Reconciler};
use std::path::Path;

pub fn run(lockfile: &Path, declarations: Option<&Path>, output: Output) -> Result<u8, String> {
    let inputs = load_inputs(lockfile, declarations)?;
    let reconciliation = Reconciler::for_lockfile(&inputs.lock)
        .reconcile(&inputs.direct, &inputs.lock.specs)
        .map_err(|e| CoreError::from(e).to_string())?;

    if output.json {
        println!("{}", json_pretty(&reconciliation)?);
        return Ok(EXIT_SUCCESS);
    }
    if output.quiet {
        return Ok(EXIT_SUCCESS);
    }

    let width = reconciliation
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    for entry in reconciliation.iter() {
        println!("{}", format_entry(entry, width));
    }
    println!(
        "{} gems reconciled in {} passes",
        reconciliation.len(),
        reconciliation.passes()
    );
    Ok(EXIT_SUCCESS)
}

fn format_entry(entry: &ReconciledEntry, width: usize) -> String {
    let groups = if entry.groups.is_empty() {
        "-".to_owned()
    } else {
        entry
            .groups
            .iter()
            .map(|g| colorize_group(g))
            .collect::<Vec<_>>()
            .join(",")
    };
    let platforms = if entry.platforms.is_empty() {
        "-".to_owned()
    } else {
        entry
            .platforms
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "{:<width$}  {:<12}  groups: {groups}  platforms: {platforms}",
        entry.name,
        entry.version.as_deref().unwrap_or("?"),
    )
}
