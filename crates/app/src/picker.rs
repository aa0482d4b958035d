use anyhow::{Context, Result};
use dialoguer::MultiSelect;
use docqa_core::{discover_files, FileKind};
use std::path::{Path, PathBuf};

/// Supported files directly inside `dir`, sorted by name.
pub fn candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = discover_files(dir)
        .with_context(|| format!("failed to list files in {}", dir.display()))?;
    Ok(files
        .into_iter()
        .filter(|path| FileKind::from_path(path).is_some())
        .collect())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lets the user tick PDF and TXT files in `dir`. Returns an empty list when
/// nothing is selected or there is nothing to choose from.
pub fn pick_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let files = candidates(dir)?;
    if files.is_empty() {
        println!("No PDF or TXT files found in {}.", dir.display());
        return Ok(Vec::new());
    }

    let names = files.iter().map(|path| display_name(path)).collect::<Vec<_>>();
    let selected = MultiSelect::new()
        .with_prompt("Select PDF and TXT files to index (space to toggle, enter to confirm)")
        .items(&names)
        .interact_opt()?
        .unwrap_or_default();

    Ok(selected
        .into_iter()
        .filter_map(|index| files.get(index).cloned())
        .collect())
}
