//! File operations for the vault
//!
//! Enumerates markdown notes and maps them to vault-relative paths.

use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// List all markdown files in the vault directory (recursively).
/// Hidden files and directories (like `.widgets/`) are skipped.
pub fn list_notes(vault_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !vault_dir.exists() {
        return Ok(files);
    }

    let walker = WalkDir::new(vault_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()));

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().map(|e| e == "md").unwrap_or(false) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Get the `/`-separated relative path from vault_dir for a file
pub fn relative_path(vault_dir: &Path, file_path: &Path) -> Option<String> {
    let rel = file_path.strip_prefix(vault_dir).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve a vault-relative path, refusing anything that would leave the vault
pub fn resolve_in_vault(vault_dir: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    let mut resolved = vault_dir.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}
