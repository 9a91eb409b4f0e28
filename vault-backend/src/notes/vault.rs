//! Vault access used by the widget engine.
//!
//! The engine only needs two things from a vault: which notes match a glob,
//! and the frontmatter of a note. `FsVault` serves both straight from disk.

use super::file_ops;
use super::frontmatter::{self, Fields};
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::io;
use std::path::{Path, PathBuf};

/// `*` stays within one directory, `**` crosses directories
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid glob pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
    #[error("note not found: {0}")]
    NotFound(String),
    #[error("path escapes the vault: {0}")]
    OutsideVault(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// File enumeration and frontmatter extraction for one vault
#[async_trait]
pub trait VaultSource: Send + Sync {
    /// Vault-relative paths matching `pattern`, sorted
    async fn list_files(&self, pattern: &str) -> Result<Vec<String>, SourceError>;

    /// Frontmatter fields of one note
    async fn read_fields(&self, path: &str) -> Result<Fields, SourceError>;
}

pub fn compile_pattern(pattern: &str) -> Result<Pattern, SourceError> {
    Pattern::new(pattern).map_err(|e| SourceError::Pattern {
        pattern: pattern.to_string(),
        message: e.msg.to_string(),
    })
}

/// Whether a vault-relative path matches a source glob. Invalid globs match nothing.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(compiled) => compiled.matches_with(path, MATCH_OPTIONS),
        Err(_) => false,
    }
}

/// Markdown vault on the local filesystem
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl VaultSource for FsVault {
    async fn list_files(&self, pattern: &str) -> Result<Vec<String>, SourceError> {
        let compiled = compile_pattern(pattern)?;
        let root = self.root.clone();

        let files = tokio::task::spawn_blocking(move || file_ops::list_notes(&root))
            .await
            .map_err(|e| SourceError::Io {
                path: self.root.display().to_string(),
                source: io::Error::other(e),
            })?
            .map_err(|e| SourceError::Io {
                path: self.root.display().to_string(),
                source: e,
            })?;

        let mut matched: Vec<String> = files
            .iter()
            .filter_map(|f| file_ops::relative_path(&self.root, f))
            .filter(|rel| compiled.matches_with(rel, MATCH_OPTIONS))
            .collect();
        matched.sort();

        log::debug!("[NOTES] Pattern '{}' matched {} notes", pattern, matched.len());
        Ok(matched)
    }

    async fn read_fields(&self, path: &str) -> Result<Fields, SourceError> {
        let full = file_ops::resolve_in_vault(&self.root, path)
            .ok_or_else(|| SourceError::OutsideVault(path.to_string()))?;

        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(frontmatter::parse_note_fields(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(SourceError::NotFound(path.to_string())),
            Err(e) => Err(SourceError::Io {
                path: path.to_string(),
                source: e,
            }),
        }
    }
}
