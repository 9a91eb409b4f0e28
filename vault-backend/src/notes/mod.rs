//! Notes vault access: Obsidian-compatible markdown notes with YAML frontmatter
//!
//! The widget engine reads the vault through `VaultSource`; `FsVault` is the
//! on-disk implementation.

pub mod file_ops;
pub mod frontmatter;
pub mod markers;
pub mod vault;

pub use frontmatter::Fields;
pub use vault::{FsVault, SourceError, VaultSource};
