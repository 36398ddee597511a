//! Side-effecting helpers: configuration, processes, the tool library,
//! the generator backend, prompts and run records.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod run_record;
pub mod sandbox;
pub mod tool_store;

/// Directory holding config and run records, relative to the workspace root.
pub const STATE_DIR: &str = ".toolsmith";

/// Write `contents` next to `path` and rename it into place.
///
/// Readers never observe a half-written file; the parent directory is created
/// if missing.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
