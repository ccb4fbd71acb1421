use anyhow::{bail, Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Session identifier, local time `YYYYMMDD_HHMMSS`.
pub fn session_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn ensure_directories(config: &AppConfig) -> Result<()> {
    for dir in config.directories() {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    Ok(())
}

pub fn validate_directories(config: &AppConfig) -> Result<()> {
    for dir in config.directories() {
        if !dir.exists() {
            bail!("missing directory: {}", dir.display());
        }
        if !dir.is_dir() {
            bail!("not a directory: {}", dir.display());
        }
    }
    debug!("directory layout validated");
    Ok(())
}

fn staged_files(processed_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(processed_dir)
        .with_context(|| format!("cannot read {}", processed_dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Moves every staged file into `archive_dir/session_{id}` and returns that folder.
pub fn archive_staged(processed_dir: &Path, archive_dir: &Path, session: &str) -> Result<PathBuf> {
    let folder = archive_dir.join(format!("session_{session}"));
    fs::create_dir_all(&folder)
        .with_context(|| format!("cannot create {}", folder.display()))?;

    let mut moved = 0usize;
    for from in staged_files(processed_dir)? {
        let Some(name) = from.file_name() else { continue };
        let to = unique_path(&folder, &name.to_string_lossy());
        move_file(&from, &to)
            .with_context(|| format!("cannot archive {}", from.display()))?;
        moved += 1;
    }
    info!("{} files archived to {}", moved, folder.display());
    Ok(folder)
}

/// Removes whatever is left in the staging area, returns how many files went.
pub fn clean_staging(processed_dir: &Path) -> Result<usize> {
    let mut removed = 0usize;
    for path in staged_files(processed_dir)? {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("cannot remove {}: {e}", path.display()),
        }
    }
    if removed > 0 {
        info!("{} staged files removed", removed);
    }
    Ok(removed)
}

/// Free path in `dir` for `file_name`, adding `_N` before the extension on clashes.
pub(crate) fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = candidate
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = candidate
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Rename, or copy then delete when the rename crosses filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Err(e) = fs::rename(from, to) {
        debug!("rename failed ({e}), copying {}", from.display());
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}
