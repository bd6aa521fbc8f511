//! Archive unpacking.
//!
//! Uploaded document sets arrive as a single zip archive. [`list_extracted_files`]
//! unpacks it into a destination directory and returns the regular files it
//! produced, minus anything matching `archive.exclude_globs` (by default the
//! `__MACOSX/` resource forks and `.DS_Store` files macOS adds to every
//! archive it creates).
//!
//! Limits are checked before anything touches the disk: the archive size
//! against `max_archive_bytes` and the sum of the declared uncompressed entry
//! sizes against `max_extracted_bytes`. Actual bytes written are counted as
//! well, since declared sizes come from the archive itself.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::ZipArchive;

use crate::config::ArchiveConfig;
use crate::error::{RelayError, Result};

/// Unpack `archive_bytes` under `dest` and return the extracted file paths, sorted.
pub fn list_extracted_files(
    archive_bytes: &[u8],
    dest: &Path,
    config: &ArchiveConfig,
) -> Result<Vec<PathBuf>> {
    if archive_bytes.len() as u64 > config.max_archive_bytes {
        return Err(RelayError::archive(format!(
            "archive is {} bytes, limit is {}",
            archive_bytes.len(),
            config.max_archive_bytes
        )));
    }

    let excludes = build_globset(&config.exclude_globs)?;
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| RelayError::archive(format!("not a readable zip archive: {}", e)))?;

    let mut declared: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| RelayError::archive(format!("corrupt entry #{}: {}", i, e)))?;
        declared = declared.saturating_add(entry.size());
    }
    if declared > config.max_extracted_bytes {
        return Err(RelayError::archive(format!(
            "archive expands to {} bytes, limit is {}",
            declared, config.max_extracted_bytes
        )));
    }

    let mut budget = config.max_extracted_bytes;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| RelayError::archive(format!("corrupt entry #{}: {}", i, e)))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            RelayError::archive(format!(
                "entry '{}' would escape the destination",
                entry.name()
            ))
        })?;

        if entry.is_dir() || excludes.is_match(&relative) {
            continue;
        }

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RelayError::archive(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let mut out = File::create(&target).map_err(|e| {
            RelayError::archive(format!("cannot create {}: {}", target.display(), e))
        })?;
        let written = std::io::copy(&mut (&mut entry).take(budget.saturating_add(1)), &mut out)
            .map_err(|e| {
                RelayError::archive(format!("cannot unpack '{}': {}", relative.display(), e))
            })?;
        if written > budget {
            return Err(RelayError::archive(format!(
                "archive expands beyond {} bytes",
                config.max_extracted_bytes
            )));
        }
        budget -= written;
        debug!(entry = %relative.display(), bytes = written, "unpacked");
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dest) {
        let entry = entry.map_err(|e| RelayError::archive(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dest).unwrap_or(path);
        if excludes.is_match(relative) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();

    info!(
        files = files.len(),
        bytes = config.max_extracted_bytes - budget,
        "archive unpacked"
    );
    Ok(files)
}

/// Count files per lowercased extension. Files without one count as `(none)`.
pub fn extension_tally(files: &[PathBuf]) -> BTreeMap<String, usize> {
    let mut tally = BTreeMap::new();
    for file in files {
        let ext = file
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "(none)".to_string());
        *tally.entry(ext).or_insert(0) += 1;
    }
    tally
}

/// An archive unpacked into a temporary directory that is removed on drop.
pub struct UnpackedArchive {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl UnpackedArchive {
    pub fn unpack(archive_bytes: &[u8], config: &ArchiveConfig) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("relay-")
            .tempdir()
            .map_err(|e| RelayError::archive(format!("cannot create work directory: {}", e)))?;
        let files = list_extracted_files(archive_bytes, dir.path(), config)?;
        Ok(Self { dir, files })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RelayError::configuration(format!("invalid exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RelayError::configuration(e.to_string()))
}
