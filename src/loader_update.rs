// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! First stage loader update selection.
//!
//! A shim build is only usable together with the MOK manager shipped next
//! to it, so a candidate must be both newer than the active loader and
//! paired with its companion tool before it can be selected. Newer builds
//! without a companion are reported but never chosen.

use crate::boot_entry::BootEntry;
use crate::error::{Error, Result};
use crate::mount::resolve_case_insensitive;
use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use log::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A loader file found under one of the search roots
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoaderCandidate {
    pub path: PathBuf,
    /// Modification time, seconds since the epoch
    pub modified: i64,
    pub directory: PathBuf,
    /// Companion tool in the same directory, if present
    pub companion: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "candidate", rename_all = "snake_case")]
pub enum UpdateDecision {
    Update(LoaderCandidate),
    NoUpdateAvailable,
}

/// Outcome of one loader scan
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoaderScan {
    pub current_loader: PathBuf,
    pub current_modified: i64,
    pub decision: UpdateDecision,
    /// Newer candidates rejected for lack of a companion tool
    pub rejected: Vec<LoaderCandidate>,
}

#[derive(Debug, Clone)]
pub struct LoaderUpdateSelector {
    search_roots: Vec<PathBuf>,
    pattern: Pattern,
    companion_name: String,
    backup_tag: String,
}

impl LoaderUpdateSelector {
    /// Build a selector. The companion tool is expected to be named
    /// `<companion_prefix><platform_tag><companion_suffix>`, e.g.
    /// `mmx64.efi`.
    pub fn new(
        search_roots: Vec<PathBuf>,
        loader_pattern: &str,
        companion_prefix: &str,
        platform_tag: &str,
        companion_suffix: &str,
        backup_tag: &str,
    ) -> Result<Self> {
        Ok(Self {
            search_roots,
            pattern: Pattern::new(loader_pattern)?,
            companion_name: format!(
                "{companion_prefix}{platform_tag}{companion_suffix}"
            ),
            backup_tag: backup_tag.to_ascii_lowercase(),
        })
    }

    /// Locate the active loader of `current` under the partition mounted
    /// at `mount_point` and look for a newer, paired replacement.
    pub fn select_update(
        &self,
        current: &BootEntry,
        mount_point: &Path,
    ) -> Result<LoaderScan> {
        let current_path =
            resolve_case_insensitive(mount_point, current.relative_loader_path())
                .ok_or_else(|| {
                    Error::LoaderNotFound(
                        mount_point.join(current.relative_loader_path()),
                    )
                })?;
        self.select_against(&current_path)
    }

    /// Selection against an already resolved loader file
    pub fn select_against(&self, current_path: &Path) -> Result<LoaderScan> {
        let current_modified = modified_secs(current_path)
            .map_err(|e| Error::from_io_at(e, current_path, "shim-update"))?;
        info!(
            "Active loader {} modified at {}",
            current_path.display(),
            format_secs(current_modified)
        );

        let mut rejected = Vec::new();
        let mut best: Option<LoaderCandidate> = None;

        for candidate in self.candidates()? {
            if candidate.modified <= current_modified {
                debug!(
                    "Skipping {}: not newer than the active loader",
                    candidate.path.display()
                );
                continue;
            }

            if candidate.companion.is_none() {
                info!(
                    "Rejecting {} ({}): no {} in {}",
                    candidate.path.display(),
                    format_secs(candidate.modified),
                    self.companion_name,
                    candidate.directory.display()
                );
                rejected.push(candidate);
                continue;
            }

            // Ties keep the first candidate seen
            match &best {
                Some(b) if b.modified >= candidate.modified => {}
                _ => best = Some(candidate),
            }
        }

        let decision = match best {
            Some(candidate) if same_path(&candidate.path, current_path) => {
                UpdateDecision::NoUpdateAvailable
            }
            Some(candidate) => {
                info!(
                    "Selected loader update {} ({})",
                    candidate.path.display(),
                    format_secs(candidate.modified)
                );
                UpdateDecision::Update(candidate)
            }
            None => {
                info!("No loader update available");
                UpdateDecision::NoUpdateAvailable
            }
        };

        Ok(LoaderScan {
            current_loader: current_path.to_path_buf(),
            current_modified,
            decision,
            rejected,
        })
    }

    /// Every loader file under the search roots, in a stable order
    fn candidates(&self) -> Result<Vec<LoaderCandidate>> {
        let mut files = Vec::new();
        for root in &self.search_roots {
            if !root.is_dir() {
                debug!("Search root {} does not exist", root.display());
                continue;
            }
            collect_files(root, &mut files)?;
        }

        let mut candidates = Vec::new();
        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.pattern.matches_with(name, MATCH_OPTIONS) {
                continue;
            }
            if !self.backup_tag.is_empty()
                && name.to_ascii_lowercase().contains(&self.backup_tag)
            {
                debug!("Ignoring backup {}", path.display());
                continue;
            }

            let modified = match modified_secs(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let directory = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            let companion =
                resolve_case_insensitive(&directory, &self.companion_name)
                    .filter(|c| c.exists() && !c.is_dir());

            candidates.push(LoaderCandidate {
                path,
                modified,
                directory,
                companion,
            });
        }
        Ok(candidates)
    }
}

/// Recursively collect regular files, sorted by name within each
/// directory. Symlinked directories are not followed.
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!("Skipping directory {}: {}", dir.display(), e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut paths: Vec<PathBuf> =
        entries.flatten().map(|entry| entry.path()).collect();
    paths.sort();

    for path in paths {
        if path.is_symlink() && path.is_dir() {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn modified_secs(path: &Path) -> std::io::Result<i64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified).timestamp())
}

fn format_secs(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(&b.to_string_lossy())
}
