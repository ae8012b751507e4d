// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Atomic promotion of a stage to its destination.
//!
//! Add-only contract: nothing under the destination is ever overwritten or
//! deleted. An existing destination is preserved whole under a sibling name
//! before the stage takes its place; the engine never cleans up the
//! preserved copy.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::errors::Error;
use crate::runid::RunId;
use crate::{Result, RESTORE_PREVIOUS_PREFIX};

/// Result of a successful promotion.
#[derive(Debug)]
pub struct PromotionOutcome {
    /// Where the prior destination was preserved, if one existed.
    pub previous_root: Option<PathBuf>,
}

/// The sibling name preserving the prior destination for `run_id`.
pub fn previous_root_for(destination: &Path, run_id: &RunId) -> Result<PathBuf> {
    let name = destination
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::UnsafePath {
            path: destination.to_path_buf(),
            base: destination.parent().unwrap_or(destination).to_path_buf(),
        })?;
    Ok(destination.with_file_name(format!("{RESTORE_PREVIOUS_PREFIX}{name}_{run_id}")))
}

/// Check that `stage_root` and the destination's parent share a filesystem,
/// so both promotion renames stay atomic.
pub fn ensure_same_filesystem(stage_root: &Path, destination: &Path) -> Result<()> {
    let dest_probe = if destination.exists() {
        destination
    } else {
        destination.parent().unwrap_or(destination)
    };
    if device_of(stage_root)? != device_of(dest_probe)? {
        return Err(Error::CrossDeviceStage {
            stage: stage_root.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn device_of(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path)
        .map(|m| m.dev())
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
fn device_of(path: &Path) -> Result<u64> {
    // Windows: approximate a device id by the path prefix (drive or UNC
    // share) of the canonical path.
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::path::Component;

    let resolved = crate::pathsafety::normalize(path)?;
    let mut hasher = DefaultHasher::new();
    if let Some(Component::Prefix(prefix)) = resolved.components().next() {
        prefix.as_os_str().hash(&mut hasher);
    }
    Ok(hasher.finish())
}

/// Publish `stage_root` as `destination`.
///
/// If the destination exists it is first renamed aside; if the second
/// rename then fails, the preserved copy is renamed back and the whole
/// operation reports `promotion_failed`.
pub fn promote(stage_root: &Path, destination: &Path, run_id: &RunId) -> Result<PromotionOutcome> {
    if !destination.exists() {
        fs::rename(stage_root, destination).map_err(|source| Error::PromotionFailed {
            stage: stage_root.to_path_buf(),
            destination: destination.to_path_buf(),
            source,
        })?;
        info!(?destination, "stage promoted");
        return Ok(PromotionOutcome {
            previous_root: None,
        });
    }

    let previous_root = previous_root_for(destination, run_id)?;
    if previous_root.exists() {
        return Err(Error::StageExists {
            run_id: run_id.clone(),
            path: previous_root,
        });
    }

    fs::rename(destination, &previous_root).map_err(|source| Error::PromotionFailed {
        stage: stage_root.to_path_buf(),
        destination: destination.to_path_buf(),
        source,
    })?;
    if let Err(source) = fs::rename(stage_root, destination) {
        // Put the prior destination back; if even that fails the preserved
        // copy still exists under its sibling name.
        if let Err(rollback_err) = fs::rename(&previous_root, destination) {
            error!(?previous_root, %rollback_err, "rollback of preserved destination failed");
        }
        return Err(Error::PromotionFailed {
            stage: stage_root.to_path_buf(),
            destination: destination.to_path_buf(),
            source,
        });
    }
    info!(?destination, ?previous_root, "stage promoted, prior destination preserved");
    Ok(PromotionOutcome {
        previous_root: Some(previous_root),
    })
}
