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

//! Restore a run to a destination, through an isolated stage.
//!
//! The pipeline is plan → stage → verify stage → atomic promotion. Every
//! phase writes its artifacts before the pipeline moves on, so a failure at
//! any point leaves an inspectable stage and the destination untouched.

pub mod plan;
pub mod stage;
pub mod verify;

mod promote;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cancel::CancelFlag;
use crate::clock::{Clock, SystemClock};
use crate::errors::Error;
use crate::jsonio;
use crate::lock::ProfileLock;
use crate::manifest::{Manifest, RunStatus};
use crate::runid::RunId;
use crate::{Result, RESTORE_ARTIFACTS_DIR, STAGE_DIR_SUFFIX};

pub use plan::{RestoreCandidate, RestorePlan};
pub use promote::PromotionOutcome;
pub use verify::StageVerifyMode;

pub static RESTORE_PLAN_FILENAME: &str = "restore_plan.json";
pub static STAGE_ROOT_DIR: &str = "stage_root";

/// Options for the restore pipeline.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Plan and record without staging files or promoting.
    pub dry_run: bool,
    pub verify: StageVerifyMode,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancelFlag,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        RestoreOptions {
            dry_run: false,
            verify: StageVerifyMode::default(),
            clock: Arc::new(SystemClock),
            cancel: CancelFlag::new(),
        }
    }
}

/// Outcome of a completed restore.
#[derive(Debug)]
pub struct RestoreStats {
    pub run_id: RunId,
    pub destination: PathBuf,
    pub files_restored: usize,
    /// Where a pre-existing destination was preserved, if there was one.
    pub previous_root: Option<PathBuf>,
    pub dry_run: bool,
    /// Status of the backup run that was restored.
    pub source_run_status: RunStatus,
}

/// Restore the run described by `manifest_path` into `destination`.
pub fn restore(
    manifest_path: &Path,
    destination: &Path,
    options: &RestoreOptions,
) -> Result<RestoreStats> {
    let manifest = Manifest::read(manifest_path)?;
    let run_dir = manifest_path.parent().ok_or_else(|| Error::Io {
        path: manifest_path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "manifest has no parent"),
    })?;
    if manifest.run_status == RunStatus::Partial {
        warn!(run_id = %manifest.run_id, "restoring from a partial run: only successful entries are present");
    }

    // The stage lives beside the destination so promotion renames never
    // cross a filesystem.
    let stage_base = stage_base_for(destination)?;
    fs::create_dir_all(&stage_base).map_err(|source| Error::Io {
        path: stage_base.clone(),
        source,
    })?;
    let lock = ProfileLock::acquire(&stage_base, "restore", options.clock.as_ref())?;

    let attempt_dir = stage_base.join(&manifest.run_id);
    match fs::create_dir(&attempt_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::StageExists {
                run_id: manifest.run_id.clone(),
                path: attempt_dir,
            });
        }
        Err(source) => {
            return Err(Error::Io {
                path: attempt_dir,
                source,
            })
        }
    }
    let stage_root = attempt_dir.join(STAGE_ROOT_DIR);
    fs::create_dir(&stage_root).map_err(|source| Error::Io {
        path: stage_root.clone(),
        source,
    })?;

    let plan = RestorePlan::build(&manifest, run_dir, destination)?;
    jsonio::write_json_atomic(&attempt_dir.join(RESTORE_PLAN_FILENAME), &plan)?;
    promote::ensure_same_filesystem(&stage_root, destination)?;

    info!(
        run_id = %manifest.run_id,
        files = plan.candidates.len(),
        dry_run = options.dry_run,
        "starting restore"
    );
    let built = stage::build_stage(
        &plan,
        &stage_root,
        &attempt_dir,
        options.dry_run,
        &options.cancel,
    )?;

    if options.dry_run {
        // The stage directory, holding only artifacts, is left for
        // inspection; nothing was staged and nothing is promoted.
        lock.release()?;
        return Ok(RestoreStats {
            run_id: manifest.run_id,
            destination: destination.to_path_buf(),
            files_restored: 0,
            previous_root: None,
            dry_run: true,
            source_run_status: manifest.run_status,
        });
    }

    verify::verify_stage(&plan, &stage_root, &attempt_dir, options.verify)?;
    let outcome = promote::promote(&stage_root, destination, &manifest.run_id)?;

    // The remaining artifacts accompany the restored tree.
    relocate_artifacts(&attempt_dir, destination, &manifest.run_id);
    lock.release()?;
    let _ = fs::remove_dir(&stage_base);

    info!(run_id = %manifest.run_id, files = built.staged_files, "restore complete");
    Ok(RestoreStats {
        run_id: manifest.run_id,
        destination: destination.to_path_buf(),
        files_restored: built.staged_files,
        previous_root: outcome.previous_root,
        dry_run: false,
        source_run_status: manifest.run_status,
    })
}

/// `<destination>.wcbt_stage`, a sibling of the destination.
fn stage_base_for(destination: &Path) -> Result<PathBuf> {
    let name = destination
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::UnsafePath {
            path: destination.to_path_buf(),
            base: destination.parent().unwrap_or(destination).to_path_buf(),
        })?;
    Ok(destination.with_file_name(format!("{name}{STAGE_DIR_SUFFIX}")))
}

/// Move the stage artifacts under `<destination>/.wcbt_restore/<run_id>/`.
///
/// Best-effort: the restore already succeeded, so a failure here only
/// leaves the artifacts in the stage directory instead.
fn relocate_artifacts(attempt_dir: &Path, destination: &Path, run_id: &RunId) {
    let artifacts_root = destination.join(RESTORE_ARTIFACTS_DIR);
    if let Err(err) = fs::create_dir_all(&artifacts_root) {
        warn!(%err, "could not create restore artifacts directory");
        return;
    }
    let target = artifacts_root.join(run_id);
    if let Err(err) = fs::rename(attempt_dir, &target) {
        warn!(%err, ?attempt_dir, "could not relocate restore artifacts");
    }
}
