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

//! Build a restore plan from a run manifest.
//!
//! Candidates mirror manifest order. The plan phase is where topology
//! violations are caught: unknown schemas (already rejected on read) and
//! rel-path sets that would collide after case-insensitive merge on a
//! case-insensitive target.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::manifest::{Manifest, RunStatus};
use crate::pathsafety;
use crate::relpath::RelPath;
use crate::runid::RunId;
use crate::{Result, PAYLOAD_DIR};

pub static RESTORE_PLAN_SCHEMA: &str = "wcbt_restore_plan_v1";
pub static RESTORE_CANDIDATE_SCHEMA: &str = "wcbt_restore_candidate_v1";

/// One file to be staged: payload source to relative destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreCandidate {
    pub schema: String,
    /// Absolute path inside the run payload.
    pub source_abs: PathBuf,
    pub rel_path: RelPath,
    /// Absolute path under the restore destination.
    pub dest_abs: PathBuf,
    pub expected_hash: String,
    pub size_bytes: u64,
}

/// An ordered restore plan (schema `wcbt_restore_plan_v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorePlan {
    pub schema: String,
    pub run_id: RunId,
    /// Root every candidate's `source_abs` must stay within.
    pub payload_root: PathBuf,
    pub destination: PathBuf,
    /// Status of the backup run being restored; `partial` restores only
    /// what the manifest lists.
    pub source_run_status: RunStatus,
    pub candidates: Vec<RestoreCandidate>,
}

impl RestorePlan {
    /// Materialize candidates from a validated manifest.
    pub fn build(manifest: &Manifest, run_dir: &Path, destination: &Path) -> Result<RestorePlan> {
        reject_case_collisions(manifest)?;
        let payload_root = run_dir.join(PAYLOAD_DIR);
        let candidates = manifest
            .files
            .iter()
            .map(|entry| RestoreCandidate {
                schema: RESTORE_CANDIDATE_SCHEMA.to_string(),
                source_abs: pathsafety::safe_join(&payload_root, &entry.rel_path),
                rel_path: entry.rel_path.clone(),
                dest_abs: pathsafety::safe_join(destination, &entry.rel_path),
                expected_hash: entry.hash_hex.clone(),
                size_bytes: entry.size_bytes,
            })
            .collect();
        Ok(RestorePlan {
            schema: RESTORE_PLAN_SCHEMA.to_string(),
            run_id: manifest.run_id.clone(),
            payload_root,
            destination: destination.to_path_buf(),
            source_run_status: manifest.run_status,
            candidates,
        })
    }
}

/// Detecting collisions at plan time avoids silent data loss on
/// case-insensitive destination filesystems.
fn reject_case_collisions(manifest: &Manifest) -> Result<()> {
    let mut seen: HashMap<String, &RelPath> = HashMap::new();
    for entry in &manifest.files {
        let folded = entry.rel_path.as_str().to_lowercase();
        if let Some(first) = seen.insert(folded, &entry.rel_path) {
            return Err(Error::CaseCollision {
                first: first.clone(),
                second: entry.rel_path.clone(),
            });
        }
    }
    Ok(())
}
