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

//! Backup plans: the ordered copy operations a run will execute.
//!
//! Hashing happens here, in the plan phase, so the plan itself is
//! content-addressed: dry runs are meaningful, execution can detect files
//! that changed under it, and verification never needs to re-read the
//! source.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::hasher::{self, HASH_ALGORITHM};
use crate::jsonio;
use crate::pathsafety;
use crate::relpath::RelPath;
use crate::runid::RunId;
use crate::scan::SourceTree;
use crate::{Result, PAYLOAD_DIR};

pub static BACKUP_PLAN_SCHEMA: &str = "wcbt_backup_plan_v1";

/// An intended copy of one source file into the run payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOp {
    pub rel_path: RelPath,
    pub source_abs: PathBuf,
    pub dest_abs: PathBuf,
    pub size_bytes: u64,
    /// Content hash computed at plan time; execution re-hashes and compares.
    pub expected_hash: String,
    pub mtime_ns: u64,
}

/// An ordered backup plan (schema `wcbt_backup_plan_v1`).
///
/// Op order equals manifest order: lexicographic on `rel_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPlan {
    pub schema: String,
    pub run_id: RunId,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub hash_algorithm: String,
    pub ops: Vec<PlanOp>,
}

impl BackupPlan {
    /// Scan and hash `source`, producing the plan for run `run_id`.
    ///
    /// Fails on the first unsupported or unreadable source entry: a plan
    /// must describe the whole tree or nothing.
    pub fn build(source: &SourceTree, destination_root: &Path, run_id: &RunId) -> Result<BackupPlan> {
        let payload_root = destination_root.join(run_id).join(PAYLOAD_DIR);
        let mut ops = Vec::new();
        for entry in source.iter_files() {
            let entry = entry?;
            let digest = hasher::hash_file(&entry.abs)?;
            ops.push(PlanOp {
                dest_abs: pathsafety::safe_join(&payload_root, &entry.rel),
                rel_path: entry.rel,
                source_abs: entry.abs,
                size_bytes: digest.size_bytes,
                expected_hash: digest.hex,
                mtime_ns: entry.mtime_ns,
            });
        }
        ops.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        debug!(files = ops.len(), run_id = %run_id, "backup plan built");
        Ok(BackupPlan {
            schema: BACKUP_PLAN_SCHEMA.to_string(),
            run_id: run_id.clone(),
            source_root: source.root().to_path_buf(),
            destination_root: destination_root.to_path_buf(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            ops,
        })
    }

    /// Write the plan artifact (dry-run runs only).
    pub fn write(&self, path: &Path) -> Result<()> {
        jsonio::write_json_atomic(path, self)
    }
}
