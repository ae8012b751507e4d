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

//! Validate an archived payload against the expected records in its
//! manifest.
//!
//! Every manifest entry is classified, in manifest order, and all three
//! artifacts are written even when problems were found: the report exists
//! precisely so failures are inspectable. The artifact set is assembled in
//! a temporary sibling directory and published with a single rename, so a
//! crashed verify leaves a complete set (previous or new) or none, never a
//! torn mix.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::Error;
use crate::hasher;
use crate::jsonio;
use crate::manifest::{manifest_path, FileEntry, Manifest};
use crate::pathsafety;
use crate::relpath::RelPath;
use crate::runid::RunId;
use crate::{Result, PAYLOAD_DIR};

pub static VERIFY_RECORD_SCHEMA: &str = "wcbt_verify_record_v1";
pub static VERIFY_REPORT_SCHEMA: &str = "wcbt_verify_report_v1";

/// Directory under the run holding the verify artifact set. The whole
/// directory is replaced in one rename.
pub static VERIFY_ARTIFACTS_DIR: &str = "verify";

pub static VERIFY_REPORT_JSONL_FILENAME: &str = "verify_report.jsonl";
pub static VERIFY_REPORT_JSON_FILENAME: &str = "verify_report.json";
pub static VERIFY_SUMMARY_FILENAME: &str = "verify_summary.txt";

/// Where a run's verify artifacts live.
pub fn verify_artifacts_dir(run_dir: &Path) -> std::path::PathBuf {
    run_dir.join(VERIFY_ARTIFACTS_DIR)
}

/// Classification of one manifest entry against the payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Ok,
    Missing,
    Unreadable,
    HashMismatch,
}

/// One line of `verify_report.jsonl` (schema `wcbt_verify_record_v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRecord {
    pub schema: String,
    pub run_id: RunId,
    pub path: RelPath,
    pub status: VerifyStatus,
}

/// Counts by status, in a fixed order.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VerifyCounts {
    pub ok: usize,
    pub missing: usize,
    pub unreadable: usize,
    pub hash_mismatch: usize,
}

impl VerifyCounts {
    fn count(&mut self, status: VerifyStatus) {
        match status {
            VerifyStatus::Ok => self.ok += 1,
            VerifyStatus::Missing => self.missing += 1,
            VerifyStatus::Unreadable => self.unreadable += 1,
            VerifyStatus::HashMismatch => self.hash_mismatch += 1,
        }
    }
}

/// `verify_report.json` (schema `wcbt_verify_report_v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub schema: String,
    pub run_id: RunId,
    pub algorithm: String,
    pub counts: VerifyCounts,
    pub total: usize,
}

/// Aggregate outcome returned to the caller.
#[derive(Debug)]
pub struct VerifyOutcome {
    pub run_id: RunId,
    pub counts: VerifyCounts,
    pub total: usize,
}

impl VerifyOutcome {
    pub fn all_ok(&self) -> bool {
        self.counts.ok == self.total
    }

    pub fn exit_code(&self) -> u8 {
        if self.all_ok() {
            crate::errors::exit_code::OK
        } else {
            crate::errors::exit_code::VERIFY_FAILED
        }
    }
}

/// Verify the run at `run_dir` and write the three report artifacts under
/// its `verify/` directory.
///
/// Per-file problems are recorded, not raised; the result is `Err` only for
/// faults that prevent verification itself (no manifest, artifact write
/// failure).
pub fn verify_run(run_dir: &Path) -> Result<VerifyOutcome> {
    let manifest = Manifest::read(&manifest_path(run_dir))?;
    let payload_root = run_dir.join(PAYLOAD_DIR);
    info!(run_id = %manifest.run_id, files = manifest.files.len(), "verifying run");

    let mut records = Vec::with_capacity(manifest.files.len());
    let mut counts = VerifyCounts::default();
    for entry in &manifest.files {
        let status = classify(&payload_root, entry);
        if status != VerifyStatus::Ok {
            warn!(path = %entry.rel_path, ?status, "verification problem");
        }
        counts.count(status);
        records.push(VerifyRecord {
            schema: VERIFY_RECORD_SCHEMA.to_string(),
            run_id: manifest.run_id.clone(),
            path: entry.rel_path.clone(),
            status,
        });
    }

    let report = VerifyReport {
        schema: VERIFY_REPORT_SCHEMA.to_string(),
        run_id: manifest.run_id.clone(),
        algorithm: manifest.hash_algorithm.clone(),
        counts,
        total: records.len(),
    };
    write_artifacts(run_dir, &report, &records)?;

    Ok(VerifyOutcome {
        run_id: manifest.run_id,
        counts,
        total: report.total,
    })
}

fn classify(payload_root: &Path, entry: &FileEntry) -> VerifyStatus {
    let path = pathsafety::safe_join(payload_root, &entry.rel_path);
    match fs::symlink_metadata(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return VerifyStatus::Missing,
        Err(_) => return VerifyStatus::Unreadable,
        Ok(metadata) if !metadata.is_file() => return VerifyStatus::Unreadable,
        Ok(_) => {}
    }
    match hasher::hash_file(&path) {
        Err(_) => VerifyStatus::Unreadable,
        Ok(digest) => {
            if digest.hex == entry.hash_hex && digest.size_bytes == entry.size_bytes {
                VerifyStatus::Ok
            } else {
                VerifyStatus::HashMismatch
            }
        }
    }
}

fn write_artifacts(run_dir: &Path, report: &VerifyReport, records: &[VerifyRecord]) -> Result<()> {
    // All three bodies are built first, then land in a temporary sibling
    // directory. The only mutation visible under `verify/` is the final
    // directory rename, so readers see a complete set or none.
    let mut jsonl = String::new();
    for record in records {
        jsonl.push_str(&jsonio::to_canonical_json(record)?);
    }
    let json = jsonio::to_canonical_json(report)?;
    let summary = render_summary(report);

    let final_dir = verify_artifacts_dir(run_dir);
    let tmp_dir = run_dir.join(format!("tmp.verify.{}", std::process::id()));
    let result = fill_and_swap(&tmp_dir, &final_dir, &jsonl, &json, &summary);
    if result.is_err() {
        let _ = fs::remove_dir_all(&tmp_dir);
    }
    result
}

fn fill_and_swap(
    tmp_dir: &Path,
    final_dir: &Path,
    jsonl: &str,
    json: &str,
    summary: &str,
) -> Result<()> {
    if tmp_dir.exists() {
        // Leftover from a crashed verify of this same run.
        fs::remove_dir_all(tmp_dir).map_err(|source| Error::Io {
            path: tmp_dir.to_path_buf(),
            source,
        })?;
    }
    fs::create_dir(tmp_dir).map_err(|source| Error::Io {
        path: tmp_dir.to_path_buf(),
        source,
    })?;
    for (name, body) in [
        (VERIFY_REPORT_JSONL_FILENAME, jsonl),
        (VERIFY_REPORT_JSON_FILENAME, json),
        (VERIFY_SUMMARY_FILENAME, summary),
    ] {
        let path = tmp_dir.join(name);
        fs::write(&path, body).map_err(|source| Error::Io { path, source })?;
    }
    if final_dir.exists() {
        // A previous, engine-owned artifact set; between this removal and
        // the rename below the state is "none", which is still whole.
        fs::remove_dir_all(final_dir).map_err(|source| Error::Io {
            path: final_dir.to_path_buf(),
            source,
        })?;
    }
    fs::rename(tmp_dir, final_dir).map_err(|source| Error::Io {
        path: final_dir.to_path_buf(),
        source,
    })
}

/// Fixed-width, deterministic text summary.
fn render_summary(report: &VerifyReport) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "WCBT verify report");
    let _ = writeln!(s, "run id        : {}", report.run_id);
    let _ = writeln!(s, "algorithm     : {}", report.algorithm);
    let _ = writeln!(s, "total         : {}", report.total);
    let _ = writeln!(s);
    let _ = writeln!(s, "status counts:");
    let _ = writeln!(s, "  ok           : {}", report.counts.ok);
    let _ = writeln!(s, "  missing      : {}", report.counts.missing);
    let _ = writeln!(s, "  unreadable   : {}", report.counts.unreadable);
    let _ = writeln!(s, "  hash_mismatch: {}", report.counts.hash_mismatch);
    s
}
