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

//! Copy restore candidates into an isolated stage root.
//!
//! The first per-op fault aborts the build, after that op's record has been
//! flushed; the stage is retained on failure for inspection, and no
//! promotion is attempted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::errors::Error;
use crate::hasher;
use crate::jsonio::{self, JsonlWriter};
use crate::journal::OpOutcome;
use crate::manifest::RunStatus;
use crate::pathsafety;
use crate::relpath::RelPath;
use crate::restore::plan::{RestoreCandidate, RestorePlan};
use crate::runid::RunId;
use crate::{Result, PART_SUFFIX};

pub static STAGE_COPY_RECORD_SCHEMA: &str = "wcbt_stage_copy_record_v1";
pub static STAGE_COPY_SUMMARY_SCHEMA: &str = "wcbt_stage_copy_summary_v1";

pub static STAGE_COPY_RESULTS_FILENAME: &str = "stage_copy_results.jsonl";
pub static STAGE_COPY_SUMMARY_FILENAME: &str = "stage_copy_summary.json";

/// One line of `stage_copy_results.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCopyRecord {
    pub schema: String,
    pub run_id: RunId,
    pub rel_path: RelPath,
    pub outcome: OpOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `stage_copy_summary.json`: overall status and counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCopySummary {
    pub schema: String,
    pub run_id: RunId,
    pub status: String,
    pub copied: usize,
    pub skipped_dry_run: usize,
    pub failed: usize,
    pub total: usize,
    pub source_run_status: RunStatus,
}

/// Result of a completed stage build.
#[derive(Debug)]
pub struct StageBuild {
    pub staged_files: usize,
}

/// Copy every candidate into `stage_root`, writing result artifacts into
/// `artifacts_dir`.
///
/// In dry-run mode nothing is copied; each candidate gets a
/// `skipped_dry_run` record.
pub fn build_stage(
    plan: &RestorePlan,
    stage_root: &Path,
    artifacts_dir: &Path,
    dry_run: bool,
    cancel: &CancelFlag,
) -> Result<StageBuild> {
    let mut results = JsonlWriter::create(&artifacts_dir.join(STAGE_COPY_RESULTS_FILENAME))?;
    let mut copied = 0;
    let mut skipped = 0;
    let mut failure: Option<Error> = None;

    for candidate in &plan.candidates {
        if let Err(err) = cancel.check() {
            // Cancellation is recorded like any other abort, so the summary
            // still matches the results on disk.
            results.append(&record(plan, candidate, OpOutcome::Failed, Some(&err)))?;
            failure = Some(err);
            break;
        }
        if dry_run {
            skipped += 1;
            results.append(&record(plan, candidate, OpOutcome::SkippedDryRun, None))?;
            continue;
        }
        match stage_one(candidate, &plan.payload_root, stage_root, cancel) {
            Ok(()) => {
                copied += 1;
                results.append(&record(plan, candidate, OpOutcome::Copied, None))?;
            }
            Err(err) => {
                warn!(rel_path = %candidate.rel_path, %err, "stage copy failed");
                results.append(&record(plan, candidate, OpOutcome::Failed, Some(&err)))?;
                failure = Some(err);
                break;
            }
        }
    }

    let failed = usize::from(failure.is_some());
    let summary = StageCopySummary {
        schema: STAGE_COPY_SUMMARY_SCHEMA.to_string(),
        run_id: plan.run_id.clone(),
        status: if failure.is_some() { "failed" } else { "success" }.to_string(),
        copied,
        skipped_dry_run: skipped,
        failed,
        total: plan.candidates.len(),
        source_run_status: plan.source_run_status,
    };
    jsonio::write_json_atomic(&artifacts_dir.join(STAGE_COPY_SUMMARY_FILENAME), &summary)?;

    match failure {
        // The stage is retained for inspection; the caller must not promote.
        Some(err) => Err(err),
        None => Ok(StageBuild {
            staged_files: copied + skipped,
        }),
    }
}

fn record(
    plan: &RestorePlan,
    candidate: &RestoreCandidate,
    outcome: OpOutcome,
    error: Option<&Error>,
) -> StageCopyRecord {
    StageCopyRecord {
        schema: STAGE_COPY_RECORD_SCHEMA.to_string(),
        run_id: plan.run_id.clone(),
        rel_path: candidate.rel_path.clone(),
        outcome,
        error: error.map(|e| format!("{}: {}", e.kind_name(), e)),
    }
}

/// Copy one candidate to `stage_root/<rel_path>`, `.part` first.
///
/// The copy runs in bounded chunks with the cancel flag checked between
/// them, so a large in-flight file can be interrupted; the abandoned
/// `.part` is discarded.
fn stage_one(
    candidate: &RestoreCandidate,
    payload_root: &Path,
    stage_root: &Path,
    cancel: &CancelFlag,
) -> Result<()> {
    debug!(rel_path = %candidate.rel_path, "stage");
    // A payload entry must still be a regular file that resolves inside the
    // payload; anything else means the run was tampered with after it was
    // written.
    let metadata =
        fs::symlink_metadata(&candidate.source_abs).map_err(|source| Error::Unreadable {
            path: candidate.source_abs.clone(),
            source,
        })?;
    if !metadata.is_file() {
        return Err(Error::UnsupportedEntry {
            path: candidate.source_abs.clone(),
        });
    }
    pathsafety::ensure_within(payload_root, &candidate.source_abs)?;

    let staged_path = candidate.rel_path.below(stage_root);
    let parent = staged_path.parent().expect("staged paths have parents");
    fs::create_dir_all(parent).map_err(|source| Error::Io {
        path: parent.to_path_buf(),
        source,
    })?;

    let part_path = part_path(&staged_path);
    let mut part = fs::File::create(&part_path).map_err(|source| Error::Io {
        path: part_path.clone(),
        source,
    })?;
    match hasher::copy_and_hash(&candidate.source_abs, &mut part, cancel) {
        Ok(_digest) => {
            drop(part);
            fs::rename(&part_path, &staged_path).map_err(|source| Error::Io {
                path: staged_path.clone(),
                source,
            })
        }
        Err(err) => {
            drop(part);
            remove_part(&part_path);
            Err(err)
        }
    }
}

fn part_path(staged_path: &Path) -> PathBuf {
    let mut name = staged_path
        .file_name()
        .expect("staged paths are files")
        .to_owned();
    name.push(PART_SUFFIX);
    staged_path.with_file_name(name)
}

fn remove_part(part_path: &Path) {
    if let Err(err) = fs::remove_file(part_path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(?part_path, %err, "failed to remove part file");
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use crate::jsonio::read_jsonl;
    use crate::manifest::{FileEntry, Manifest, RUN_MANIFEST_SCHEMA};
    use crate::hasher::HASH_ALGORITHM;
    use crate::test_fixtures::TreeFixture;

    use super::*;

    /// A fake run directory with a payload and matching manifest.
    fn fixture_run(tf: &TreeFixture) -> Manifest {
        tf.create_dir("run/payload/sub");
        tf.create_file_with_contents("run/payload/a.txt", b"hello\n");
        tf.create_file_with_contents("run/payload/sub/b.bin", &[0, 1, 2]);
        Manifest {
            schema: RUN_MANIFEST_SCHEMA.to_string(),
            run_id: "2025-01-01T12-00-00Z".parse().unwrap(),
            created_at: datetime!(2025-01-01 12:00:00 UTC),
            source_root: PathBuf::from("/src"),
            destination_root: PathBuf::from("/dest"),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            run_status: RunStatus::Ok,
            files: vec![
                FileEntry {
                    rel_path: RelPath::new("a.txt").unwrap(),
                    size_bytes: 6,
                    hash_hex: "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
                        .to_string(),
                    mtime_ns: 0,
                },
                FileEntry {
                    rel_path: RelPath::new("sub/b.bin").unwrap(),
                    size_bytes: 3,
                    hash_hex: "ae4b3280e56e2faf83f414a6e3dabe9d5fbe18976544c05fed121accb85b53fc"
                        .to_string(),
                    mtime_ns: 0,
                },
            ],
        }
    }

    fn build_fixture_plan(tf: &TreeFixture) -> RestorePlan {
        let manifest = fixture_run(tf);
        RestorePlan::build(&manifest, &tf.path().join("run"), &tf.path().join("out")).unwrap()
    }

    #[test]
    fn stage_copies_all_candidates() {
        let tf = TreeFixture::new();
        let plan = build_fixture_plan(&tf);
        tf.create_dir("stage/stage_root");
        let stage_root = tf.path().join("stage/stage_root");
        let artifacts = tf.path().join("stage");
        let built =
            build_stage(&plan, &stage_root, &artifacts, false, &CancelFlag::new()).unwrap();
        assert_eq!(built.staged_files, 2);
        assert_eq!(
            std::fs::read(stage_root.join("a.txt")).unwrap(),
            b"hello\n"
        );
        assert_eq!(
            std::fs::read(stage_root.join("sub/b.bin")).unwrap(),
            [0, 1, 2]
        );

        let records: Vec<StageCopyRecord> =
            read_jsonl(&artifacts.join(STAGE_COPY_RESULTS_FILENAME)).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.outcome == OpOutcome::Copied));
        let summary: StageCopySummary =
            jsonio::read_json(&artifacts.join(STAGE_COPY_SUMMARY_FILENAME)).unwrap();
        assert_eq!(summary.status, "success");
        assert_eq!(summary.copied, 2);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn dry_run_copies_nothing() {
        let tf = TreeFixture::new();
        let plan = build_fixture_plan(&tf);
        tf.create_dir("stage/stage_root");
        let stage_root = tf.path().join("stage/stage_root");
        let artifacts = tf.path().join("stage");
        build_stage(&plan, &stage_root, &artifacts, true, &CancelFlag::new()).unwrap();
        assert!(!stage_root.join("a.txt").exists());
        let records: Vec<StageCopyRecord> =
            read_jsonl(&artifacts.join(STAGE_COPY_RESULTS_FILENAME)).unwrap();
        assert!(records
            .iter()
            .all(|r| r.outcome == OpOutcome::SkippedDryRun));
    }

    #[test]
    fn first_failure_aborts_after_flushing_its_record() {
        let tf = TreeFixture::new();
        let plan = build_fixture_plan(&tf);
        // Remove the first payload file so its copy fails.
        std::fs::remove_file(tf.path().join("run/payload/a.txt")).unwrap();
        tf.create_dir("stage/stage_root");
        let stage_root = tf.path().join("stage/stage_root");
        let artifacts = tf.path().join("stage");
        let err =
            build_stage(&plan, &stage_root, &artifacts, false, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, Error::Unreadable { .. }));

        let records: Vec<StageCopyRecord> =
            read_jsonl(&artifacts.join(STAGE_COPY_RESULTS_FILENAME)).unwrap();
        // Aborted at the first candidate; the second was never attempted.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, OpOutcome::Failed);
        let summary: StageCopySummary =
            jsonio::read_json(&artifacts.join(STAGE_COPY_SUMMARY_FILENAME)).unwrap();
        assert_eq!(summary.status, "failed");
        // The partially built stage is retained.
        assert!(stage_root.is_dir());
    }

    #[test]
    fn cancellation_is_recorded_and_leaves_no_part_files() {
        let tf = TreeFixture::new();
        let plan = build_fixture_plan(&tf);
        tf.create_dir("stage/stage_root");
        let stage_root = tf.path().join("stage/stage_root");
        let artifacts = tf.path().join("stage");
        let cancel = CancelFlag::new();
        cancel.request();
        let err = build_stage(&plan, &stage_root, &artifacts, false, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let records: Vec<StageCopyRecord> =
            read_jsonl(&artifacts.join(STAGE_COPY_RESULTS_FILENAME)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, OpOutcome::Failed);
        assert!(records[0].error.as_deref().unwrap().starts_with("cancelled"));
        let summary: StageCopySummary =
            jsonio::read_json(&artifacts.join(STAGE_COPY_SUMMARY_FILENAME)).unwrap();
        assert_eq!(summary.status, "failed");
        assert!(!stage_root.join("a.txt.part").exists());
        assert!(!stage_root.join("a.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn payload_directory_symlink_escape_is_rejected() {
        let tf = TreeFixture::new();
        let plan = build_fixture_plan(&tf);
        // Replace payload/sub with a symlink to a directory outside the run.
        std::fs::remove_dir_all(tf.path().join("run/payload/sub")).unwrap();
        tf.create_dir("elsewhere");
        tf.create_file_with_contents("elsewhere/b.bin", &[0, 1, 2]);
        tf.create_symlink("run/payload/sub", "../../elsewhere");
        tf.create_dir("stage/stage_root");
        let err = build_stage(
            &plan,
            &tf.path().join("stage/stage_root"),
            &tf.path().join("stage"),
            false,
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsafePath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn tampered_payload_symlink_is_rejected() {
        let tf = TreeFixture::new();
        let plan = build_fixture_plan(&tf);
        std::fs::remove_file(tf.path().join("run/payload/a.txt")).unwrap();
        tf.create_file_with_contents("secret", b"outside\n");
        tf.create_symlink("run/payload/a.txt", "../../secret");
        tf.create_dir("stage/stage_root");
        let err = build_stage(
            &plan,
            &tf.path().join("stage/stage_root"),
            &tf.path().join("stage"),
            false,
            &CancelFlag::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedEntry { .. }));
    }
}
