// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

//! Verify a built stage before promotion.
//!
//! Modes: `none` performs no checks and always succeeds with zero verified;
//! `size` compares each staged file's size to the manifest. The record
//! shape leaves room for a future `hash` mode. A failed verification
//! aborts the restore before promotion.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::Error;
use crate::jsonio::{self, JsonlWriter};
use crate::relpath::RelPath;
use crate::restore::plan::RestorePlan;
use crate::runid::RunId;
use crate::Result;

pub static STAGE_VERIFY_RECORD_SCHEMA: &str = "wcbt_stage_verify_record_v1";
pub static STAGE_VERIFY_SUMMARY_SCHEMA: &str = "wcbt_stage_verify_summary_v1";

pub static STAGE_VERIFY_RESULTS_FILENAME: &str = "stage_verify_results.jsonl";
pub static STAGE_VERIFY_SUMMARY_FILENAME: &str = "stage_verify_summary.json";

/// How much checking to do on a built stage before promoting it.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum StageVerifyMode {
    /// No checks; trust the stage copies.
    None,
    /// Compare staged sizes to the manifest.
    #[default]
    Size,
}

impl FromStr for StageVerifyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(StageVerifyMode::None),
            "size" => Ok(StageVerifyMode::Size),
            _ => Err(format!("unknown stage verify mode {s:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageVerifyRecord {
    pub schema: String,
    pub run_id: RunId,
    pub rel_path: RelPath,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageVerifySummary {
    pub schema: String,
    pub run_id: RunId,
    pub mode: String,
    pub status: String,
    pub verified: usize,
    pub failed: usize,
}

/// Check the stage per `mode`, writing both verify artifacts.
pub fn verify_stage(
    plan: &RestorePlan,
    stage_root: &Path,
    artifacts_dir: &Path,
    mode: StageVerifyMode,
) -> Result<()> {
    let mut results = JsonlWriter::create(&artifacts_dir.join(STAGE_VERIFY_RESULTS_FILENAME))?;
    let mut verified = 0;
    let mut failed = 0;

    if mode == StageVerifyMode::Size {
        for candidate in &plan.candidates {
            let staged_path = candidate.rel_path.below(stage_root);
            let outcome = match fs::metadata(&staged_path) {
                Ok(metadata) if metadata.len() == candidate.size_bytes => Ok(()),
                Ok(metadata) => Err(Error::SizeMismatch {
                    rel_path: candidate.rel_path.clone(),
                    expected: candidate.size_bytes,
                    actual: metadata.len(),
                }),
                Err(source) => Err(Error::Unreadable {
                    path: staged_path.clone(),
                    source,
                }),
            };
            match outcome {
                Ok(()) => {
                    verified += 1;
                    results.append(&record(plan, &candidate.rel_path, "ok", None))?;
                }
                Err(err) => {
                    warn!(rel_path = %candidate.rel_path, %err, "stage verification failed");
                    failed += 1;
                    results.append(&record(plan, &candidate.rel_path, "failed", Some(&err)))?;
                }
            }
        }
    }

    let summary = StageVerifySummary {
        schema: STAGE_VERIFY_SUMMARY_SCHEMA.to_string(),
        run_id: plan.run_id.clone(),
        mode: match mode {
            StageVerifyMode::None => "none",
            StageVerifyMode::Size => "size",
        }
        .to_string(),
        status: if failed == 0 { "success" } else { "failed" }.to_string(),
        verified,
        failed,
    };
    jsonio::write_json_atomic(&artifacts_dir.join(STAGE_VERIFY_SUMMARY_FILENAME), &summary)?;

    if failed > 0 {
        return Err(Error::StageVerifyFailed {
            failed,
            total: plan.candidates.len(),
        });
    }
    Ok(())
}

fn record(
    plan: &RestorePlan,
    rel_path: &RelPath,
    status: &str,
    error: Option<&Error>,
) -> StageVerifyRecord {
    StageVerifyRecord {
        schema: STAGE_VERIFY_RECORD_SCHEMA.to_string(),
        run_id: plan.run_id.clone(),
        rel_path: rel_path.clone(),
        status: status.to_string(),
        error: error.map(|e| format!("{}: {}", e.kind_name(), e)),
    }
}
