// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

//! The execution journal: one line per executed operation.
//!
//! The journal is append-only and flushed line by line, so after any crash
//! it is the authoritative record of what actually happened.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::jsonio::{self, JsonlWriter};
use crate::relpath::RelPath;
use crate::runid::RunId;
use crate::Result;

pub static JOURNAL_SCHEMA: &str = "wcbt_journal_record_v1";

/// Outcome of one executed operation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpOutcome {
    Copied,
    SkippedDryRun,
    Failed,
}

/// One line of the execution journal (schema `wcbt_journal_record_v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub schema: String,
    pub run_id: RunId,
    pub rel_path: RelPath,
    pub outcome: OpOutcome,
    /// Error kind and detail, for failed outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_size: Option<u64>,
}

impl JournalRecord {
    pub fn copied(run_id: &RunId, rel_path: &RelPath, hash: &str, size: u64) -> JournalRecord {
        JournalRecord {
            schema: JOURNAL_SCHEMA.to_string(),
            run_id: run_id.clone(),
            rel_path: rel_path.clone(),
            outcome: OpOutcome::Copied,
            error: None,
            observed_hash: Some(hash.to_string()),
            observed_size: Some(size),
        }
    }

    pub fn skipped_dry_run(run_id: &RunId, rel_path: &RelPath) -> JournalRecord {
        JournalRecord {
            schema: JOURNAL_SCHEMA.to_string(),
            run_id: run_id.clone(),
            rel_path: rel_path.clone(),
            outcome: OpOutcome::SkippedDryRun,
            error: None,
            observed_hash: None,
            observed_size: None,
        }
    }

    /// A failed op, recording the taxonomy kind and human detail.
    pub fn failed(run_id: &RunId, rel_path: &RelPath, error: &crate::Error) -> JournalRecord {
        JournalRecord {
            schema: JOURNAL_SCHEMA.to_string(),
            run_id: run_id.clone(),
            rel_path: rel_path.clone(),
            outcome: OpOutcome::Failed,
            error: Some(format!("{}: {}", error.kind_name(), error)),
            observed_hash: None,
            observed_size: None,
        }
    }
}

/// Writes journal records in execution order.
pub struct Journal {
    writer: JsonlWriter,
}

impl Journal {
    pub fn create(path: &Path) -> Result<Journal> {
        Ok(Journal {
            writer: JsonlWriter::create(path)?,
        })
    }

    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        self.writer.append(record)
    }
}

pub fn read_journal(path: &Path) -> Result<Vec<JournalRecord>> {
    jsonio::read_jsonl(path)
}
