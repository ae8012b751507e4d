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

//! Errors emitted by the engine, and their mapping to stable exit codes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::relpath::RelPath;
use crate::runid::RunId;

/// Stable exit codes shared by the engine and the CLI.
pub mod exit_code {
    pub const OK: u8 = 0;
    pub const USAGE: u8 = 2;
    pub const LOCKED: u8 = 3;
    pub const BACKUP_PARTIAL: u8 = 4;
    pub const RESTORE_CONFLICT: u8 = 5;
    pub const VERIFY_FAILED: u8 = 6;
    pub const FATAL: u8 = 7;
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsafe path: {path:?} is not within {base:?}")]
    UnsafePath { path: PathBuf, base: PathBuf },

    #[error("stage {stage:?} and destination {destination:?} are on different filesystems")]
    CrossDeviceStage {
        stage: PathBuf,
        destination: PathBuf,
    },

    #[error("case-insensitive collision between {first:?} and {second:?}")]
    CaseCollision { first: RelPath, second: RelPath },

    #[error("locked by another process: {path:?}{}", holder_suffix(.holder))]
    Locked {
        path: PathBuf,
        holder: Option<String>,
    },

    #[error("unreadable file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("hash mismatch on {path:?}: expected {expected}, observed {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("size mismatch on {rel_path}: expected {expected} bytes, observed {actual}")]
    SizeMismatch {
        rel_path: RelPath,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported schema {schema:?} in {path:?}")]
    SchemaUnsupported { schema: String, path: PathBuf },

    #[error("invalid manifest {path:?}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("incomplete run: no readable manifest under {path:?}")]
    IncompleteRun { path: PathBuf },

    #[error("cancelled")]
    Cancelled,

    #[error("promotion of {stage:?} to {destination:?} failed: {source}")]
    PromotionFailed {
        stage: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported source entry (not a regular file): {path:?}")]
    UnsupportedEntry { path: PathBuf },

    #[error("run {run_id} already exists under {destination:?}")]
    RunExists {
        run_id: RunId,
        destination: PathBuf,
    },

    #[error("a stage for run {run_id} already exists at {path:?}; inspect and remove it first")]
    StageExists { run_id: RunId, path: PathBuf },

    #[error("stage verification failed for {failed} of {total} files")]
    StageVerifyFailed { failed: usize, total: usize },

    #[error("invalid run id: {value:?}")]
    InvalidRunId { value: String },

    #[error("invalid relative path: {value:?}")]
    InvalidRelPath { value: String },

    #[error("JSON serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(h) => format!(" ({h})"),
        None => String::new(),
    }
}

impl Error {
    /// The stable exit code a failed pipeline reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Locked { .. } => exit_code::LOCKED,
            Error::CaseCollision { .. }
            | Error::CrossDeviceStage { .. }
            | Error::StageExists { .. } => exit_code::RESTORE_CONFLICT,
            Error::SchemaUnsupported { .. } | Error::ManifestInvalid { .. } => exit_code::USAGE,
            _ => exit_code::FATAL,
        }
    }

    /// The short taxonomy name recorded in journals and artifacts.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::UnsafePath { .. } => "unsafe_path",
            Error::CrossDeviceStage { .. } => "cross_device_stage",
            Error::CaseCollision { .. } => "case_collision",
            Error::Locked { .. } => "locked",
            Error::Unreadable { .. } => "unreadable",
            Error::HashMismatch { .. } => "hash_mismatch",
            Error::SizeMismatch { .. } => "size_mismatch",
            Error::SchemaUnsupported { .. } => "schema_unsupported",
            Error::ManifestInvalid { .. } => "manifest_invalid",
            Error::IncompleteRun { .. } => "incomplete_run",
            Error::Cancelled => "cancelled",
            Error::PromotionFailed { .. } => "promotion_failed",
            Error::UnsupportedEntry { .. } => "unsupported_entry",
            _ => "io_error",
        }
    }
}
