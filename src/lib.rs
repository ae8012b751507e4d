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

//! WCBT backup engine.
//!
//! Given a source tree and a destination root, the backup pipeline produces a
//! timestamped, self-describing run on disk. Given a run, the restore pipeline
//! reconstitutes the tree at a new location with add-only semantics, and the
//! verify pipeline checks an archived payload against its recorded hashes.

// Engine implementation modules.
pub mod backup;
pub mod cancel;
pub mod clock;
pub mod errors;
pub mod hasher;
pub mod jsonio;
pub mod journal;
pub mod lock;
pub mod manifest;
pub mod pathsafety;
pub mod plan;
pub mod relpath;
pub mod restore;
pub mod runid;
pub mod scan;
pub mod test_fixtures;
pub mod verify;

pub use crate::backup::{backup, BackupOptions, BackupStats};
pub use crate::cancel::CancelFlag;
pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::errors::Error;
pub use crate::hasher::{hash_file, FileDigest, HASH_ALGORITHM};
pub use crate::journal::{JournalRecord, OpOutcome};
pub use crate::lock::ProfileLock;
pub use crate::manifest::{list_runs, FileEntry, Manifest, RunStatus};
pub use crate::plan::{BackupPlan, PlanOp};
pub use crate::relpath::RelPath;
pub use crate::restore::{restore, RestoreOptions, RestoreStats, StageVerifyMode};
pub use crate::runid::RunId;
pub use crate::scan::SourceTree;
pub use crate::verify::{verify_run, VerifyCounts, VerifyOutcome, VerifyStatus};

pub type Result<T> = std::result::Result<T, Error>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

/// In-progress copies are written under this suffix, then renamed into place.
pub(crate) const PART_SUFFIX: &str = ".part";

/// Manifest file in the run directory.
pub static MANIFEST_FILENAME: &str = "manifest.json";

/// Plan file in the run directory, written by dry-run backups.
pub static PLAN_FILENAME: &str = "plan.json";

/// Append-only record of executed operations within a run.
pub static JOURNAL_FILENAME: &str = "execution_journal.jsonl";

/// The copied file tree inside a run.
pub static PAYLOAD_DIR: &str = "payload";

/// Lock file marking a destination as owned by a write-side pipeline.
pub static LOCK_FILENAME: &str = ".wcbt_lock";

/// Suffix appended to a restore destination to name its stage directory.
pub(crate) const STAGE_DIR_SUFFIX: &str = ".wcbt_stage";

/// Directory under a restored destination holding the restore artifacts.
pub(crate) const RESTORE_ARTIFACTS_DIR: &str = ".wcbt_restore";

/// Prefix for the sibling directory preserving a prior destination.
pub(crate) const RESTORE_PREVIOUS_PREFIX: &str = ".wcbt_restore_previous_";
