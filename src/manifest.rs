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

//! Run manifests: the authoritative record of what a run contains.
//!
//! Verification and restore consult the manifest, never the filesystem.
//! Reads validate the schema tag and the structural invariants before any
//! entry is acted on.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::errors::Error;
use crate::hasher::HASH_ALGORITHM;
use crate::jsonio;
use crate::relpath::RelPath;
use crate::runid::RunId;
use crate::{Result, MANIFEST_FILENAME};

pub static RUN_MANIFEST_SCHEMA: &str = "wcbt_run_manifest_v1";

/// One archived file, as recorded at backup time.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub rel_path: RelPath,
    pub size_bytes: u64,
    /// Lowercase hex digest of the content, per the manifest's algorithm.
    pub hash_hex: String,
    pub mtime_ns: u64,
}

/// Overall outcome of the backup run that wrote the manifest.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned operation copied.
    Ok,
    /// Some operations failed; `files` holds only the successful entries.
    Partial,
}

/// A run manifest (schema `wcbt_run_manifest_v1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub run_id: RunId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub hash_algorithm: String,
    pub run_status: RunStatus,
    /// Ordered lexicographically by `rel_path` (forward-slash form).
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// Check schema tag and structural invariants.
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.schema != RUN_MANIFEST_SCHEMA {
            return Err(Error::SchemaUnsupported {
                schema: self.schema.clone(),
                path: path.to_path_buf(),
            });
        }
        if self.hash_algorithm != HASH_ALGORITHM {
            return Err(Error::ManifestInvalid {
                path: path.to_path_buf(),
                reason: format!("unsupported hash_algorithm {:?}", self.hash_algorithm),
            });
        }
        for pair in self.files.windows(2) {
            if pair[0].rel_path >= pair[1].rel_path {
                return Err(Error::ManifestInvalid {
                    path: path.to_path_buf(),
                    reason: format!(
                        "files out of order: {:?} then {:?}",
                        pair[0].rel_path, pair[1].rel_path
                    ),
                });
            }
        }
        Ok(())
    }

    /// Write atomically in canonical form. This is the commit point of a
    /// backup run.
    pub fn write(&self, path: &Path) -> Result<()> {
        self.validate(path)?;
        jsonio::write_json_atomic(path, self)
    }

    /// Read and validate a manifest.
    ///
    /// A missing file is reported as `incomplete_run`: the run directory
    /// exists but its contract does not.
    pub fn read(path: &Path) -> Result<Manifest> {
        let manifest: Manifest = match jsonio::read_json(path) {
            Ok(m) => m,
            Err(Error::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::IncompleteRun {
                    path: path.parent().unwrap_or(path).to_path_buf(),
                });
            }
            Err(Error::Json { source }) => {
                return Err(Error::ManifestInvalid {
                    path: path.to_path_buf(),
                    reason: source.to_string(),
                });
            }
            Err(err) => return Err(err),
        };
        manifest.validate(path)?;
        Ok(manifest)
    }
}

/// Path of the manifest inside a run directory.
pub fn manifest_path(run_dir: &Path) -> PathBuf {
    run_dir.join(MANIFEST_FILENAME)
}

/// List run ids under a destination root, ascending.
///
/// Entries that do not parse as run ids (locks, stray files) are ignored.
/// A missing destination is an empty list, not an error.
pub fn list_runs(destination_root: &Path) -> Result<Vec<RunId>> {
    let entries = match fs::read_dir(destination_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(Error::Io {
                path: destination_root.to_path_buf(),
                source,
            })
        }
    };
    let mut run_ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: destination_root.to_path_buf(),
            source,
        })?;
        if let Some(name) = entry.file_name().to_str() {
            if let Ok(run_id) = RunId::from_str(name) {
                run_ids.push(run_id);
            }
        }
    }
    run_ids.sort();
    Ok(run_ids)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use crate::test_fixtures::TreeFixture;

    use super::*;

    fn sample_manifest() -> Manifest {
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
                    hash_hex: "00".repeat(32),
                    mtime_ns: 1,
                },
                FileEntry {
                    rel_path: RelPath::new("sub/b.bin").unwrap(),
                    size_bytes: 3,
                    hash_hex: "11".repeat(32),
                    mtime_ns: 2,
                },
            ],
        }
    }

    #[test]
    fn write_read_round_trip() {
        let tf = TreeFixture::new();
        let path = tf.path().join(MANIFEST_FILENAME);
        let manifest = sample_manifest();
        manifest.write(&path).unwrap();
        let back = Manifest::read(&path).unwrap();
        assert_eq!(back.run_id, manifest.run_id);
        assert_eq!(back.files, manifest.files);
        assert_eq!(back.run_status, RunStatus::Ok);
    }

    #[test]
    fn unknown_schema_is_rejected() {
        let tf = TreeFixture::new();
        let path = tf.path().join(MANIFEST_FILENAME);
        let mut manifest = sample_manifest();
        manifest.schema = "wcbt_run_manifest_v99".to_string();
        jsonio::write_json_atomic(&path, &manifest).unwrap();
        let err = Manifest::read(&path).unwrap_err();
        assert!(matches!(err, Error::SchemaUnsupported { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn out_of_order_files_are_rejected() {
        let tf = TreeFixture::new();
        let path = tf.path().join(MANIFEST_FILENAME);
        let mut manifest = sample_manifest();
        manifest.files.reverse();
        jsonio::write_json_atomic(&path, &manifest).unwrap();
        assert!(matches!(
            Manifest::read(&path),
            Err(Error::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn traversal_in_rel_path_is_rejected() {
        let tf = TreeFixture::new();
        let path = tf.path().join(MANIFEST_FILENAME);
        let text = std::fs::read_to_string({
            let p = tf.path().join("good.json");
            sample_manifest().write(&p).unwrap();
            p
        })
        .unwrap();
        let tampered = text.replace("a.txt", "../a.txt");
        std::fs::write(&path, tampered).unwrap();
        assert!(matches!(
            Manifest::read(&path),
            Err(Error::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn missing_manifest_is_incomplete_run() {
        let tf = TreeFixture::new();
        let err = Manifest::read(&tf.path().join(MANIFEST_FILENAME)).unwrap_err();
        assert!(matches!(err, Error::IncompleteRun { .. }));
    }

    #[test]
    fn list_runs_sorted_and_filtered() {
        let tf = TreeFixture::new();
        tf.create_dir("2025-02-01T00-00-00Z");
        tf.create_dir("2025-01-01T12-00-00Z");
        tf.create_dir("not-a-run");
        tf.create_file(".wcbt_lock");
        let runs = list_runs(tf.path()).unwrap();
        let names: Vec<&str> = runs.iter().map(|r| r.as_str()).collect();
        assert_eq!(names, ["2025-01-01T12-00-00Z", "2025-02-01T00-00-00Z"]);
    }

    #[test]
    fn list_runs_missing_destination_is_empty() {
        let tf = TreeFixture::new();
        assert!(list_runs(&tf.path().join("nowhere")).unwrap().is_empty());
    }
}
