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

//! Find source files within a backup source directory.
//!
//! The scan walks depth-first with children sorted by name and yields
//! regular files only, including hidden files. Symlinks are not followed:
//! any non-regular entry fails the scan with `unsupported_entry`. The scan
//! is lazy and restartable; plan building imposes the final ordering.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::errors::Error;
use crate::pathsafety;
use crate::relpath::RelPath;
use crate::Result;

/// A source directory tree to be backed up.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
}

impl SourceTree {
    /// Open a source tree, validating that it exists and is a safe source.
    pub fn open(path: &Path) -> Result<SourceTree> {
        let root = pathsafety::validate_source(path)?;
        Ok(SourceTree { root })
    }

    /// The resolved absolute root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Iterate regular files under the root.
    ///
    /// Each call starts a fresh walk.
    pub fn iter_files(&self) -> ScanIter {
        let mut dir_deque = VecDeque::new();
        dir_deque.push_back((self.root.clone(), None));
        ScanIter {
            dir_deque,
            entry_deque: VecDeque::new(),
        }
    }
}

/// One regular file found by the scan.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Absolute path through which the file can be opened.
    pub abs: PathBuf,
    /// Path relative to the tree root, forward-slash form.
    pub rel: RelPath,
    pub size_bytes: u64,
    pub mtime_ns: u64,
}

/// Recursive iterator over the files of a source directory.
#[derive(Debug)]
pub struct ScanIter {
    /// Directories yet to be visited, with their rel prefix (None for the root).
    dir_deque: VecDeque<(PathBuf, Option<RelPath>)>,

    /// Results for entries of the current directory, yet to be returned.
    entry_deque: VecDeque<Result<ScanEntry>>,
}

impl ScanIter {
    fn visit_next_directory(&mut self, dir_abs: &Path, prefix: Option<&RelPath>) -> Result<()> {
        trace!(directory = ?dir_abs, "scan directory");
        let read_dir = fs::read_dir(dir_abs).map_err(|source| Error::Io {
            path: dir_abs.to_path_buf(),
            source,
        })?;
        let mut children: Vec<std::ffi::OsString> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| Error::Io {
                path: dir_abs.to_path_buf(),
                source,
            })?;
            children.push(entry.file_name());
        }
        children.sort();

        let mut directory_insert_point = 0;
        for child_name in children {
            let child_abs = dir_abs.join(&child_name);
            let Some(name) = child_name.to_str() else {
                return Err(Error::InvalidRelPath {
                    value: child_abs.to_string_lossy().into_owned(),
                });
            };
            let child_rel = match prefix {
                Some(prefix) => prefix.append(name),
                None => RelPath::new(name)?,
            };
            // symlink_metadata so links are seen as links, not their targets.
            let metadata =
                fs::symlink_metadata(&child_abs).map_err(|source| Error::Unreadable {
                    path: child_abs.clone(),
                    source,
                })?;
            let file_type = metadata.file_type();
            if file_type.is_dir() {
                self.dir_deque.insert(
                    directory_insert_point,
                    (child_abs, Some(child_rel)),
                );
                directory_insert_point += 1;
            } else if file_type.is_file() {
                let mtime_ns = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0);
                self.entry_deque.push_back(Ok(ScanEntry {
                    abs: child_abs,
                    rel: child_rel,
                    size_bytes: metadata.len(),
                    mtime_ns,
                }));
            } else {
                return Err(Error::UnsupportedEntry { path: child_abs });
            }
        }
        Ok(())
    }
}

impl Iterator for ScanIter {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Result<ScanEntry>> {
        loop {
            if let Some(entry) = self.entry_deque.pop_front() {
                return Some(entry);
            }
            // Nothing queued; visit another directory to refill the queue.
            if let Some((dir_abs, prefix)) = self.dir_deque.pop_front() {
                if let Err(e) = self.visit_next_directory(&dir_abs, prefix.as_ref()) {
                    return Some(Err(e));
                }
            } else {
                return None;
            }
        }
    }
}
