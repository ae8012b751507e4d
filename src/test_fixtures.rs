// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

//! Utilities to set up test environments.
//!
//! Fixtures that create directories delete them when the object is dropped.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use time::macros::datetime;

use crate::clock::FixedClock;

/// A temporary tree for running a test.
pub struct TreeFixture {
    pub root: PathBuf,
    _tempdir: tempfile::TempDir,
}

impl TreeFixture {
    pub fn new() -> TreeFixture {
        let tempdir = tempfile::TempDir::new().unwrap();
        let root = tempdir.path().to_path_buf();
        TreeFixture {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn create_file(&self, relative_path: &str) {
        self.create_file_with_contents(relative_path, b"contents");
    }

    pub fn create_file_with_contents(&self, relative_path: &str, contents: &[u8]) {
        let full_path = self.root.join(relative_path);
        let mut f = fs::File::create(full_path).unwrap();
        f.write_all(contents).unwrap();
    }

    pub fn create_dir(&self, relative_path: &str) {
        fs::create_dir_all(self.root.join(relative_path)).unwrap();
    }

    #[cfg(unix)]
    pub fn create_symlink(&self, relative_path: &str, target: &str) {
        use std::os::unix::fs as unix_fs;

        unix_fs::symlink(target, self.root.join(relative_path)).unwrap();
    }
}

impl Default for TreeFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The clock used by deterministic pipeline tests: 2025-01-01T12:00:00Z.
pub fn fixed_clock() -> FixedClock {
    FixedClock(datetime!(2025-01-01 12:00:00 UTC))
}

/// The run id produced under [fixed_clock].
pub fn fixed_run_id() -> crate::RunId {
    "2025-01-01T12-00-00Z".parse().unwrap()
}
