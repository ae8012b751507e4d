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

//! Path normalization and containment gates.
//!
//! All path manipulation inside the engine routes through this module or
//! through [RelPath]; raw concatenation of untrusted strings is forbidden.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::Error;
use crate::relpath::RelPath;
use crate::Result;

/// Resolve a path to absolute, canonical form (symlinks followed).
pub fn normalize(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Return `child` relative to `base`, after full resolution of both.
///
/// Fails with `unsafe_path` if the resolved child is not within the resolved
/// base, which also rejects symlinks pointing outside the base.
pub fn safe_relpath(base: &Path, child: &Path) -> Result<RelPath> {
    let base_resolved = normalize(base)?;
    let child_resolved = normalize(child)?;
    let rel = child_resolved
        .strip_prefix(&base_resolved)
        .map_err(|_| Error::UnsafePath {
            path: child_resolved.clone(),
            base: base_resolved.clone(),
        })?;
    RelPath::from_relative_os_path(rel)
}

/// Join a validated rel path below `base`.
///
/// `RelPath` already guarantees the result cannot name anything above
/// `base`: it is never absolute and has no `..` segments.
pub fn safe_join(base: &Path, rel: &RelPath) -> PathBuf {
    rel.below(base)
}

/// Check that an existing path, after resolution, still lives within `base`.
///
/// Used where a tree we are about to read could have been tampered with
/// after it was written, for example a run payload directory.
pub fn ensure_within(base: &Path, path: &Path) -> Result<()> {
    let base_resolved = normalize(base)?;
    let resolved = normalize(path)?;
    if resolved.strip_prefix(&base_resolved).is_err() {
        return Err(Error::UnsafePath {
            path: resolved,
            base: base_resolved,
        });
    }
    Ok(())
}

/// Validate a backup source and return its resolved absolute form.
///
/// The source must exist, be a directory, and must not be a filesystem root.
pub fn validate_source(source: &Path) -> Result<PathBuf> {
    let resolved = normalize(source)?;
    let metadata = fs::metadata(&resolved).map_err(|source_err| Error::Io {
        path: resolved.clone(),
        source: source_err,
    })?;
    if !metadata.is_dir() {
        return Err(Error::Io {
            path: resolved,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }
    if resolved.parent().is_none() {
        return Err(Error::UnsafePath {
            base: resolved.clone(),
            path: resolved,
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use crate::test_fixtures::TreeFixture;

    use super::*;

    #[test]
    fn safe_relpath_inside_base() {
        let tf = TreeFixture::new();
        tf.create_dir("sub");
        tf.create_file("sub/child");
        let rel = safe_relpath(tf.path(), &tf.path().join("sub/child")).unwrap();
        assert_eq!(rel, "sub/child");
    }

    #[test]
    fn safe_relpath_rejects_outside_base() {
        let tf = TreeFixture::new();
        tf.create_dir("a");
        tf.create_dir("b");
        tf.create_file("b/escape");
        let err = safe_relpath(&tf.path().join("a"), &tf.path().join("b/escape")).unwrap_err();
        assert!(matches!(err, Error::UnsafePath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn safe_relpath_rejects_symlink_escape() {
        let tf = TreeFixture::new();
        tf.create_dir("inside");
        tf.create_file("outside.txt");
        tf.create_symlink("inside/link", "../outside.txt");
        let err = safe_relpath(&tf.path().join("inside"), &tf.path().join("inside/link"))
            .unwrap_err();
        assert!(matches!(err, Error::UnsafePath { .. }));
    }

    #[test]
    fn safe_join_uses_platform_separators() {
        let rel = RelPath::new("sub/b.bin").unwrap();
        let joined = safe_join(Path::new("base"), &rel);
        assert_eq!(joined, Path::new("base").join("sub").join("b.bin"));
    }

    #[test]
    fn validate_source_rejects_missing_and_files() {
        let tf = TreeFixture::new();
        assert!(validate_source(&tf.path().join("nope")).is_err());
        tf.create_file("plain");
        assert!(validate_source(&tf.path().join("plain")).is_err());
        assert_eq!(
            validate_source(tf.path()).unwrap(),
            normalize(tf.path()).unwrap()
        );
    }

    #[test]
    fn ensure_within_accepts_contained_paths() {
        let tf = TreeFixture::new();
        tf.create_dir("sub");
        tf.create_file("sub/child");
        ensure_within(tf.path(), &tf.path().join("sub/child")).unwrap();
    }
}
