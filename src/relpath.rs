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

//! Platform-independent relative file paths used inside runs and artifacts.
//!
//! A [RelPath] always uses forward slashes, is never absolute, and contains
//! no `.` or `..` segments. Every rel path that reaches a manifest, plan,
//! journal, or candidate has passed through this type, so consumers can join
//! them under a root without re-checking for traversal.
//!
//! Rel paths in memory are simply strings; the ordering is plain string
//! ordering of the forward-slash form, which is also manifest order.

use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// A validated relative path, eg `sub/b.bin`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    /// True if this string is a well-formed rel path.
    pub fn is_valid(s: &str) -> bool {
        if s.is_empty() || s.starts_with('/') {
            return false;
        }
        for part in s.split('/') {
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains('\0')
                || part.contains('\\')
            {
                return false;
            }
        }
        true
    }

    pub fn new(s: &str) -> crate::Result<RelPath> {
        if RelPath::is_valid(s) {
            Ok(RelPath(s.to_owned()))
        } else {
            Err(Error::InvalidRelPath { value: s.into() })
        }
    }

    /// Build a RelPath from a relative OS path, such as the remainder after
    /// stripping a tree root.
    ///
    /// Fails on non-UTF-8 names and on any non-normal component.
    pub fn from_relative_os_path(path: &Path) -> crate::Result<RelPath> {
        let mut s = String::new();
        for component in path.components() {
            let Component::Normal(name) = component else {
                return Err(Error::InvalidRelPath {
                    value: path.to_string_lossy().into_owned(),
                });
            };
            let Some(name) = name.to_str() else {
                return Err(Error::InvalidRelPath {
                    value: path.to_string_lossy().into_owned(),
                });
            };
            if !s.is_empty() {
                s.push('/');
            }
            s.push_str(name);
        }
        RelPath::new(&s)
    }

    /// Construct a new RelPath for a child of `self`.
    #[must_use]
    pub fn append(&self, child_name: &str) -> RelPath {
        let mut c = self.0.clone();
        c.push('/');
        c.push_str(child_name);
        debug_assert!(RelPath::is_valid(&c));
        RelPath(c)
    }

    /// Return a PathBuf for this rel path below a tree root directory.
    ///
    /// Components are pushed one at a time so the result uses the platform
    /// separator.
    #[must_use]
    pub fn below<R: Into<PathBuf>>(&self, tree_root: R) -> PathBuf {
        let mut buf: PathBuf = tree_root.into();
        for part in self.0.split('/') {
            buf.push(part);
        }
        buf
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RelPath {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RelPath::new(s)
    }
}

impl TryFrom<String> for RelPath {
    type Error = Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if RelPath::is_valid(&s) {
            Ok(RelPath(s))
        } else {
            Err(Error::InvalidRelPath { value: s })
        }
    }
}

impl From<RelPath> for String {
    fn from(r: RelPath) -> String {
        r.0
    }
}

impl Display for RelPath {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

/// Compare for equality a RelPath to a str.
impl PartialEq<str> for RelPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == *other
    }
}

impl PartialEq<&str> for RelPath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == **other
    }
}

impl Deref for RelPath {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
