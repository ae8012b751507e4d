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

//! Cross-process locks serializing write-side pipelines on a destination.
//!
//! The lock is a JSON file created with exclusive semantics. Contention
//! fails fast; breaking a stale lock is an explicit, caller-invoked step,
//! never automatic.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::errors::Error;
use crate::jsonio;
use crate::{Result, LOCK_FILENAME};

pub static LOCK_SCHEMA: &str = "wcbt_profile_lock_v1";

/// Metadata recorded in a lock file, for inspection by whoever hits contention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub schema: String,
    pub pid: u32,
    pub hostname: String,
    pub created_at: String,
    pub command: String,
}

impl LockInfo {
    fn summary(&self) -> String {
        format!(
            "held by pid {} on {} since {} for {:?}",
            self.pid, self.hostname, self.created_at, self.command
        )
    }
}

/// An exclusive lock on a destination root, released on drop.
#[derive(Debug)]
pub struct ProfileLock {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl ProfileLock {
    /// Acquire the lock for `command` inside `dir`, which must exist.
    ///
    /// Returns [Error::Locked] without waiting if another process holds it.
    pub fn acquire(dir: &Path, command: &str, clock: &dyn Clock) -> Result<ProfileLock> {
        let path = dir.join(LOCK_FILENAME);
        let info = LockInfo {
            schema: LOCK_SCHEMA.to_string(),
            pid: process::id(),
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            created_at: clock
                .now()
                .format(&Rfc3339)
                .expect("UTC datetime formats as RFC3339"),
            command: command.to_string(),
        };
        let payload = jsonio::to_canonical_json(&info)?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(payload.as_bytes())
                    .map_err(|source| Error::Io {
                        path: path.clone(),
                        source,
                    })?;
                debug!(lock = ?path, command, "acquired lock");
                Ok(ProfileLock {
                    path,
                    pid: info.pid,
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = ProfileLock::peek(dir)?.map(|info| info.summary());
                Err(Error::Locked { path, holder })
            }
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    /// Return information about the current holder, if any.
    ///
    /// Unreadable or corrupt lock content is reported as `None`: the lock
    /// still blocks, it just cannot be described.
    pub fn peek(dir: &Path) -> Result<Option<LockInfo>> {
        let path = dir.join(LOCK_FILENAME);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(_) => Ok(None),
        }
    }

    /// Remove an existing lock regardless of owner.
    ///
    /// Use this only when confident the recorded process is gone; the engine
    /// never calls it on its own.
    pub fn break_lock(dir: &Path) -> Result<()> {
        let path = dir.join(LOCK_FILENAME);
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(lock = ?path, "lock broken by explicit request");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io { path, source }),
        }
    }

    /// Explicitly release the lock.
    pub fn release(mut self) -> Result<()> {
        self.release_if_owned()
    }

    /// Unlink the lock file if this process still appears to own it.
    fn release_if_owned(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let Ok(content) = fs::read_to_string(&self.path) {
            if let Ok(info) = serde_json::from_str::<LockInfo>(&content) {
                if info.pid != self.pid {
                    warn!(lock = ?self.path, other_pid = info.pid, "not releasing lock owned by another process");
                    return Ok(());
                }
            }
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_if_owned() {
            warn!(?err, "failed to release lock on drop");
        }
    }
}
