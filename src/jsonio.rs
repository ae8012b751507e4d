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

//! Artifact serialization: canonical JSON, JSONL, and plain text.
//!
//! Every artifact is written to a temporary file in the target directory and
//! renamed into place, so readers observe either the previous state or the
//! complete new document. Canonical form is sorted keys, UTF-8, compact
//! separators, LF, and a terminating newline.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::errors::Error;
use crate::Result;

/// A file that becomes visible under its final name only on [close](AtomicFile::close).
pub struct AtomicFile {
    path: PathBuf,
    temp: NamedTempFile,
}

impl AtomicFile {
    pub fn new(path: &Path) -> Result<AtomicFile> {
        let dir = path.parent().ok_or_else(|| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
        })?;
        let temp = NamedTempFile::with_prefix_in("tmp.", dir).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(AtomicFile {
            path: path.to_path_buf(),
            temp,
        })
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.temp
            .write_all(bytes)
            .map_err(|source| Error::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Rename into place, replacing any previous file of the same name.
    pub fn close(self) -> Result<()> {
        if cfg!(feature = "sync") {
            self.temp.as_file().sync_all().map_err(|source| Error::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        self.temp
            .persist(&self.path)
            .map(|_| ())
            .map_err(|e| Error::Io {
                path: self.path.clone(),
                source: e.error,
            })
    }
}

/// Serialize to canonical JSON: sorted keys, compact, trailing newline.
///
/// Sorting comes from routing the document through [serde_json::Value],
/// whose object map is ordered by key.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let mut s = serde_json::to_string(&value)?;
    s.push('\n');
    Ok(s)
}

/// Write a JSON document atomically in canonical form.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut f = AtomicFile::new(path)?;
    f.write_all(to_canonical_json(value)?.as_bytes())?;
    f.close()
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(Error::from)
}

/// Write a text artifact atomically, with a terminating newline.
pub fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    let mut f = AtomicFile::new(path)?;
    f.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        f.write_all(b"\n")?;
    }
    f.close()
}

/// Appends compact one-line JSON records, flushed line by line.
///
/// Line N is flushed before line N+1 is written, so a crash leaves a
/// readable prefix of complete lines.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlWriter {
    /// Create the file; it must not already exist.
    pub fn create(path: &Path) -> Result<JsonlWriter> {
        let file = File::options()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(JsonlWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        let line = serde_json::to_string(&value)?;
        let io_err = |source| Error::Io {
            path: self.path.clone(),
            source,
        };
        self.writer.write_all(line.as_bytes()).map_err(io_err)?;
        self.writer.write_all(b"\n").map_err(io_err)?;
        self.writer.flush().map_err(io_err)?;
        if cfg!(feature = "sync") {
            self.writer.get_ref().sync_data().map_err(io_err)?;
        }
        Ok(())
    }
}

pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
