// WCBT: working copy backup tool.
// Copyright 2024, 2025 WCBT developers.

//! Streaming content hashes.
//!
//! Files are read in bounded chunks, so hashing memory use is independent of
//! file size. The algorithm identifier is recorded in every manifest so a
//! future migration stays explicit.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::cancel::CancelFlag;
use crate::errors::Error;
use crate::Result;

/// Hash algorithm tag stored in manifests and reports.
pub const HASH_ALGORITHM: &str = "sha256";

const CHUNK_SIZE: usize = 64 * 1024;

/// Digest and observed length of one file's content.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileDigest {
    /// Lowercase hex digest.
    pub hex: String,
    pub size_bytes: u64,
}

/// Hash a file's content without copying it anywhere.
///
/// Open and read failures are reported as `unreadable` with the original
/// cause attached.
pub fn hash_file(path: &Path) -> Result<FileDigest> {
    let mut file = File::open(path).map_err(|source| Error::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size_bytes = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|source| Error::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size_bytes += n as u64;
    }
    Ok(FileDigest {
        hex: format!("{:x}", hasher.finalize()),
        size_bytes,
    })
}

/// Copy `source` into `dest` while hashing the stream.
///
/// The cancel flag is checked between chunks; observing it abandons the copy
/// with [Error::Cancelled] and leaves cleanup of `dest` to the caller.
pub fn copy_and_hash(source: &Path, dest: &mut File, cancel: &CancelFlag) -> Result<FileDigest> {
    let mut from = File::open(source).map_err(|src| Error::Unreadable {
        path: source.to_path_buf(),
        source: src,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size_bytes = 0u64;
    loop {
        cancel.check()?;
        let n = from.read(&mut buf).map_err(|src| Error::Unreadable {
            path: source.to_path_buf(),
            source: src,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        dest.write_all(&buf[..n]).map_err(|src| Error::Io {
            path: source.to_path_buf(),
            source: src,
        })?;
        size_bytes += n as u64;
    }
    Ok(FileDigest {
        hex: format!("{:x}", hasher.finalize()),
        size_bytes,
    })
}
