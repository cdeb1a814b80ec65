//! Stable identity keys for graph nodes.
//!
//! Keys are derived with BLAKE3 and must stay bit-for-bit stable across
//! process restarts: the persistent transform cache is keyed by [`FileKey`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Chunk, ImportResolved};

/// Number of hex characters kept from the BLAKE3 digest.
const KEY_HEX_LEN: usize = 16;

/// Identity of one resolved file: `format + "_" + hash(file_path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey(String);

impl FileKey {
    pub fn new(format: &str, file_path: &Path) -> Self {
        Self(format!("{}_{}", format, hash_path(file_path)))
    }

    pub fn of(import: &ImportResolved) -> Self {
        Self::new(&import.format, &import.file_path)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a chunk, derived from `(entry, sorted imports, format)`.
///
/// The label does not participate, and import order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey(String);

impl ChunkKey {
    pub fn of(chunk: &Chunk) -> Self {
        let mut imports: Vec<FileKey> = chunk.imports.iter().map(FileKey::of).collect();
        imports.sort();
        imports.dedup();

        let mut hasher = blake3::Hasher::new();
        hasher.update(chunk.format.as_bytes());
        hasher.update(&[0]);
        if let Some(entry) = &chunk.entry {
            hasher.update(entry.to_string_lossy().as_bytes());
        }
        hasher.update(&[0]);
        for key in &imports {
            hasher.update(key.as_str().as_bytes());
            hasher.update(&[0]);
        }

        let hex = hasher.finalize().to_hex();
        Self(format!("chunk_{}", &hex[..KEY_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Either kind of key, as held in the Job's lock table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    File(FileKey),
    Chunk(ChunkKey),
}

impl From<FileKey> for NodeKey {
    fn from(key: FileKey) -> Self {
        NodeKey::File(key)
    }
}

impl From<ChunkKey> for NodeKey {
    fn from(key: ChunkKey) -> Self {
        NodeKey::Chunk(key)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::File(key) => key.fmt(f),
            NodeKey::Chunk(key) => key.fmt(f),
        }
    }
}

/// Hex-encoded BLAKE3 prefix of a path's lossy UTF-8 form.
pub fn hash_path(path: &Path) -> String {
    let hex = blake3::hash(path.to_string_lossy().as_bytes()).to_hex();
    hex[..KEY_HEX_LEN].to_string()
}
