//! Graph data model: resolved imports, chunks and transformed files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PundleError, Result};
use crate::source_map::SourceMapValue;

/// A unique unit of work: one file interpreted in one format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportResolved {
    pub format: String,
    pub file_path: PathBuf,
}

impl ImportResolved {
    pub fn new(format: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            format: format.into(),
            file_path: file_path.into(),
        }
    }

    /// Reject empty formats and relative paths.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.format.trim().is_empty() {
            return Err(format!(
                "import '{}' has an empty format",
                self.file_path.display()
            ));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err("import has an empty file path".to_string());
        }
        if !self.file_path.is_absolute() {
            return Err(format!(
                "import path '{}' is not absolute",
                self.file_path.display()
            ));
        }
        Ok(())
    }
}

/// An output unit: one bundle, stylesheet or page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub format: String,
    pub label: Option<String>,
    pub entry: Option<PathBuf>,
    pub imports: Vec<ImportResolved>,
}

impl Chunk {
    /// A chunk with no entry and no imports. Invalid until populated.
    pub fn empty(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            label: None,
            entry: None,
            imports: Vec::new(),
        }
    }

    /// A chunk rooted at a single entry file.
    pub fn entry(format: impl Into<String>, entry: impl Into<PathBuf>) -> Self {
        Self {
            entry: Some(entry.into()),
            ..Self::empty(format)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_import(mut self, import: ImportResolved) -> Self {
        self.imports.push(import);
        self
    }

    /// The chunk's direct file set: `entry` (in the chunk's format) followed
    /// by `imports`, in insertion order, without duplicates.
    pub fn files(&self) -> Vec<ImportResolved> {
        let mut files = Vec::with_capacity(self.imports.len() + 1);
        if let Some(entry) = &self.entry {
            files.push(ImportResolved::new(self.format.clone(), entry.clone()));
        }
        for import in &self.imports {
            if !files.contains(import) {
                files.push(import.clone());
            }
        }
        files
    }

    /// Whether the chunk's entry or one of its imports points at `path`.
    pub fn references(&self, path: &Path) -> bool {
        self.entry.as_deref() == Some(path) || self.imports.iter().any(|i| i.file_path == path)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.format.trim().is_empty() {
            return Err("chunk has an empty format".to_string());
        }
        if self.entry.is_none() && self.imports.is_empty() {
            return Err(format!(
                "chunk{} has neither an entry nor imports",
                self.label
                    .as_deref()
                    .map(|l| format!(" '{l}'"))
                    .unwrap_or_default()
            ));
        }
        if let Some(entry) = self.entry.as_ref().filter(|e| !e.is_absolute()) {
            return Err(format!("chunk entry '{}' is not absolute", entry.display()));
        }
        for import in &self.imports {
            import.validate()?;
        }
        Ok(())
    }

    /// Human readable name used in diagnostics.
    pub fn display_name(&self) -> String {
        if let Some(entry) = &self.entry {
            return entry.display().to_string();
        }
        if let Some(label) = &self.label {
            return label.clone();
        }
        self.imports
            .first()
            .map(|i| i.file_path.display().to_string())
            .unwrap_or_else(|| "<empty chunk>".to_string())
    }
}

/// A transformed file as stored in the Job and in the transform cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTransformed {
    pub format: String,
    pub file_path: PathBuf,
    pub contents: Vec<u8>,
    pub source_map: Option<SourceMapValue>,
    /// Chunks discovered inside this file, e.g. dynamic import boundaries.
    pub chunks: Vec<Chunk>,
    /// Outgoing import edges in registration order.
    pub imports: Vec<ImportResolved>,
}

impl ImportTransformed {
    pub fn resolved(&self) -> ImportResolved {
        ImportResolved::new(self.format.clone(), self.file_path.clone())
    }

    pub fn imports_path(&self, path: &Path) -> bool {
        self.imports.iter().any(|i| i.file_path == path)
    }
}

/// Output of a generator for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkGenerated {
    pub format: String,
    pub label: Option<String>,
    pub entry: Option<PathBuf>,
    /// Public output path after template substitution, or `None` when the
    /// format has no template.
    pub file_path: Option<PathBuf>,
    pub contents: Vec<u8>,
    pub source_map: Option<SourceMapValue>,
    /// Paths of every file that contributed to this chunk.
    pub files: Vec<PathBuf>,
}

/// Result of a generation pass, in the order chunks were requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunksGenerated {
    pub chunks: Vec<ChunkGenerated>,
}

impl ChunksGenerated {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkGenerated> {
        self.chunks.iter()
    }
}

pub(crate) fn validate_chunk(chunk: &Chunk) -> Result<()> {
    chunk.validate().map_err(PundleError::transform_failed)
}
