//! Writing generated chunks to disk.

use std::fs;
use std::path::{Component, Path, PathBuf};

use pundle_core::{ChunkGenerated, SourceMapValue};

use crate::error::{CliError, Result, ResultExt};

/// A file written by [`OutputWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Writes chunk outputs below one directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    out_dir: PathBuf,
}

impl OutputWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Absolute target for a chunk's relative output path.
    ///
    /// Absolute paths and `..` components are rejected so a template can
    /// never write outside the output directory.
    pub fn target(&self, relative: &Path) -> Result<PathBuf> {
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if escapes || relative.as_os_str().is_empty() {
            return Err(CliError::OutputEscapes(relative.to_path_buf()));
        }
        Ok(self.out_dir.join(relative))
    }

    /// Write every chunk that has an output path. Chunks without one (format
    /// mapped to no template) are skipped.
    pub fn write<'a>(
        &self,
        chunks: impl IntoIterator<Item = &'a ChunkGenerated>,
    ) -> Result<Vec<WrittenFile>> {
        let mut written = Vec::new();
        for chunk in chunks {
            let Some(relative) = &chunk.file_path else {
                tracing::debug!(format = %chunk.format, "Chunk has no output path, not writing");
                continue;
            };
            let target = self.target(relative)?;
            write_file(&target, &chunk.contents)?;
            written.push(WrittenFile {
                path: target.clone(),
                size: chunk.contents.len() as u64,
            });

            if let Some(SourceMapValue::Json(map)) = &chunk.source_map {
                let mut map_path = target.into_os_string();
                map_path.push(".map");
                let map_path = PathBuf::from(map_path);
                write_file(&map_path, map.as_bytes())?;
                written.push(WrittenFile {
                    path: map_path,
                    size: map.len() as u64,
                });
            }
        }
        Ok(written)
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    fs::write(path, contents).with_path(path)?;
    tracing::debug!(path = %path.display(), bytes = contents.len(), "Wrote output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(path: Option<&str>, contents: &str) -> ChunkGenerated {
        ChunkGenerated {
            format: "js".into(),
            label: None,
            entry: None,
            file_path: path.map(PathBuf::from),
            contents: contents.as_bytes().to_vec(),
            source_map: None,
            files: Vec::new(),
        }
    }

    #[test]
    fn test_writes_nested_paths() {
        let temp = TempDir::new().unwrap();
        let writer = OutputWriter::new(temp.path().join("dist"));
        let chunks = [chunk(Some("js/index.js"), "a"), chunk(None, "skipped")];

        let written = writer.write(&chunks).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(
            fs::read_to_string(temp.path().join("dist/js/index.js")).unwrap(),
            "a"
        );
    }

    #[test]
    fn test_writes_source_maps_next_to_output() {
        let temp = TempDir::new().unwrap();
        let writer = OutputWriter::new(temp.path());
        let mut with_map = chunk(Some("a.js"), "a");
        with_map.source_map = Some(SourceMapValue::Json("{}".into()));

        let written = writer.write([&with_map]).unwrap();
        assert_eq!(written.len(), 2);
        assert!(temp.path().join("a.js.map").is_file());
    }

    #[test]
    fn test_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let writer = OutputWriter::new(temp.path().join("dist"));
        for bad in ["../escape.js", "/etc/passwd", "a/../../b.js", ""] {
            let err = writer.write([&chunk(Some(bad), "x")]).unwrap_err();
            assert!(matches!(err, CliError::OutputEscapes(_)), "{bad}");
        }
        assert!(!temp.path().join("escape.js").exists());
    }
}
