/// On-disk layout for the engine's data directory
///
/// Everything lives under one directory (default `.code_slice/` inside the
/// indexed root): the chunk store, the lexical postings, the embedding table,
/// index metadata, cache snapshots, and the session database.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct StorageLayout {
    data_dir: PathBuf,
}

impl StorageLayout {
    /// Create the layout, making the data directory if needed
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Cannot create data directory: {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.data_dir.join("chunks.jsonl")
    }

    pub fn postings_path(&self) -> PathBuf {
        self.data_dir.join("postings.json")
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.data_dir.join("embeddings.json")
    }

    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join("meta.json")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Serialize a value to JSON at `path`, via a temp file and rename
    pub fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let content = serde_json::to_string(value)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Cannot write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Cannot replace {}", path.display()))?;
        Ok(())
    }

    /// Read a JSON value from `path`; Ok(None) when the file does not exist
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt JSON in {}", path.display()))?;
        Ok(Some(value))
    }

    /// Write one JSON document per line
    pub fn write_jsonl<T: Serialize>(&self, path: &Path, values: &[T]) -> Result<()> {
        let mut out = String::new();
        for value in values {
            out.push_str(&serde_json::to_string(value)?);
            out.push('\n');
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, out)
            .with_context(|| format!("Cannot write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Cannot replace {}", path.display()))?;
        Ok(())
    }

    /// Read a JSONL file; missing file yields an empty list, corrupt lines error
    pub fn read_jsonl<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let mut values = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str(line)
                .with_context(|| format!("Corrupt JSONL at {}:{}", path.display(), i + 1))?;
            values.push(value);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let layout = StorageLayout::new(nested.clone()).unwrap();
        assert!(nested.is_dir());
        assert_eq!(layout.chunks_path(), nested.join("chunks.jsonl"));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let path = layout.meta_path();

        layout.write_json(&path, &vec!["a", "b"]).unwrap();
        let read: Option<Vec<String>> = layout.read_json(&path).unwrap();
        assert_eq!(read, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_missing_json_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let read: Option<Vec<String>> = layout.read_json(&layout.meta_path()).unwrap();
        assert!(read.is_none());
    }

    #[test]
    fn test_jsonl_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let path = layout.chunks_path();

        layout.write_jsonl(&path, &[1u32, 2, 3]).unwrap();
        let read: Vec<u32> = layout.read_jsonl(&path).unwrap();
        assert_eq!(read, vec![1, 2, 3]);
    }
}
