use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

/// A whole-file JSON document read and rewritten as one unit.
///
/// A missing file reads as `T::default()`. Writes go to a sibling temp file and
/// are renamed into place; `update` holds an in-process lock across the
/// read-modify-write so concurrent edits from the dashboard and the bot queue up.
pub struct JsonDocument<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn load(&self) -> Result<T> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(T::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, value: &T) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write(value)
    }

    /// Read, apply `f`, write back. The closure's return value is passed through.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut value = self.load()?;
        let result = f(&mut value);
        self.write(&value)?;
        Ok(result)
    }

    fn write(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn test_missing_file_reads_default_and_update_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let doc: JsonDocument<BTreeMap<String, i64>> =
            JsonDocument::new(dir.path().join("nested/counts.json"));

        assert!(doc.load().unwrap().is_empty());

        let len = doc
            .update(|m| {
                m.insert("a".into(), 1);
                m.len()
            })
            .unwrap();
        assert_eq!(len, 1);
        assert_eq!(doc.load().unwrap().get("a"), Some(&1));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let doc: JsonDocument<BTreeMap<String, i64>> = JsonDocument::new(path);
        assert!(doc.load().is_err());
    }
}
