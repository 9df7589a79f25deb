//! File-based record store: one JSON document per record.
//!
//! Records live in a single directory as `<id>.json`. Writes go to a hidden
//! temp file first and are renamed into place, so a reader never observes a
//! half-written record. Listing is a directory scan; malformed files are
//! logged and skipped.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Anything stored in a [`RecordStore`].
pub trait Record: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
}

/// Directory-backed store of JSON records.
pub struct RecordStore<T> {
    dir: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for RecordStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").field("dir", &self.dir).finish()
    }
}

const ARCHIVE_DIR: &str = "archive";

impl<T: Record> RecordStore<T> {
    /// Open a store at the given directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            _marker: PhantomData,
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(id)))
    }

    /// Load a record by id. `Ok(None)` when no such file exists.
    pub fn get(&self, id: &str) -> Result<Option<T>> {
        let path = self.path_for(id);
        match std::fs::read_to_string(&path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace a record (last write wins).
    pub fn put(&self, record: &T) -> Result<()> {
        let path = self.path_for(record.id());
        write_json_atomic(&path, record)?;
        tracing::debug!("💾 Saved record {} to {}", record.id(), path.display());
        Ok(())
    }

    /// Move a record out of the active listing into `<dir>/archive/`.
    pub fn archive(&self, id: &str) -> Result<bool> {
        let from = self.path_for(id);
        if !from.exists() {
            return Ok(false);
        }
        let archive_dir = self.dir.join(ARCHIVE_DIR);
        std::fs::create_dir_all(&archive_dir)?;
        let to = archive_dir.join(format!("{}.json", file_stem(id)));
        std::fs::rename(&from, &to)?;
        Ok(true)
    }

    /// Load every active record. Unreadable files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if !is_record_file(&path) {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(crate::ArabicaError::from)
                .and_then(|json| serde_json::from_str::<T>(&json).map_err(Into::into));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("⚠️ Skipping unreadable record {}: {e}", path.display()),
            }
        }
        Ok(records)
    }

    /// Load every active record matching a predicate.
    pub fn list_where(&self, mut pred: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        Ok(self.list()?.into_iter().filter(|r| pred(r)).collect())
    }
}

fn is_record_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with('.') && name.ends_with(".json") && path.is_file()
}

/// Encode a record id as a file stem. Alphanumerics (any script), `-` and `_`
/// pass through; every other character becomes `~XX` per UTF-8 byte, so
/// distinct ids never share a file.
pub fn file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "~{byte:02X}");
            }
        }
    }
    out
}

/// Read a single JSON document, or `T::default()` when the file does not exist.
/// A file that exists but does not parse is an error; callers must not
/// silently overwrite it.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(serde_json::from_str(&json)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Read a single JSON document if it exists.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON document all-or-nothing: temp file in the same directory, then rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record.json");
    let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let json = serde_json::to_string_pretty(value)?;
    if let Err(e) = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, path)) {
        std::fs::remove_file(&tmp).ok();
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Record for Note {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn note(id: &str, text: &str) -> Note {
        Note {
            id: id.into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_put_get_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store: RecordStore<Note> = RecordStore::open(dir.path()).unwrap();
        assert_eq!(store.get("a").unwrap(), None);

        store.put(&note("a", "first")).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(note("a", "first")));

        store.put(&note("a", "second")).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().text, "second");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_skips_garbage_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store: RecordStore<Note> = RecordStore::open(dir.path()).unwrap();
        store.put(&note("a", "x")).unwrap();
        store.put(&note("b", "y")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join(".c.json.123.tmp"), "{}").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "hi").unwrap();

        let mut ids: Vec<_> = store.list().unwrap().into_iter().map(|n| n.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_archive_hides_from_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store: RecordStore<Note> = RecordStore::open(dir.path()).unwrap();
        store.put(&note("gone", "x")).unwrap();

        assert!(store.archive("gone").unwrap());
        assert!(store.list().unwrap().is_empty());
        assert!(dir.path().join("archive").join("gone.json").exists());
        assert!(!store.archive("gone").unwrap());
    }

    #[test]
    fn test_file_stem_is_injective_for_separators() {
        assert_eq!(file_stem("Ленина_1"), "Ленина_1");
        assert_ne!(file_stem("a/b"), file_stem("a_b"));
        assert_ne!(file_stem("a b"), file_stem("a_b"));
        assert!(!file_stem("../etc/passwd").contains('/'));
        assert!(!file_stem("../etc/passwd").contains('.'));
    }

    #[test]
    fn test_read_json_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let missing: Vec<u32> = read_json_or_default(&path).unwrap();
        assert!(missing.is_empty());

        write_json_atomic(&path, &vec![1u32, 2, 3]).unwrap();
        let loaded: Vec<u32> = read_json_or_default(&path).unwrap();
        assert_eq!(loaded, vec![1, 2, 3]);

        std::fs::write(&path, "[1,").unwrap();
        assert!(read_json_or_default::<Vec<u32>>(&path).is_err());
    }
}
