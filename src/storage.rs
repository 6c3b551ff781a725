use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Fixed key the serialized history lives under.
pub const STORAGE_KEY: &str = "gemini-chat-history";

/// Key-value persistence for a single serialized record.
pub trait Storage {
    fn get(&self) -> anyhow::Result<Option<String>>;
    fn set(&mut self, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self) -> anyhow::Result<()>;
}

/// Keeps the record in a JSON file next to the config.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: PathBuf) -> Self {
        FileStorage { path }
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
            _ => Ok(()),
        }
    }
}

impl Storage for FileStorage {
    fn get(&self) -> anyhow::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, value: &str) -> anyhow::Result<()> {
        self.ensure_dir()?;
        // Write-then-rename so a crash never leaves half a record behind.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn remove(&mut self) -> anyhow::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub use memory::MemoryStorage;

#[cfg(test)]
mod memory {
    use super::Storage;
    use std::sync::{Arc, Mutex};

    /// In-process storage whose contents stay observable after being handed
    /// to a store.
    #[derive(Clone, Default)]
    pub struct MemoryStorage {
        value: Arc<Mutex<Option<String>>>,
    }

    impl MemoryStorage {
        pub fn with_value(value: &str) -> Self {
            let storage = MemoryStorage::default();
            *storage.value.lock().unwrap() = Some(value.to_string());
            storage
        }

        pub fn snapshot(&self) -> Option<String> {
            self.value.lock().unwrap().clone()
        }
    }

    impl Storage for MemoryStorage {
        fn get(&self) -> anyhow::Result<Option<String>> {
            Ok(self.snapshot())
        }

        fn set(&mut self, value: &str) -> anyhow::Result<()> {
            *self.value.lock().unwrap() = Some(value.to_string());
            Ok(())
        }

        fn remove(&mut self) -> anyhow::Result<()> {
            *self.value.lock().unwrap() = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("history.json"));
        assert!(storage.get().unwrap().is_none());
    }

    #[test]
    fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("nested/history.json"));

        storage.set(r#"{"activeChatId":null,"sessions":{}}"#).unwrap();
        assert_eq!(
            storage.get().unwrap().as_deref(),
            Some(r#"{"activeChatId":null,"sessions":{}}"#)
        );

        storage.remove().unwrap();
        assert!(storage.get().unwrap().is_none());
        // Removing twice is fine.
        storage.remove().unwrap();
    }
}
