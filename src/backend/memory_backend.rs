//! In-process backend with Redis-like semantics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::KvBackend;
use crate::error::{AppResult, EpocError};

#[derive(Debug, Clone)]
enum Entry {
    Scalar(Vec<u8>),
    List(Vec<Vec<u8>>),
}

/// In-memory database. Clones share one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no key is held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Check whether a key exists, without going through a client.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Store raw bytes under a key, bypassing validation. Used to simulate
    /// values written by other tools.
    pub fn insert_raw(&self, key: &str, value: &[u8]) {
        self.lock()
            .insert(key.to_string(), Entry::Scalar(value.to_vec()));
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn wrong_type(key: &str) -> EpocError {
    EpocError::Backend(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

impl KvBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn ping(&mut self) -> AppResult<()> {
        Ok(())
    }

    fn get(&mut self, key: &str) -> AppResult<Option<Vec<u8>>> {
        match self.lock().get(key) {
            None => Ok(None),
            Some(Entry::Scalar(value)) => Ok(Some(value.clone())),
            Some(Entry::List(_)) => Err(wrong_type(key)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        self.lock()
            .insert(key.to_string(), Entry::Scalar(value.as_bytes().to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> AppResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn incr(&mut self, key: &str, by: i64) -> AppResult<i64> {
        let mut entries = self.lock();
        let current = match entries.get(key) {
            None => 0,
            Some(Entry::Scalar(raw)) => std::str::from_utf8(raw)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| {
                    EpocError::Backend("value is not an integer or out of range".to_string())
                })?,
            Some(Entry::List(_)) => return Err(wrong_type(key)),
        };
        let next = current
            .checked_add(by)
            .ok_or_else(|| EpocError::Backend("increment would overflow".to_string()))?;
        entries.insert(key.to_string(), Entry::Scalar(next.to_string().into_bytes()));
        Ok(next)
    }

    fn list_range(&mut self, key: &str) -> AppResult<Vec<Vec<u8>>> {
        match self.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Entry::List(items)) => Ok(items.clone()),
            Some(Entry::Scalar(_)) => Err(wrong_type(key)),
        }
    }

    fn list_push(&mut self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self.lock();
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(Vec::new()))
        {
            Entry::List(items) => {
                items.push(value.as_bytes().to_vec());
                Ok(())
            }
            Entry::Scalar(_) => Err(wrong_type(key)),
        }
    }

    fn flush_db(&mut self) -> AppResult<()> {
        self.lock().clear();
        Ok(())
    }
}
