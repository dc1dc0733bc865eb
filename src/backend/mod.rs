//! Key-value backends
//!
//! The configuration client talks to its store through [`KvBackend`]. The
//! trait covers exactly the primitives the client needs: scalar get/set/delete,
//! an atomic integer increment, an append-only list and a database flush.
//!
//! - [`RedisBackend`]: the shared store used by all processes in production.
//! - [`MemoryBackend`]: an in-process store. Clones share the same data, which
//!   lets tests model several processes attached to one database.

pub mod memory_backend;
pub mod redis_backend;

pub use memory_backend::MemoryBackend;
pub use redis_backend::RedisBackend;

use crate::error::AppResult;

/// Primitive operations on one logical database.
///
/// Every call is a single round trip and atomic on its own. Nothing here
/// groups several calls into a transaction.
pub trait KvBackend: Send {
    /// Short identifier for logs (e.g. `redis://host:6379/0`).
    fn describe(&self) -> String;

    /// Liveness check.
    fn ping(&mut self) -> AppResult<()>;

    /// Raw stored bytes, `None` when the key is absent.
    fn get(&mut self, key: &str) -> AppResult<Option<Vec<u8>>>;

    /// Store a scalar value, replacing whatever was there.
    fn set(&mut self, key: &str, value: &str) -> AppResult<()>;

    /// Remove a key of any type. Absent keys are not an error.
    fn delete(&mut self, key: &str) -> AppResult<()>;

    /// Atomically add `by` to an integer value (absent counts as 0) and
    /// return the new value.
    fn incr(&mut self, key: &str, by: i64) -> AppResult<i64>;

    /// All items of a list, oldest first. Absent lists are empty.
    fn list_range(&mut self, key: &str) -> AppResult<Vec<Vec<u8>>>;

    /// Append one item to a list, creating it if needed.
    fn list_push(&mut self, key: &str, value: &str) -> AppResult<()>;

    /// Remove every key in this database.
    fn flush_db(&mut self) -> AppResult<()>;
}

impl<B: KvBackend + ?Sized> KvBackend for Box<B> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn ping(&mut self) -> AppResult<()> {
        (**self).ping()
    }

    fn get(&mut self, key: &str) -> AppResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> AppResult<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> AppResult<()> {
        (**self).delete(key)
    }

    fn incr(&mut self, key: &str, by: i64) -> AppResult<i64> {
        (**self).incr(key, by)
    }

    fn list_range(&mut self, key: &str) -> AppResult<Vec<Vec<u8>>> {
        (**self).list_range(key)
    }

    fn list_push(&mut self, key: &str, value: &str) -> AppResult<()> {
        (**self).list_push(key, value)
    }

    fn flush_db(&mut self) -> AppResult<()> {
        (**self).flush_db()
    }
}
