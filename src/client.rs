//! Configuration store client
//!
//! [`ConfigurationClient`] is the typed, validated view over the shared
//! key-value database. Every process (acquisition control, live viewers,
//! post-processing) holds its own client bound to the same database index, so a
//! write from one process is visible to the next read in any other.
//!
//! # Consistency
//!
//! Single-field reads and writes are one backend round trip each. Composite
//! operations are *not* atomic:
//!
//! - [`ConfigurationClient::after_write`] sets `last_dataset` and then
//!   increments `file_id` (the increment itself is the backend's atomic
//!   `INCRBY`, so concurrent callers never lose a count).
//! - [`ConfigurationClient::set_overlays`] deletes the list before pushing the
//!   new items; readers may briefly see an empty list.
//! - [`ConfigurationClient::load_snapshot`] applies entries one at a time. If
//!   entry N fails validation, entries before N stay committed.
//!
//! # Example
//!
//! ```rust
//! use epoc::backend::MemoryBackend;
//! use epoc::clock::FixedClock;
//! use epoc::field;
//! use epoc::ConfigurationClient;
//!
//! # fn main() -> epoc::AppResult<()> {
//! let mut cfg = ConfigurationClient::new(MemoryBackend::new())?
//!     .with_clock(FixedClock::parse("2020-01-01 11:53:12").unwrap());
//! cfg.set("measurement_tag", "Lysozyme")?;
//! cfg.set("project_id", "ProjectID")?;
//! cfg.write(field::FILE_ID, 37)?;
//! assert_eq!(cfg.fname()?, "037_ProjectID_Lysozyme_2020-01-01_1153_master.h5");
//! # Ok(())
//! # }
//! ```

use chrono::NaiveDateTime;
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{KvBackend, RedisBackend};
use crate::clock::{Clock, SystemClock};
use crate::config::RedisSettings;
use crate::error::{AppResult, EpocError};
use crate::field::{
    self, FieldKind, FieldSpec, FieldType, FieldValue, Key, Missing, AFFILIATION, BASE_DATA_DIR,
    FILE_ID, LAST_DATASET, MEASUREMENT_TAG, OVERLAYS, PI_NAME, PROJECT_ID,
};
use crate::guard;
use crate::snapshot::Snapshot;

/// Extension of dataset files (appended after `_master`).
pub const DATA_EXTENSION: &str = ".h5";
/// Extension that replaces [`DATA_EXTENSION`] for the acquisition log.
pub const LOG_EXTENSION: &str = "log";

const DATE_FORMAT: &str = "%Y-%m-%d";
const YEAR_FORMAT: &str = "%Y";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M";

/// Typed, validated access to the shared configuration database.
pub struct ConfigurationClient {
    backend: Box<dyn KvBackend>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ConfigurationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationClient")
            .field("backend", &self.backend.describe())
            .finish()
    }
}

impl ConfigurationClient {
    /// Wrap a backend. Fails if the backend does not answer a ping.
    pub fn new(backend: impl KvBackend + 'static) -> AppResult<Self> {
        let mut backend: Box<dyn KvBackend> = Box::new(backend);
        backend.ping()?;
        debug!("Configuration client bound to {}", backend.describe());
        Ok(Self {
            backend,
            clock: Arc::new(SystemClock),
        })
    }

    /// Connect to the shared Redis database described by `settings`.
    pub fn connect(settings: &RedisSettings) -> AppResult<Self> {
        Self::new(RedisBackend::connect(settings)?)
    }

    /// Replace the wall-clock used for derived fields.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replace the wall-clock used for derived fields in place.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Identifier of the bound backend.
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    // =========================================================================
    // Generic access
    // =========================================================================

    /// Read any registered field, stored or derived.
    ///
    /// Unset fields follow their [`Missing`] policy: `file_id` reads as 0 and
    /// persists it, `rotation_speed_idx` reads as 2 without writing, the overlay
    /// list reads as empty, everything else fails with `NotSet`.
    pub fn get(&mut self, name: &str) -> AppResult<FieldValue> {
        let spec = guard::check_readable(name)?;
        if spec.writable {
            self.read_stored(spec)
        } else {
            self.read_derived(spec.name)
        }
    }

    /// Validate and store a value.
    ///
    /// Unknown names fail with `UnknownField`, derived names with `ReadOnly`,
    /// rejected values with `Validation`. Nothing is written on failure.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> AppResult<()> {
        let spec = guard::check_assignable(name)?;
        let value = spec.prepare(value.into())?;
        self.store(spec, &value)
    }

    /// Parse operator text according to the field's kind, then [`set`](Self::set) it.
    pub fn set_text(&mut self, name: &str, text: &str) -> AppResult<()> {
        let spec = guard::check_assignable(name)?;
        let value = spec.kind.parse_text(spec.name, text)?;
        self.set(spec.name, value)
    }

    /// Remove a stored value so the field reads as unset again.
    pub fn unset(&mut self, name: &str) -> AppResult<()> {
        let spec = guard::check_assignable(name)?;
        self.backend.delete(spec.name)
    }

    /// Typed read.
    pub fn read<T: FieldType>(&mut self, key: Key<T>) -> AppResult<T> {
        let value = self.get(key.name)?;
        T::from_field(key.name, value)
    }

    /// Typed write.
    pub fn write<T>(&mut self, key: Key<T>, value: impl Into<FieldValue>) -> AppResult<()> {
        self.set(key.name, value)
    }

    fn read_stored(&mut self, spec: &FieldSpec) -> AppResult<FieldValue> {
        if spec.kind == FieldKind::JsonList {
            return self.read_list(spec);
        }
        match self.backend.get(spec.name)? {
            Some(raw) => spec.kind.decode(spec.name, &raw),
            None => match spec.missing {
                Missing::Fail | Missing::EmptyList => Err(EpocError::NotSet(spec.name.to_string())),
                Missing::Int { value, persist } => {
                    if persist {
                        info!("{} not set, initialising to {}", spec.name, value);
                        self.backend.set(spec.name, &value.to_string())?;
                    }
                    Ok(FieldValue::Int(value))
                }
            },
        }
    }

    fn read_list(&mut self, spec: &FieldSpec) -> AppResult<FieldValue> {
        let raw = self.backend.list_range(spec.name)?;
        if raw.is_empty() && spec.missing == Missing::Fail {
            return Err(EpocError::NotSet(spec.name.to_string()));
        }
        raw.iter()
            .map(|item| match FieldKind::Json.decode(spec.name, item)? {
                FieldValue::Json(json) => Ok(json),
                other => Ok(other.to_json()),
            })
            .collect::<AppResult<Vec<_>>>()
            .map(FieldValue::List)
    }

    fn store(&mut self, spec: &FieldSpec, value: &FieldValue) -> AppResult<()> {
        match value {
            FieldValue::List(items) => self.replace_list(spec.name, items),
            scalar => {
                debug!("{} = {}", spec.name, scalar);
                self.backend.set(spec.name, &scalar.encode())
            }
        }
    }

    fn replace_list(&mut self, name: &str, items: &[Json]) -> AppResult<()> {
        self.backend.delete(name)?;
        for item in items {
            self.backend.list_push(name, &item.to_string())?;
        }
        debug!("{} replaced with {} items", name, items.len());
        Ok(())
    }

    fn read_derived(&mut self, name: &str) -> AppResult<FieldValue> {
        let now = self.clock.now();
        match name {
            "today" => Ok(FieldValue::Str(now.format(DATE_FORMAT).to_string())),
            "year" => Ok(FieldValue::Str(now.format(YEAR_FORMAT).to_string())),
            "timestamp" => Ok(FieldValue::Str(now.format(TIMESTAMP_FORMAT).to_string())),
            "data_dir" => self.data_dir_at(now).map(FieldValue::Path),
            "work_dir" => self.work_dir_at(now).map(FieldValue::Path),
            "fname" => self.fname_at(now).map(FieldValue::Str),
            "fpath" => self.fpath_at(now).map(FieldValue::Path),
            "log_fpath" => self
                .fpath_at(now)
                .map(|p| FieldValue::Path(p.with_extension(LOG_EXTENSION))),
            other => Err(EpocError::UnknownField(other.to_string())),
        }
    }

    // =========================================================================
    // Named accessors
    // =========================================================================

    /// Current dataset counter. Initialises it to 0 when unset.
    pub fn file_id(&mut self) -> AppResult<i64> {
        self.read(FILE_ID)
    }

    /// Overwrite the dataset counter.
    pub fn set_file_id(&mut self, value: i64) -> AppResult<()> {
        self.write(FILE_ID, value)
    }

    /// Atomically advance `file_id` by one and return the new value.
    pub fn increment_file_id(&mut self) -> AppResult<i64> {
        let next = self.backend.incr(FILE_ID.name, 1)?;
        info!("file_id advanced to {}", next);
        Ok(next)
    }

    /// Path of the most recently recorded dataset.
    pub fn last_dataset(&mut self) -> AppResult<PathBuf> {
        self.read(LAST_DATASET)
    }

    /// Overlay annotations in order.
    pub fn overlays(&mut self) -> AppResult<Vec<Json>> {
        self.read(OVERLAYS)
    }

    /// Replace the overlay list (delete, then append each item).
    pub fn set_overlays(&mut self, items: Vec<Json>) -> AppResult<()> {
        self.write(OVERLAYS, items)
    }

    /// Append one overlay annotation.
    pub fn add_overlay(&mut self, item: Json) -> AppResult<()> {
        self.backend.list_push(OVERLAYS.name, &item.to_string())
    }

    // =========================================================================
    // Derived values
    // =========================================================================

    /// Current date, `YYYY-MM-DD`.
    pub fn today(&self) -> String {
        self.clock.now().format(DATE_FORMAT).to_string()
    }

    /// Current year, `YYYY`.
    pub fn year(&self) -> String {
        self.clock.now().format(YEAR_FORMAT).to_string()
    }

    /// Current time, `YYYY-MM-DD_HHMM` (24-hour clock).
    pub fn timestamp(&self) -> String {
        self.clock.now().format(TIMESTAMP_FORMAT).to_string()
    }

    /// `base_data_dir/affiliation/PI_name/year/project_id`
    pub fn work_dir(&mut self) -> AppResult<PathBuf> {
        let now = self.clock.now();
        self.work_dir_at(now)
    }

    /// `work_dir/today`
    pub fn data_dir(&mut self) -> AppResult<PathBuf> {
        let now = self.clock.now();
        self.data_dir_at(now)
    }

    /// `{file_id:03}_{project_id}_{measurement_tag}_{timestamp}`
    pub fn dataset_stem(&mut self) -> AppResult<String> {
        let now = self.clock.now();
        self.dataset_stem_at(now)
    }

    /// File name of the next dataset: the stem followed by `_master.h5`.
    pub fn fname(&mut self) -> AppResult<String> {
        let now = self.clock.now();
        self.fname_at(now)
    }

    /// Full path of the next dataset.
    pub fn fpath(&mut self) -> AppResult<PathBuf> {
        let now = self.clock.now();
        self.fpath_at(now)
    }

    /// Log file path for the next dataset.
    pub fn log_fpath(&mut self) -> AppResult<PathBuf> {
        Ok(self.fpath()?.with_extension(LOG_EXTENSION))
    }

    /// Prefix handed to the acquisition appliance, which appends `_master.h5`.
    pub fn file_prefix(&mut self) -> AppResult<PathBuf> {
        let now = self.clock.now();
        Ok(self.data_dir_at(now)?.join(self.dataset_stem_at(now)?))
    }

    fn work_dir_at(&mut self, now: NaiveDateTime) -> AppResult<PathBuf> {
        let base = self.read(BASE_DATA_DIR)?;
        let affiliation = self.read(AFFILIATION)?;
        let pi_name = self.read(PI_NAME)?;
        let project_id = self.read(PROJECT_ID)?;
        Ok(base
            .join(affiliation)
            .join(pi_name)
            .join(now.format(YEAR_FORMAT).to_string())
            .join(project_id))
    }

    fn data_dir_at(&mut self, now: NaiveDateTime) -> AppResult<PathBuf> {
        Ok(self
            .work_dir_at(now)?
            .join(now.format(DATE_FORMAT).to_string()))
    }

    fn dataset_stem_at(&mut self, now: NaiveDateTime) -> AppResult<String> {
        let file_id = self.file_id()?;
        let project_id = self.read(PROJECT_ID)?;
        let tag = self.read(MEASUREMENT_TAG)?;
        Ok(format!(
            "{:03}_{}_{}_{}",
            file_id,
            project_id,
            tag,
            now.format(TIMESTAMP_FORMAT)
        ))
    }

    fn fname_at(&mut self, now: NaiveDateTime) -> AppResult<String> {
        Ok(format!("{}_master{}", self.dataset_stem_at(now)?, DATA_EXTENSION))
    }

    fn fpath_at(&mut self, now: NaiveDateTime) -> AppResult<PathBuf> {
        let dir = self.data_dir_at(now)?;
        Ok(dir.join(self.fname_at(now)?))
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    /// Record `path` as the last dataset, then advance the counter.
    pub fn record_dataset(&mut self, path: &Path) -> AppResult<i64> {
        self.write(LAST_DATASET, path)?;
        self.increment_file_id()
    }

    /// Finalize after an acquisition: `last_dataset = fpath`, then `file_id += 1`.
    ///
    /// The path is computed with the counter value *before* the increment, so
    /// `last_dataset` names the file that was just written. Returns that path.
    pub fn after_write(&mut self) -> AppResult<PathBuf> {
        let path = self.fpath()?;
        self.record_dataset(&path)?;
        Ok(path)
    }

    /// Remove every key in the bound database.
    pub fn flush(&mut self) -> AppResult<()> {
        warn!("Flushing {}", self.backend.describe());
        self.backend.flush_db()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Capture all readable fields.
    ///
    /// Writable fields become entries, derived fields become commentary.
    /// Unset fields are left out; fields whose stored value cannot be decoded
    /// are left out with a warning.
    pub fn snapshot(&mut self) -> AppResult<Snapshot> {
        let mut snapshot = Snapshot::new(self.clock.now());
        for spec in field::fields() {
            match self.get(spec.name) {
                Ok(value) if spec.writable => snapshot.push(spec.name, value),
                Ok(value) => snapshot.push_info(spec.name, value),
                Err(EpocError::NotSet(_)) => {}
                Err(err @ EpocError::Decode { .. }) => {
                    warn!("Omitting {} from snapshot: {}", spec.name, err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(snapshot)
    }

    /// Apply snapshot entries in document order. Not transactional.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> AppResult<usize> {
        for (name, value) in snapshot.entries() {
            self.set(name, value.clone())?;
        }
        Ok(snapshot.entries().len())
    }

    /// Write a snapshot document to `path`.
    pub fn save_snapshot(&mut self, path: &Path) -> AppResult<Snapshot> {
        let snapshot = self.snapshot()?;
        std::fs::write(path, snapshot.to_document()?)?;
        info!(
            "Saved {} fields to {}",
            snapshot.entries().len(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Load a snapshot document from `path`.
    ///
    /// The document is parsed (and unknown or read-only keys rejected) before
    /// anything is touched. With `flush_first` the database is then cleared.
    /// Entries are applied one by one; a failing entry leaves earlier ones in
    /// place. Returns the number of applied entries.
    pub fn load_snapshot(&mut self, path: &Path, flush_first: bool) -> AppResult<usize> {
        let text = std::fs::read_to_string(path)?;
        let snapshot = Snapshot::parse(&text)?;
        if flush_first {
            self.flush()?;
        }
        let applied = self.apply_snapshot(&snapshot)?;
        info!("Loaded {} fields from {}", applied, path.display());
        Ok(applied)
    }

    // =========================================================================
    // Display
    // =========================================================================

    /// Operator overview. Unset values are shown as `<not set>`.
    pub fn summary(&mut self) -> AppResult<String> {
        let mut out = String::from("Configuration:\n");
        for name in [
            PI_NAME.name,
            PROJECT_ID.name,
            AFFILIATION.name,
            field::DATA_DIR.name,
            field::WORK_DIR.name,
            field::FNAME.name,
        ] {
            out.push_str(&self.summary_line(name)?);
        }
        out.push('\n');
        out.push_str(&self.summary_line(LAST_DATASET.name)?);
        Ok(out)
    }

    fn summary_line(&mut self, name: &str) -> AppResult<String> {
        let shown = match self.get(name) {
            Ok(value) => value.to_string(),
            Err(EpocError::NotSet(_)) => "<not set>".to_string(),
            Err(err @ EpocError::Decode { .. }) => format!("<{err}>"),
            Err(err) => return Err(err),
        };
        Ok(format!("\t{name}: {shown}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::FixedClock;
    use tracing_test::traced_test;

    fn client() -> ConfigurationClient {
        ConfigurationClient::new(MemoryBackend::new())
            .unwrap()
            .with_clock(FixedClock::parse("2024-08-13 09:05:00").unwrap())
    }

    #[test]
    fn test_every_derived_field_resolves() {
        let mut cfg = client();
        cfg.set("PI_name", "PIName").unwrap();
        cfg.set("project_id", "ProjectID").unwrap();
        cfg.set("affiliation", "UniVie").unwrap();
        cfg.set("base_data_dir", "/data").unwrap();
        cfg.set("measurement_tag", "Tag").unwrap();
        for spec in field::fields().filter(|s| !s.writable) {
            assert!(cfg.get(spec.name).is_ok(), "{} did not resolve", spec.name);
        }
    }

    #[test]
    fn test_log_fpath_replaces_extension() {
        let mut cfg = client();
        cfg.set("PI_name", "PIName").unwrap();
        cfg.set("project_id", "ProjectID").unwrap();
        cfg.set("affiliation", "IP").unwrap();
        cfg.set("base_data_dir", "/data").unwrap();
        cfg.set("measurement_tag", "Tag").unwrap();
        assert_eq!(
            cfg.log_fpath().unwrap(),
            PathBuf::from("/data/IP/PIName/2024/ProjectID/2024-08-13/000_ProjectID_Tag_2024-08-13_0905_master.log")
        );
        assert_eq!(
            cfg.file_prefix().unwrap(),
            PathBuf::from("/data/IP/PIName/2024/ProjectID/2024-08-13/000_ProjectID_Tag_2024-08-13_0905")
        );
    }

    #[test]
    fn test_summary_tolerates_gaps() {
        let mut cfg = client();
        cfg.set("PI_name", "Erik").unwrap();
        let summary = cfg.summary().unwrap();
        assert!(summary.contains("PI_name: Erik"));
        assert!(summary.contains("project_id: <not set>"));
        assert!(summary.contains("last_dataset: <not set>"));
    }

    #[test]
    #[traced_test]
    fn test_snapshot_skips_undecodable_values() {
        let db = MemoryBackend::new();
        db.insert_raw("viewer_cmin", b"low");
        let mut cfg = ConfigurationClient::new(db.clone()).unwrap();
        cfg.set("PI_name", "Erik").unwrap();

        let snapshot = cfg.snapshot().unwrap();
        assert!(snapshot.get("viewer_cmin").is_none());
        assert!(snapshot.get("PI_name").is_some());
        assert!(logs_contain("Omitting viewer_cmin from snapshot"));
    }

    #[test]
    fn test_failed_ping_is_fatal() {
        struct Dead;
        impl KvBackend for Dead {
            fn describe(&self) -> String {
                "dead".into()
            }
            fn ping(&mut self) -> AppResult<()> {
                Err(EpocError::Backend("connection refused".into()))
            }
            fn get(&mut self, _: &str) -> AppResult<Option<Vec<u8>>> {
                unreachable!()
            }
            fn set(&mut self, _: &str, _: &str) -> AppResult<()> {
                unreachable!()
            }
            fn delete(&mut self, _: &str) -> AppResult<()> {
                unreachable!()
            }
            fn incr(&mut self, _: &str, _: i64) -> AppResult<i64> {
                unreachable!()
            }
            fn list_range(&mut self, _: &str) -> AppResult<Vec<Vec<u8>>> {
                unreachable!()
            }
            fn list_push(&mut self, _: &str, _: &str) -> AppResult<()> {
                unreachable!()
            }
            fn flush_db(&mut self) -> AppResult<()> {
                unreachable!()
            }
        }
        assert!(ConfigurationClient::new(Dead).is_err());
    }
}
