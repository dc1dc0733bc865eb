//! Field registry - the static table of configuration fields.
//!
//! Every value the broker knows about is described by a [`FieldSpec`]: its name
//! (also the backend key), its [`FieldKind`], whether it may be assigned, what
//! happens when it is read while unset ([`Missing`]) and an optional
//! [`Validator`]. The client implements one generic get/set pair over this
//! table instead of one accessor per field.
//!
//! # Example
//!
//! ```rust
//! use epoc::field::{self, FieldKind};
//!
//! let spec = field::lookup("rotation_speed_idx").unwrap();
//! assert_eq!(spec.kind, FieldKind::Int);
//! assert!(spec.writable);
//! assert!(field::lookup("data_dir").map(|s| !s.writable).unwrap_or(false));
//! ```

use serde_json::Value as Json;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::{AppResult, EpocError};
use crate::label::sanitize_label;

// =============================================================================
// Kinds and values
// =============================================================================

/// Value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 text.
    Str,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// Filesystem path, stored in normalised POSIX form.
    Path,
    /// Arbitrary JSON value, stored JSON-encoded.
    Json,
    /// Ordered list of JSON values, stored as a backend list.
    JsonList,
}

impl FieldKind {
    /// Name used in error messages and the CLI field listing.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::Int => "integer",
            FieldKind::Float => "float",
            FieldKind::Path => "path",
            FieldKind::Json => "json",
            FieldKind::JsonList => "json list",
        }
    }

    /// Convert `value` to this kind, or fail with a validation error.
    ///
    /// Integers are accepted where floats are expected, strings where paths are
    /// expected, and anything JSON-representable where JSON is expected.
    pub fn coerce(&self, field: &str, value: FieldValue) -> AppResult<FieldValue> {
        let mismatch = |value: &FieldValue| {
            EpocError::validation(
                field,
                format!("expected {}, got {}", self.as_str(), value.kind_name()),
            )
        };
        match (self, value) {
            (FieldKind::Str, FieldValue::Str(s)) => Ok(FieldValue::Str(s)),
            (FieldKind::Int, FieldValue::Int(i)) => Ok(FieldValue::Int(i)),
            (FieldKind::Float, FieldValue::Float(f)) => Ok(FieldValue::Float(f)),
            (FieldKind::Float, FieldValue::Int(i)) => Ok(FieldValue::Float(i as f64)),
            (FieldKind::Path, FieldValue::Path(p)) => Ok(FieldValue::Path(normalize_path(&p))),
            (FieldKind::Path, FieldValue::Str(s)) => {
                Ok(FieldValue::Path(normalize_path(Path::new(&s))))
            }
            (FieldKind::Json, value) => Ok(FieldValue::Json(value.to_json())),
            (FieldKind::JsonList, FieldValue::List(items)) => Ok(FieldValue::List(items)),
            (FieldKind::JsonList, FieldValue::Json(Json::Array(items))) => {
                Ok(FieldValue::List(items))
            }
            (_, value) => Err(mismatch(&value)),
        }
    }

    /// Parse operator-supplied text (CLI arguments) as this kind.
    pub fn parse_text(&self, field: &str, text: &str) -> AppResult<FieldValue> {
        match self {
            FieldKind::Str => Ok(FieldValue::Str(text.to_string())),
            FieldKind::Int => text
                .trim()
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|e| EpocError::validation(field, format!("'{text}': {e}"))),
            FieldKind::Float => text
                .trim()
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|e| EpocError::validation(field, format!("'{text}': {e}"))),
            FieldKind::Path => Ok(FieldValue::Path(normalize_path(Path::new(text)))),
            FieldKind::Json | FieldKind::JsonList => {
                let json: Json = serde_json::from_str(text)
                    .map_err(|e| EpocError::validation(field, format!("invalid JSON: {e}")))?;
                self.coerce(field, FieldValue::Json(json))
            }
        }
    }

    /// Decode a stored scalar representation.
    pub fn decode(&self, field: &str, raw: &[u8]) -> AppResult<FieldValue> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| EpocError::decode(field, format!("invalid UTF-8: {e}")))?;
        match self {
            FieldKind::Str => Ok(FieldValue::Str(text.to_string())),
            FieldKind::Int => text
                .trim()
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|e| EpocError::decode(field, format!("'{text}' is not an integer: {e}"))),
            FieldKind::Float => text
                .trim()
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|e| EpocError::decode(field, format!("'{text}' is not a number: {e}"))),
            FieldKind::Path => Ok(FieldValue::Path(PathBuf::from(text))),
            FieldKind::Json => serde_json::from_str(text)
                .map(FieldValue::Json)
                .map_err(|e| EpocError::decode(field, format!("invalid JSON: {e}"))),
            FieldKind::JsonList => Err(EpocError::decode(field, "list fields are not scalar")),
        }
    }

    /// Convert a snapshot document value to this kind.
    pub fn from_yaml(&self, field: &str, value: serde_yaml::Value) -> AppResult<FieldValue> {
        use serde_yaml::Value as Yaml;
        let mismatch = |found: &str| {
            EpocError::validation(field, format!("expected {}, got {found}", self.as_str()))
        };
        match (self, value) {
            (FieldKind::Str, Yaml::String(s)) => Ok(FieldValue::Str(s)),
            (FieldKind::Str, Yaml::Number(n)) => Ok(FieldValue::Str(n.to_string())),
            (FieldKind::Str, Yaml::Bool(b)) => Ok(FieldValue::Str(b.to_string())),
            (FieldKind::Int, Yaml::Number(n)) => n
                .as_i64()
                .map(FieldValue::Int)
                .ok_or_else(|| mismatch(&format!("number {n}"))),
            (FieldKind::Float, Yaml::Number(n)) => n
                .as_f64()
                .map(FieldValue::Float)
                .ok_or_else(|| mismatch(&format!("number {n}"))),
            (FieldKind::Path, Yaml::String(s)) => {
                Ok(FieldValue::Path(normalize_path(Path::new(&s))))
            }
            (FieldKind::Json, value) => Ok(FieldValue::Json(serde_json::to_value(value)?)),
            (FieldKind::JsonList, Yaml::Sequence(items)) => items
                .into_iter()
                .map(|item| serde_json::to_value(item).map_err(EpocError::from))
                .collect::<AppResult<Vec<_>>>()
                .map(FieldValue::List),
            (_, Yaml::Null) => Err(mismatch("null")),
            (_, Yaml::Sequence(_)) => Err(mismatch("list")),
            (_, Yaml::Mapping(_)) => Err(mismatch("mapping")),
            (_, other) => Err(mismatch(&format!("{other:?}"))),
        }
    }
}

/// A field value as seen by callers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Text value.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Path value.
    Path(PathBuf),
    /// JSON value.
    Json(Json),
    /// Ordered JSON list.
    List(Vec<Json>),
}

impl FieldValue {
    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Str(_) => "string",
            FieldValue::Int(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::Path(_) => "path",
            FieldValue::Json(_) => "json",
            FieldValue::List(_) => "json list",
        }
    }

    /// Scalar store representation. Lists are encoded item by item instead.
    pub fn encode(&self) -> String {
        match self {
            FieldValue::Str(s) => s.clone(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Path(p) => p.to_string_lossy().into_owned(),
            FieldValue::Json(j) => j.to_string(),
            FieldValue::List(items) => Json::Array(items.clone()).to_string(),
        }
    }

    /// JSON view of the value.
    pub fn to_json(&self) -> Json {
        match self {
            FieldValue::Str(s) => Json::String(s.clone()),
            FieldValue::Int(i) => Json::from(*i),
            FieldValue::Float(f) => Json::from(*f),
            FieldValue::Path(p) => Json::String(p.to_string_lossy().into_owned()),
            FieldValue::Json(j) => j.clone(),
            FieldValue::List(items) => Json::Array(items.clone()),
        }
    }

    /// Snapshot document view of the value.
    pub fn to_yaml(&self) -> AppResult<serde_yaml::Value> {
        let value = match self {
            FieldValue::Str(s) => serde_yaml::to_value(s)?,
            FieldValue::Int(i) => serde_yaml::to_value(i)?,
            FieldValue::Float(f) => serde_yaml::to_value(f)?,
            FieldValue::Path(p) => serde_yaml::to_value(p.to_string_lossy().as_ref())?,
            FieldValue::Json(j) => serde_yaml::to_value(j)?,
            FieldValue::List(items) => serde_yaml::to_value(items)?,
        };
        Ok(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Path(p) => write!(f, "{}", p.display()),
            other => f.write_str(&other.encode()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<PathBuf> for FieldValue {
    fn from(value: PathBuf) -> Self {
        FieldValue::Path(value)
    }
}

impl From<&Path> for FieldValue {
    fn from(value: &Path) -> Self {
        FieldValue::Path(value.to_path_buf())
    }
}

impl From<Json> for FieldValue {
    fn from(value: Json) -> Self {
        FieldValue::Json(value)
    }
}

impl From<Vec<Json>> for FieldValue {
    fn from(value: Vec<Json>) -> Self {
        FieldValue::List(value)
    }
}

/// Drop trailing and repeated separators and `.` segments.
///
/// `/data/base/path/` becomes `/data/base/path`.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.components().collect()
}

// =============================================================================
// Validation and defaults
// =============================================================================

/// Check (and possibly rewrite) a value before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Strip characters outside `[A-Za-z0-9_]`.
    Label,
    /// Text must be one of the listed labels.
    OneOfStr(&'static [&'static str]),
    /// Integer must be one of the listed values.
    OneOfInt(&'static [i64]),
}

impl Validator {
    /// Validate `value` for `field`, returning the value to store.
    pub fn apply(&self, field: &str, value: FieldValue) -> AppResult<FieldValue> {
        match (self, value) {
            (Validator::Label, FieldValue::Str(s)) => Ok(FieldValue::Str(sanitize_label(&s))),
            (Validator::OneOfStr(allowed), FieldValue::Str(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(FieldValue::Str(s))
                } else {
                    Err(EpocError::validation(
                        field,
                        format!("possible values are {allowed:?}, got '{s}'"),
                    ))
                }
            }
            (Validator::OneOfInt(allowed), FieldValue::Int(i)) => {
                if allowed.contains(&i) {
                    Ok(FieldValue::Int(i))
                } else {
                    Err(EpocError::validation(
                        field,
                        format!("possible values are {allowed:?}, got {i}"),
                    ))
                }
            }
            (_, value) => Err(EpocError::validation(
                field,
                format!("validator {self:?} does not accept {}", value.kind_name()),
            )),
        }
    }
}

/// What a read of an unset field does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    /// Fail with `NotSet`.
    Fail,
    /// Return the integer default. With `persist` the default is written first.
    Int {
        /// Default value.
        value: i64,
        /// Write the default back on first read.
        persist: bool,
    },
    /// Return an empty list.
    EmptyList,
}

/// Labels accepted by `affiliation`.
pub const AFFILIATIONS: &[&str] = &["UniVie", "External", "IP"];

/// Indices accepted by `rotation_speed_idx`.
pub const ROTATION_SPEED_INDICES: &[i64] = &[0, 1, 2, 3];

/// Static description of one field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Field name and backend key.
    pub name: &'static str,
    /// Value type.
    pub kind: FieldKind,
    /// False for derived fields computed on read.
    pub writable: bool,
    /// Behaviour when unset.
    pub missing: Missing,
    /// Applied before every write.
    pub validator: Option<Validator>,
    /// One-line description for the field listing.
    pub description: &'static str,
}

impl FieldSpec {
    const fn stored(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            writable: true,
            missing: Missing::Fail,
            validator: None,
            description,
        }
    }

    const fn label(name: &'static str, description: &'static str) -> Self {
        Self {
            validator: Some(Validator::Label),
            ..Self::stored(name, FieldKind::Str, description)
        }
    }

    const fn derived(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            writable: false,
            ..Self::stored(name, kind, description)
        }
    }

    /// Run coercion and the validator, producing the value to store.
    pub fn prepare(&self, value: FieldValue) -> AppResult<FieldValue> {
        let value = self.kind.coerce(self.name, value)?;
        match &self.validator {
            Some(validator) => validator.apply(self.name, value),
            None => Ok(value),
        }
    }
}

/// All fields in declaration order. Snapshots follow this order.
pub static REGISTRY: &[FieldSpec] = &[
    FieldSpec::label(PI_NAME.name, "Principal investigator"),
    FieldSpec::label(PROJECT_ID.name, "Project identifier"),
    FieldSpec {
        validator: Some(Validator::OneOfStr(AFFILIATIONS)),
        ..FieldSpec::stored(AFFILIATION.name, FieldKind::Str, "Affiliation class")
    },
    FieldSpec::label(MEASUREMENT_TAG.name, "Tag identifying the measurement"),
    FieldSpec::stored(BASE_DATA_DIR.name, FieldKind::Path, "Root of the data tree"),
    FieldSpec {
        missing: Missing::Int {
            value: 0,
            persist: true,
        },
        ..FieldSpec::stored(FILE_ID.name, FieldKind::Int, "Counter used in file names")
    },
    FieldSpec::stored(LAST_DATASET.name, FieldKind::Path, "Path of the last recorded dataset"),
    FieldSpec {
        missing: Missing::Int {
            value: 2,
            persist: false,
        },
        validator: Some(Validator::OneOfInt(ROTATION_SPEED_INDICES)),
        ..FieldSpec::stored(ROTATION_SPEED_IDX.name, FieldKind::Int, "Goniometer speed index")
    },
    FieldSpec::stored(NROWS.name, FieldKind::Int, "Detector rows"),
    FieldSpec::stored(NCOLS.name, FieldKind::Int, "Detector columns"),
    FieldSpec::stored(FRAMES_TO_SUM.name, FieldKind::Int, "Frames summed per image"),
    FieldSpec::stored(BEAM_CENTER.name, FieldKind::Json, "Beam center in pixels"),
    FieldSpec::stored(VIEWER_INTERVAL.name, FieldKind::Float, "Viewer refresh interval"),
    FieldSpec::stored(VIEWER_CMIN.name, FieldKind::Float, "Viewer color scale minimum"),
    FieldSpec::stored(VIEWER_CMAX.name, FieldKind::Float, "Viewer color scale maximum"),
    FieldSpec::stored(XDS_TEMPLATE.name, FieldKind::Path, "XDS.INP template"),
    FieldSpec::stored(CAL_DIR.name, FieldKind::Path, "Detector calibration directory"),
    FieldSpec::stored(RECEIVER_ENDPOINT.name, FieldKind::Str, "Image stream endpoint"),
    FieldSpec::stored(TEMSERVER.name, FieldKind::Str, "Microscope control endpoint"),
    FieldSpec::stored(JFJOCH_HOST.name, FieldKind::Str, "Acquisition appliance URL"),
    FieldSpec {
        missing: Missing::EmptyList,
        ..FieldSpec::stored(OVERLAYS.name, FieldKind::JsonList, "Viewer overlay annotations")
    },
    FieldSpec::derived(TODAY.name, FieldKind::Str, "Current date, YYYY-MM-DD"),
    FieldSpec::derived(YEAR.name, FieldKind::Str, "Current year, YYYY"),
    FieldSpec::derived(TIMESTAMP.name, FieldKind::Str, "Current time, YYYY-MM-DD_HHMM"),
    FieldSpec::derived(DATA_DIR.name, FieldKind::Path, "Directory for today's data"),
    FieldSpec::derived(WORK_DIR.name, FieldKind::Path, "Directory for processing output"),
    FieldSpec::derived(FNAME.name, FieldKind::Str, "File name for the next dataset"),
    FieldSpec::derived(FPATH.name, FieldKind::Path, "Full path of the next dataset"),
    FieldSpec::derived(LOG_FPATH.name, FieldKind::Path, "Log file next to the next dataset"),
];

/// Find a field by name.
pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// Iterate all fields in declaration order.
pub fn fields() -> impl Iterator<Item = &'static FieldSpec> {
    REGISTRY.iter()
}

// =============================================================================
// Typed keys
// =============================================================================

/// Rust types that a field value can be read as.
pub trait FieldType: Sized {
    /// Extract from a value already coerced to the field's kind.
    fn from_field(field: &str, value: FieldValue) -> AppResult<Self>;
}

fn wrong_type<T>(field: &str, value: &FieldValue) -> AppResult<T> {
    Err(EpocError::decode(
        field,
        format!(
            "cannot read {} as {}",
            value.kind_name(),
            std::any::type_name::<T>()
        ),
    ))
}

impl FieldType for String {
    fn from_field(field: &str, value: FieldValue) -> AppResult<Self> {
        match value {
            FieldValue::Str(s) => Ok(s),
            other => wrong_type(field, &other),
        }
    }
}

impl FieldType for i64 {
    fn from_field(field: &str, value: FieldValue) -> AppResult<Self> {
        match value {
            FieldValue::Int(i) => Ok(i),
            other => wrong_type(field, &other),
        }
    }
}

impl FieldType for f64 {
    fn from_field(field: &str, value: FieldValue) -> AppResult<Self> {
        match value {
            FieldValue::Float(f) => Ok(f),
            FieldValue::Int(i) => Ok(i as f64),
            other => wrong_type(field, &other),
        }
    }
}

impl FieldType for PathBuf {
    fn from_field(field: &str, value: FieldValue) -> AppResult<Self> {
        match value {
            FieldValue::Path(p) => Ok(p),
            other => wrong_type(field, &other),
        }
    }
}

impl FieldType for Json {
    fn from_field(_field: &str, value: FieldValue) -> AppResult<Self> {
        Ok(match value {
            FieldValue::Json(j) => j,
            other => other.to_json(),
        })
    }
}

impl FieldType for Vec<Json> {
    fn from_field(field: &str, value: FieldValue) -> AppResult<Self> {
        match value {
            FieldValue::List(items) => Ok(items),
            other => wrong_type(field, &other),
        }
    }
}

/// Name of a field together with the Rust type it reads as.
pub struct Key<T> {
    /// Field name.
    pub name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Declare a key.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Registry entry for this key.
    pub fn spec(&self) -> Option<&'static FieldSpec> {
        lookup(self.name)
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.name)
    }
}

/// Principal investigator.
pub const PI_NAME: Key<String> = Key::new("PI_name");
/// Project identifier.
pub const PROJECT_ID: Key<String> = Key::new("project_id");
/// Affiliation class.
pub const AFFILIATION: Key<String> = Key::new("affiliation");
/// Tag identifying the measurement.
pub const MEASUREMENT_TAG: Key<String> = Key::new("measurement_tag");
/// Root of the data tree.
pub const BASE_DATA_DIR: Key<PathBuf> = Key::new("base_data_dir");
/// Counter used in file names.
pub const FILE_ID: Key<i64> = Key::new("file_id");
/// Path of the last recorded dataset.
pub const LAST_DATASET: Key<PathBuf> = Key::new("last_dataset");
/// Goniometer speed index.
pub const ROTATION_SPEED_IDX: Key<i64> = Key::new("rotation_speed_idx");
/// Detector rows.
pub const NROWS: Key<i64> = Key::new("nrows");
/// Detector columns.
pub const NCOLS: Key<i64> = Key::new("ncols");
/// Frames summed per image.
pub const FRAMES_TO_SUM: Key<i64> = Key::new("frames_to_sum");
/// Beam center in pixels.
pub const BEAM_CENTER: Key<Json> = Key::new("beam_center");
/// Viewer refresh interval.
pub const VIEWER_INTERVAL: Key<f64> = Key::new("viewer_interval");
/// Viewer color scale minimum.
pub const VIEWER_CMIN: Key<f64> = Key::new("viewer_cmin");
/// Viewer color scale maximum.
pub const VIEWER_CMAX: Key<f64> = Key::new("viewer_cmax");
/// XDS.INP template.
pub const XDS_TEMPLATE: Key<PathBuf> = Key::new("XDS_template");
/// Detector calibration directory.
pub const CAL_DIR: Key<PathBuf> = Key::new("cal_dir");
/// Image stream endpoint.
pub const RECEIVER_ENDPOINT: Key<String> = Key::new("receiver_endpoint");
/// Microscope control endpoint.
pub const TEMSERVER: Key<String> = Key::new("temserver");
/// Acquisition appliance URL.
pub const JFJOCH_HOST: Key<String> = Key::new("jfjoch_host");
/// Viewer overlay annotations.
pub const OVERLAYS: Key<Vec<Json>> = Key::new("overlays");
/// Current date, YYYY-MM-DD.
pub const TODAY: Key<String> = Key::new("today");
/// Current year, YYYY.
pub const YEAR: Key<String> = Key::new("year");
/// Current time, YYYY-MM-DD_HHMM.
pub const TIMESTAMP: Key<String> = Key::new("timestamp");
/// Directory for today's data.
pub const DATA_DIR: Key<PathBuf> = Key::new("data_dir");
/// Directory for processing output.
pub const WORK_DIR: Key<PathBuf> = Key::new("work_dir");
/// File name for the next dataset.
pub const FNAME: Key<String> = Key::new("fname");
/// Full path of the next dataset.
pub const FPATH: Key<PathBuf> = Key::new("fpath");
/// Log file next to the next dataset.
pub const LOG_FPATH: Key<PathBuf> = Key::new("log_fpath");
