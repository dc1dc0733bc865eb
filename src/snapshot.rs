//! Snapshot documents
//!
//! A snapshot is the exportable set of field values as a YAML document:
//!
//! ```text
//! # epoc configuration snapshot
//! # generated 2024-08-13 09:05:00
//! #
//! # read-only values at the time of export:
//! # today: 2024-08-13
//! # data_dir: /data/UniVie/Erik/2024/epoc/2024-08-13
//! #
//! PI_name: Erik
//! project_id: epoc
//! file_id: 3
//! ```
//!
//! Writable fields are regular entries in registry order. Derived fields are
//! written as comments only and ignored on load. Loading accepts any subset of
//! the writable fields; keys that are unknown or name a derived field reject
//! the whole document.

use chrono::NaiveDateTime;
use serde_yaml::{Mapping, Value as Yaml};

use crate::error::{AppResult, EpocError};
use crate::field::FieldValue;
use crate::guard;

/// Ordered field values for bulk export and import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    generated: Option<NaiveDateTime>,
    entries: Vec<(String, FieldValue)>,
    info: Vec<(String, FieldValue)>,
}

impl Snapshot {
    /// Empty snapshot stamped with its generation time.
    pub fn new(generated: NaiveDateTime) -> Self {
        Self {
            generated: Some(generated),
            ..Self::default()
        }
    }

    /// Add (or replace) a writable entry.
    pub fn push(&mut self, name: &str, value: FieldValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Add an informational (read-only) value.
    pub fn push_info(&mut self, name: &str, value: FieldValue) {
        self.info.push((name.to_string(), value));
    }

    /// Writable entries in order.
    pub fn entries(&self) -> &[(String, FieldValue)] {
        &self.entries
    }

    /// Informational values in order.
    pub fn info(&self) -> &[(String, FieldValue)] {
        &self.info
    }

    /// Value of a writable entry.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// True when there are no writable entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the YAML document.
    pub fn to_document(&self) -> AppResult<String> {
        let mut out = String::from("# epoc configuration snapshot\n");
        if let Some(generated) = self.generated {
            out.push_str(&format!("# generated {}\n", generated.format("%Y-%m-%d %H:%M:%S")));
        }
        out.push_str("#\n");
        if !self.info.is_empty() {
            out.push_str("# read-only values at the time of export:\n");
            for (name, value) in &self.info {
                out.push_str(&comment_line(name, value));
            }
            out.push_str("#\n");
        }

        let mut mapping = Mapping::new();
        for (name, value) in &self.entries {
            mapping.insert(Yaml::String(name.clone()), value.to_yaml()?);
        }
        if !mapping.is_empty() {
            out.push_str(&serde_yaml::to_string(&mapping)?);
        }
        Ok(out)
    }

    /// Parse a YAML document into writable entries.
    ///
    /// Comments are ignored. Every key must name a writable field and every
    /// value must have the field's type; validators run later, when the
    /// entries are applied.
    pub fn parse(text: &str) -> AppResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mapping = match serde_yaml::from_str::<Yaml>(text)? {
            Yaml::Null => return Ok(Self::default()),
            Yaml::Mapping(mapping) => mapping,
            _ => {
                return Err(EpocError::Snapshot(
                    "top level of a snapshot must be a mapping".to_string(),
                ))
            }
        };

        let mut snapshot = Self::default();
        for (key, value) in mapping {
            let name = key.as_str().ok_or_else(|| {
                EpocError::Snapshot(format!("snapshot keys must be strings, got {key:?}"))
            })?;
            let spec = guard::check_assignable(name)?;
            let value = spec.kind.from_yaml(spec.name, value)?;
            snapshot.push(spec.name, value);
        }
        Ok(snapshot)
    }
}

/// `# name: value`, with every further line of the value commented too.
fn comment_line(name: &str, value: &FieldValue) -> String {
    let text = value.to_string();
    let mut lines = text.split(['\r', '\n']);
    let mut out = format!("# {name}: {}\n", lines.next().unwrap_or_default());
    for line in lines {
        out.push_str(&format!("#   {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn generated() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 8, 13)
            .and_then(|d| d.and_hms_opt(9, 5, 0))
            .unwrap()
    }

    #[test]
    fn test_document_layout() {
        let mut snapshot = Snapshot::new(generated());
        snapshot.push_info("today", FieldValue::Str("2024-08-13".into()));
        snapshot.push("PI_name", FieldValue::Str("Erik".into()));
        snapshot.push("file_id", FieldValue::Int(3));

        let doc = snapshot.to_document().unwrap();
        let lines: Vec<&str> = doc.lines().collect();
        assert_eq!(lines[0], "# epoc configuration snapshot");
        assert_eq!(lines[1], "# generated 2024-08-13 09:05:00");
        assert!(lines.contains(&"# today: 2024-08-13"));
        let pi = lines.iter().position(|l| *l == "PI_name: Erik").unwrap();
        let id = lines.iter().position(|l| *l == "file_id: 3").unwrap();
        assert!(pi < id);
    }

    #[test]
    fn test_document_reads_back() {
        let mut snapshot = Snapshot::new(generated());
        snapshot.push_info("data_dir", FieldValue::Path("/data/x".into()));
        snapshot.push("PI_name", FieldValue::Str("Erik".into()));
        snapshot.push("base_data_dir", FieldValue::Path("/some/random/path".into()));
        snapshot.push("viewer_interval", FieldValue::Float(200.0));
        snapshot.push("beam_center", FieldValue::Json(json!([512, 256])));
        snapshot.push(
            "overlays",
            FieldValue::List(vec![json!({"type": "circle", "r": 5}), json!("text")]),
        );

        let parsed = Snapshot::parse(&snapshot.to_document().unwrap()).unwrap();
        assert_eq!(parsed.entries(), snapshot.entries());
        assert!(parsed.info().is_empty());
    }

    #[test]
    fn test_multiline_info_stays_commented() {
        let mut snapshot = Snapshot::new(generated());
        snapshot.push_info(
            "data_dir",
            FieldValue::Path("/data\nviewer_cmin: 99/IP/A/2024/B/2024-08-13".into()),
        );
        snapshot.push("PI_name", FieldValue::Str("Erik".into()));

        let doc = snapshot.to_document().unwrap();
        assert!(doc.contains("# data_dir: /data\n#   viewer_cmin: 99/IP/A/2024/B/2024-08-13\n"));
        assert!(doc.lines().all(|l| l.starts_with('#') || l.starts_with("PI_name")));

        let parsed = Snapshot::parse(&doc).unwrap();
        assert_eq!(parsed.entries(), snapshot.entries());
    }

    #[test]
    fn test_partial_document() {
        let parsed = Snapshot::parse("viewer_interval: 100\nfile_id: 7\n").unwrap();
        assert_eq!(parsed.entries().len(), 2);
        assert_eq!(parsed.get("viewer_interval"), Some(&FieldValue::Float(100.0)));
        assert_eq!(parsed.get("file_id"), Some(&FieldValue::Int(7)));
    }

    #[test]
    fn test_paths_are_normalized_on_parse() {
        let parsed = Snapshot::parse("base_data_dir: /some/random/path/\n").unwrap();
        assert_eq!(
            parsed.get("base_data_dir"),
            Some(&FieldValue::Path(PathBuf::from("/some/random/path")))
        );
    }

    #[test]
    fn test_empty_and_comment_only_documents() {
        assert!(Snapshot::parse("").unwrap().is_empty());
        assert!(Snapshot::parse("# nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Snapshot::parse("PI_name: Erik\nexptime: 3\n").unwrap_err();
        assert!(matches!(err, EpocError::UnknownField(name) if name == "exptime"));
    }

    #[test]
    fn test_derived_key_rejected() {
        let err = Snapshot::parse("data_dir: /tmp\n").unwrap_err();
        assert!(matches!(err, EpocError::ReadOnly(_)));
    }

    #[test]
    fn test_wrong_type_rejected() {
        assert!(matches!(
            Snapshot::parse("nrows: many\n"),
            Err(EpocError::Validation { .. })
        ));
        assert!(matches!(
            Snapshot::parse("- PI_name\n"),
            Err(EpocError::Snapshot(_))
        ));
    }
}
