//! Assignment guard for name-based writes.
//!
//! Writes addressed by a field name (CLI, snapshot documents, scripting) go
//! through [`check_assignable`]. A misspelled name fails loudly instead of
//! creating a key nobody reads.

use crate::error::{AppResult, EpocError};
use crate::field::{self, FieldSpec};

/// Resolve `name` to a writable registry entry.
///
/// Fails with `UnknownField` for unregistered names and `ReadOnly` for
/// derived fields.
pub fn check_assignable(name: &str) -> AppResult<&'static FieldSpec> {
    match field::lookup(name) {
        Some(spec) if spec.writable => Ok(spec),
        Some(spec) => Err(EpocError::ReadOnly(spec.name.to_string())),
        None => Err(EpocError::UnknownField(name.to_string())),
    }
}

/// Resolve `name` to any registry entry, for reads.
pub fn check_readable(name: &str) -> AppResult<&'static FieldSpec> {
    field::lookup(name).ok_or_else(|| EpocError::UnknownField(name.to_string()))
}
