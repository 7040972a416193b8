//! Object paths and adapter identifiers.
//!
//! Every published attribute is addressed by a path derived from its
//! attachment position: `{base}/service{N}/char{M}/descr{K}`, zero-based.

use std::fmt;

use crate::error::ValidationError;

/// Root of the BlueZ object hierarchy.
pub const BLUEZ_ROOT: &str = "/org/bluez";

/// Adapter used when none is configured.
pub const DEFAULT_ADAPTER_ID: &str = "hci0";

/// A validated message-bus object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Validate and wrap an object path.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidObjectPath`] unless the path is `/`
    /// or a sequence of non-empty `[A-Za-z0-9_]` segments each preceded by `/`.
    pub fn new(path: impl Into<String>) -> Result<Self, ValidationError> {
        let path = path.into();
        if path == "/" {
            return Ok(Self(path));
        }
        let valid = path
            .strip_prefix('/')
            .is_some_and(|rest| rest.split('/').all(is_valid_segment));
        if valid {
            Ok(Self(path))
        } else {
            Err(ValidationError::InvalidObjectPath(path))
        }
    }

    /// Borrow the path text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a single segment.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidObjectPath`] if `segment` is not a
    /// valid path element.
    pub fn child(&self, segment: &str) -> Result<Self, ValidationError> {
        if !is_valid_segment(segment) {
            return Err(ValidationError::InvalidObjectPath(format!("{}/{segment}", self.0)));
        }
        Ok(self.join(segment))
    }

    /// Append `{kind}{index}`, e.g. `service0`.
    #[must_use]
    pub fn indexed(&self, kind: &'static str, index: usize) -> Self {
        self.join(&format!("{kind}{index}"))
    }

    /// Whether `self` equals `ancestor` or lies below it.
    #[must_use]
    pub fn starts_with(&self, ancestor: &ObjectPath) -> bool {
        self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0)
                && (ancestor.0 == "/" || self.0[ancestor.0.len()..].starts_with('/')))
    }

    fn join(&self, segment: &str) -> Self {
        if self.0 == "/" {
            Self(format!("/{segment}"))
        } else {
            Self(format!("{}/{segment}", self.0))
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Object path of an adapter, e.g. `/org/bluez/hci0`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidObjectPath`] when `adapter_id` is not a
/// valid path segment.
pub fn adapter_path(adapter_id: &str) -> Result<ObjectPath, ValidationError> {
    ObjectPath::new(BLUEZ_ROOT)?.child(adapter_id)
}

/// Extract the adapter id from a path under `/org/bluez/hci*`.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidAdapterPath`] when the path is not
/// below `/org/bluez` or the first segment lacks the `hci` prefix.
pub fn parse_adapter_id(path: &ObjectPath) -> Result<String, ValidationError> {
    let invalid = || ValidationError::InvalidAdapterPath(path.to_string());
    let rest = path
        .as_str()
        .strip_prefix(BLUEZ_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(invalid)?;
    let adapter_id = rest.split('/').next().unwrap_or_default();
    if !adapter_id.starts_with("hci") {
        return Err(invalid());
    }
    Ok(adapter_id.to_string())
}
