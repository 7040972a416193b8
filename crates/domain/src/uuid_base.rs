//! UUID composition from short identifiers.
//!
//! An application carries a 4-digit `uuid` and a `suffix`. A child with a
//! 4-digit id `x` gets `x + uuid + suffix`; an 8-digit id gets
//! `x + suffix`; an id that is already a full UUID is used verbatim.

use uuid::Uuid;

use crate::error::ValidationError;

/// Default application UUID fragment.
pub const DEFAULT_APP_UUID: &str = "1234";

/// Default suffix, the Bluetooth base UUID tail.
pub const DEFAULT_UUID_SUFFIX: &str = "-0000-1000-8000-00805F9B34FB";

/// Base used to expand short identifiers into 128-bit UUIDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidBase {
    app_uuid: String,
    suffix: String,
}

impl Default for UuidBase {
    fn default() -> Self {
        Self {
            app_uuid: DEFAULT_APP_UUID.to_string(),
            suffix: DEFAULT_UUID_SUFFIX.to_string(),
        }
    }
}

impl UuidBase {
    /// Create a base from an application UUID fragment and a suffix.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidUuid`] when the application's own
    /// UUID cannot be generated from the pair.
    pub fn new(app_uuid: impl Into<String>, suffix: impl Into<String>) -> Result<Self, ValidationError> {
        let base = Self {
            app_uuid: app_uuid.into(),
            suffix: suffix.into(),
        };
        base.app_uuid()?;
        Ok(base)
    }

    /// The application UUID fragment (e.g. `1234`).
    #[must_use]
    pub fn app_fragment(&self) -> &str {
        &self.app_uuid
    }

    /// The configured suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Expand a short identifier into a full UUID.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidUuid`] when the composed text is
    /// not a valid UUID.
    pub fn generate(&self, short: &str) -> Result<Uuid, ValidationError> {
        if let Ok(full) = Uuid::parse_str(short) {
            return Ok(full);
        }
        let text = if short.len() == 8 {
            format!("{short}{}", self.suffix)
        } else {
            format!("{short}{}{}", self.app_uuid, self.suffix)
        };
        Uuid::parse_str(&text).map_err(|source| ValidationError::InvalidUuid { value: text, source })
    }

    /// The application's own UUID, used for advertising.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidUuid`] when the fragment and suffix
    /// do not compose into a valid UUID.
    pub fn app_uuid(&self) -> Result<Uuid, ValidationError> {
        self.generate(&self.app_uuid)
    }
}
