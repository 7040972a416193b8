//! Typed short identifiers for attribute tree children.
//!
//! Identifiers are opaque caller-chosen strings (usually 4 or 8 hex digits)
//! that are unique within their immediate parent. They are combined with
//! the application's UUID base to form the full 128-bit UUID.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

macro_rules! define_id {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Wrap a short identifier.
            ///
            /// # Errors
            ///
            /// Returns [`ValidationError::EmptyId`] when `value` is blank.
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(ValidationError::EmptyId);
                }
                Ok(Self(value))
            }

            /// Borrow the identifier text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// Identifier of a [`Service`](crate::gatt::Service) within its application.
    ServiceId
);

define_id!(
    /// Identifier of a [`Characteristic`](crate::gatt::Characteristic) within its service.
    CharId
);

define_id!(
    /// Identifier of a [`Descriptor`](crate::gatt::Descriptor) within its characteristic.
    DescrId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_reject_empty_identifier() {
        assert!(matches!(ServiceId::new(""), Err(ValidationError::EmptyId)));
        assert!(matches!(CharId::new("   "), Err(ValidationError::EmptyId)));
    }

    #[test]
    fn should_roundtrip_through_display_and_from_str() {
        let id = DescrId::new("4455").unwrap();
        let parsed: DescrId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.as_str(), "4455");
    }
}
