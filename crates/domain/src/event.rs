//! Event — an immutable record of something that happened.
//!
//! Events travel through the application's event bus. The payload is
//! free-form JSON so that publishers and subscribers only share the name.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// UTC emission time of an event.
pub type Timestamp = DateTime<Utc>;

/// Names of the events published by an application.
pub mod names {
    /// A remote central enabled or disabled notifications.
    /// Data: `{"path": "...", "notifying": bool}`.
    pub const NOTIFYING: &str = "gatt.notifying";
    /// A characteristic value was written.
    /// Data: `{"path": "...", "len": n}`.
    pub const WRITTEN: &str = "gatt.written";
    /// The attribute tree was published.
    /// Data: `{"path": "...", "adapter": "..."}`.
    pub const APP_REGISTERED: &str = "app.registered";
}

/// A named event with an arbitrary payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    name: String,
    data: serde_json::Value,
    emitted_at: Timestamp,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            data,
            emitted_at: Utc::now(),
        }
    }

    /// The event name used for routing.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event payload.
    #[must_use]
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// When the event was emitted.
    #[must_use]
    pub fn emitted_at(&self) -> Timestamp {
        self.emitted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_expose_name_and_data() {
        let event = Event::new(names::WRITTEN, serde_json::json!({"len": 1}));
        assert_eq!(event.name(), "gatt.written");
        assert_eq!(event.data()["len"], 1);
    }

    #[test]
    fn should_stamp_emission_time() {
        let before = Utc::now();
        let event = Event::new(names::NOTIFYING, serde_json::Value::Null);
        assert!(event.emitted_at() >= before);
        assert!(event.emitted_at() <= Utc::now());
    }

    #[test]
    fn should_serialize_to_json() {
        let event = Event::new("custom", serde_json::json!(null));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "custom");
        assert!(json.get("emitted_at").is_some());
    }
}
