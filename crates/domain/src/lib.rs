//! # gattkit-domain
//!
//! Pure domain model for a BLE GATT peripheral.
//!
//! ## Responsibilities
//! - Foundational types: short identifiers, UUID composition, object paths,
//!   error conventions, timestamps
//! - Define the **GATT tree**: services own characteristics, characteristics
//!   own descriptors, each guarding its own value and callbacks
//! - Define the **flag vocabulary** forwarded verbatim to the publisher
//! - Define **Events** (named records published on an application's bus)
//! - Define the **pairing capability** vocabulary
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod path;
pub mod uuid_base;

pub mod event;
pub mod flags;
pub mod gatt;
pub mod pairing;
