//! # gattkit-app
//!
//! Application layer: use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `AdapterDirectory`: lookup and control of local controllers
//!   - `PeripheralPublisher`: export and withdraw attribute trees, signal changes
//!   - `AdvertisingController`: start and stop LE advertisements
//!   - `AgentRegistry`: register the pairing agent as the default one
//! - Define the **`Application`** use-case: build → run → advertise → close
//! - Define the **`PairingAgent`** and its pluggable policies
//! - Provide **in-process infrastructure** (event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `gattkit-domain` only (plus `tokio` for the dispatch task and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod agent;
pub mod application;
pub mod event_bus;
pub mod ports;
