//! Bluetooth Module
//!
//! Turns notifications from the two gesture peripherals into state changes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     IngestService                        │
//! │  (Sequential event loop - public API for the binary)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!              ┌────────┴────────┐
//!              │                 │
//!              ▼                 ▼
//!       ┌────────────┐    ┌──────────┐
//!       │ Connection │    │ Protocol │
//!       │            │    │          │
//!       │ - UUID     │    │ - UUIDs  │
//!       │   routing  │    │ - Codec  │
//!       └────────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Characteristic UUIDs and the binary payload codec
//! - [`connection`] - Characteristic table per device role
//! - [`service`] - Event loop feeding aggregators, interpreter and store

pub mod connection;
pub mod protocol;
pub mod service;

pub use service::{BleEvent, IngestOutcome, IngestService};
