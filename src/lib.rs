//! Orchestra Conductor core
//!
//! Turns gestures captured by wearable BLE sensors into playback commands for
//! a set of virtual orchestral instruments and keeps the resulting playback
//! state synchronized across every observer.
//!
//! ## Layout
//!
//! - [`domain`] - data model, stroke aggregation, prediction interpretation,
//!   the command dispatcher, the synchronized store and per-client session
//! - [`infrastructure`] - BLE payload codec, characteristic routing, the
//!   ingest service, persistence adapters, logging and the host feed

pub mod domain;
pub mod infrastructure;
