//! # DSS Common Library
//!
//! Shared code for the DSS fulfillment services including:
//! - Error types
//! - Event types (DssEvent) and the EventBus
//! - Configuration file discovery and TOML loading
//! - Wire timestamp handling
//! - SSE stream helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;
pub mod time;

pub use error::{Error, Result};
pub use events::{ConnectionState, DssEvent, EventBus};
