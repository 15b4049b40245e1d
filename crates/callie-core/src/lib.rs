//! callie-core — Pure types and text processing.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod briefing;
pub mod error;
pub mod intent;
pub mod portfolio;
pub mod speech;
pub mod types;

pub use error::{CallieError, ErrorKind, Result};
