//! callie-lib — Phone assistant engine.
//!
//! Outbound calls, the conversation relay server, briefing assembly, the
//! daily scheduler, and vendor clients. Depends on callie-core for pure types
//! and text processing.

pub mod briefing;
pub mod config;
pub mod context;
pub mod dominos;
pub mod llm;
pub mod notify;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod sources;
pub mod telephony;

// Re-export callie-core for convenience
pub use callie_core;
