//! Common types used by the various components.
pub mod actor;
pub mod error;
pub mod eventsourcing;
pub mod util;
