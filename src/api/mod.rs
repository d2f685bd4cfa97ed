//! Data structures for the API, shared by the engine and its users.

pub mod alerts;
pub mod aspa;
pub mod bgp;
pub mod history;
pub mod resources;
