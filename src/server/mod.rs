//! The engine keeping CAs consistent with their resources.

pub mod bgp;
pub mod ca;
