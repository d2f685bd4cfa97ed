//! The _rpkicore_ library crate.
//!
//! Keeps the configuration of RPKI certificate authorities consistent with
//! the resources they hold and with the routes seen in BGP.

pub mod api;
pub mod commons;
pub mod config;
pub mod constants;
pub mod server;

#[cfg(test)]
pub mod test;
