//! Certificate authorities and the commands changing them.
//!
//! All changes to a [`CertificateAuthority`] go through the
//! [`CommandEngine`]. It runs the [`CommandHandler`] for a [`CaCommand`]
//! in a transaction, delivers the resulting [`CaEvent`]s to the
//! [`CaEventListener`]s and keeps the [`CommandAudit`] log.

pub use self::alerts::RoaAlertMaintenance;
pub use self::aspa::AspaConfigurationMaintenance;
pub use self::audit::CommandAudit;
pub use self::certauth::CertificateAuthority;
pub use self::commands::{CaCommand, CaCommandDetails};
pub use self::engine::{
    CaEventListener, CommandContext, CommandEngine, CommandEngineBuilder,
    CommandHandler, CommandStatus,
};
pub use self::events::CaEvent;
pub use self::metrics::{CommandMetrics, CommandOutcome};

mod alerts;
mod aspa;
mod audit;
mod certauth;
mod commands;
mod engine;
mod events;
pub mod handlers;
mod metrics;
