//! Keeping the audit log of executed commands.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::Utc;
use log::debug;
use crate::api::history::CommandAuditData;
use crate::commons::eventsourcing::{AggregateId, VersionedId};
use crate::constants::AUDIT_MAX_RECENT_COMMANDS;
use super::commands::CaCommand;


//------------ CommandAudit --------------------------------------------------

/// The audit log of all commands that had an effect.
///
/// Records are only added by the command engine while it commits a
/// transaction. Records of deleted CAs are kept but marked as deleted.
#[derive(Debug)]
pub struct CommandAudit {
    records: RwLock<Vec<CommandAuditData>>,
    next_id: AtomicU64,
}

impl Default for CommandAudit {
    fn default() -> Self {
        CommandAudit {
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl CommandAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the record for a command.
    ///
    /// The `ca` is the CA and its version after the command was committed.
    pub fn record(
        &self, ca: VersionedId, command: &CaCommand, events: &[String]
    ) -> CommandAuditData {
        let record = CommandAuditData {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            executed_at: Utc::now(),
            ca,
            actor: command.actor().name().to_string(),
            command_type: command.command_type(),
            command_group: command.group(),
            summary: command.summary(),
            events: events.join("\n"),
            deleted_at: None,
        };
        debug!("Audit: {}", record);
        self.records.write().expect("poisoned lock").push(record.clone());
        record
    }

    /// Returns the most recent commands for a CA, newest first.
    pub fn find_most_recent_commands_for_ca(
        &self, ca: AggregateId
    ) -> Vec<CommandAuditData> {
        self.records.read().expect("poisoned lock").iter().rev().filter(
            |record| record.ca.id() == ca && !record.is_deleted()
        ).take(AUDIT_MAX_RECENT_COMMANDS).cloned().collect()
    }

    /// Returns the commands that produced versions after the given one.
    ///
    /// The commands are returned in the order they were executed.
    pub fn find_commands_since_ca_version(
        &self, ca: VersionedId
    ) -> Vec<CommandAuditData> {
        self.records.read().expect("poisoned lock").iter().filter(|record| {
            record.ca.id() == ca.id()
                && record.ca.version() > ca.version()
                && !record.is_deleted()
        }).cloned().collect()
    }

    /// Marks all records for a CA as deleted, returning how many.
    pub fn delete_commands_for_ca(&self, ca: AggregateId) -> usize {
        let now = Utc::now();
        let mut count = 0;
        for record in self.records.write().expect("poisoned lock").iter_mut() {
            if record.ca.id() == ca && !record.is_deleted() {
                record.deleted_at = Some(now);
                count += 1;
            }
        }
        count
    }
}


//------------ Tests ---------------------------------------------------------
