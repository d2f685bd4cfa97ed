//! Inspecting the command history.

use std::fmt;
use std::str::FromStr;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use crate::commons::eventsourcing::VersionedId;


//------------ CommandGroup --------------------------------------------------

/// Who initiated a command.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandGroup {
    /// A command sent on behalf of a user.
    User,

    /// A command sent by the system itself.
    System,
}

impl fmt::Display for CommandGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CommandGroup::User => "USER",
            CommandGroup::System => "SYSTEM",
        })
    }
}


//------------ CommandType ---------------------------------------------------

/// The type of a CA command.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
pub enum CommandType {
    CreateCertificateAuthority,
    UpdateIncomingCertificate,
    RevokeIncomingCertificate,
    SubscribeToRoaAlert,
    UnsubscribeFromRoaAlert,
    UpdateRoaAlertIgnoredAnnouncedRoutes,
    UpdateAspaConfiguration,
    DeleteCertificateAuthority,
}

impl CommandType {
    /// All command types.
    pub const ALL: &'static [CommandType] = &[
        CommandType::CreateCertificateAuthority,
        CommandType::UpdateIncomingCertificate,
        CommandType::RevokeIncomingCertificate,
        CommandType::SubscribeToRoaAlert,
        CommandType::UnsubscribeFromRoaAlert,
        CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes,
        CommandType::UpdateAspaConfiguration,
        CommandType::DeleteCertificateAuthority,
    ];

    pub fn group(self) -> CommandGroup {
        match self {
            CommandType::CreateCertificateAuthority
            | CommandType::UpdateIncomingCertificate
            | CommandType::RevokeIncomingCertificate => CommandGroup::System,
            CommandType::SubscribeToRoaAlert
            | CommandType::UnsubscribeFromRoaAlert
            | CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes
            | CommandType::UpdateAspaConfiguration
            | CommandType::DeleteCertificateAuthority => CommandGroup::User,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandType::CreateCertificateAuthority => {
                "CreateCertificateAuthority"
            }
            CommandType::UpdateIncomingCertificate => {
                "UpdateIncomingCertificate"
            }
            CommandType::RevokeIncomingCertificate => {
                "RevokeIncomingCertificate"
            }
            CommandType::SubscribeToRoaAlert => "SubscribeToRoaAlert",
            CommandType::UnsubscribeFromRoaAlert => "UnsubscribeFromRoaAlert",
            CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes => {
                "UpdateRoaAlertIgnoredAnnouncedRoutes"
            }
            CommandType::UpdateAspaConfiguration => "UpdateAspaConfiguration",
            CommandType::DeleteCertificateAuthority => {
                "DeleteCertificateAuthority"
            }
        }
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandType::ALL.iter().copied().find(|command_type| {
            command_type.name() == s
        }).ok_or_else(|| format!("unknown command type '{}'", s))
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


//------------ CommandAuditData ----------------------------------------------

/// The audit record of an executed command.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CommandAuditData {
    pub id: u64,

    /// When the command was executed.
    pub executed_at: DateTime<Utc>,

    /// The CA and its version after the command was committed.
    pub ca: VersionedId,

    /// The principal that sent the command.
    pub actor: String,

    pub command_type: CommandType,
    pub command_group: CommandGroup,
    pub summary: String,

    /// The descriptions of all events, one per line.
    pub events: String,

    /// When the record was marked as deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CommandAuditData {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns the individual event descriptions.
    pub fn event_lines(&self) -> impl Iterator<Item = &str> {
        self.events.lines().filter(|line| !line.is_empty())
    }
}

impl fmt::Display for CommandAuditData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}::{}::{}::{}::{}",
            self.executed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.command_group,
            self.command_type,
            self.ca,
            self.summary,
        )
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_names() {
        for command_type in CommandType::ALL {
            assert_eq!(
                CommandType::from_str(command_type.name()),
                Ok(*command_type)
            );
        }
        assert!(CommandType::from_str("Nope").is_err());
        assert_eq!(
            CommandType::UpdateAspaConfiguration.group(),
            CommandGroup::User
        );
        assert_eq!(
            CommandType::UpdateIncomingCertificate.group(),
            CommandGroup::System
        );
    }
}
