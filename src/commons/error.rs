//! Defines all engine errors.

use std::{error, fmt};
use rpki::repository::resources::Asn;
use crate::api::history::CommandAuditData;
use crate::api::resources::{ResourceSet, ResourceSetError};
use crate::commons::eventsourcing::AggregateId;


//------------ Error ---------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // Signals
    //-----------------------------------------------------------------

    /// A command handler found nothing to do.
    ///
    /// The engine converts this into a status without effect. It is never
    /// returned from a top-level execution.
    NoEffect,

    //-----------------------------------------------------------------
    // Concurrency
    //-----------------------------------------------------------------

    /// An aggregate was changed by another transaction since it was read.
    VersionConflict {
        id: AggregateId,
        expected: u64,
        found: Option<u64>,
    },

    /// An aggregate lock could not be acquired in time.
    LockTimeout(AggregateId),

    /// A command kept conflicting with other commands and was given up.
    ConcurrentModification {
        ca: AggregateId,
        current_version: u64,
        command_version: u64,
        conflicting_commands: Vec<CommandAuditData>,
    },

    //-----------------------------------------------------------------
    // Configuration
    //-----------------------------------------------------------------

    /// No handler is registered for a command type.
    MissingHandler(String),

    //-----------------------------------------------------------------
    // User input
    //-----------------------------------------------------------------

    /// The provided entity tag does not match the current one.
    EntityTagDoesNotMatch,

    /// An entity tag is required for the update.
    PreconditionRequired,

    /// A resource cannot be used for the purpose.
    IllegalResource(String),

    /// The CA does not hold the given resources.
    NotHolderOfResources(ResourceSet),

    /// Private use AS numbers cannot be used here.
    PrivateAsnsUsed(Vec<Asn>),

    /// A resource was listed more than once.
    DuplicateResource(String),

    /// The command is not valid.
    InvalidCommand(String),

    /// The resource string is invalid.
    ResourceSetError(ResourceSetError),

    //-----------------------------------------------------------------
    // Aggregates
    //-----------------------------------------------------------------

    UnknownCa(AggregateId),
    CaAlreadyExists(AggregateId),

    //-----------------------------------------------------------------
    // If we really don't know any more..
    //-----------------------------------------------------------------
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Returns whether retrying the whole command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::VersionConflict { .. } | Error::LockTimeout(_)
        )
    }

    /// Returns whether the error was caused by invalid user input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::EntityTagDoesNotMatch
                | Error::PreconditionRequired
                | Error::IllegalResource(_)
                | Error::NotHolderOfResources(_)
                | Error::PrivateAsnsUsed(_)
                | Error::DuplicateResource(_)
                | Error::InvalidCommand(_)
                | Error::ResourceSetError(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoEffect => write!(f, "Command has no effect"),
            Error::VersionConflict { id, expected, found } => {
                match found {
                    Some(found) => write!(
                        f,
                        "Aggregate {} was changed concurrently, \
                         expected version {} found {}",
                        id, expected, found
                    ),
                    None => write!(
                        f,
                        "Aggregate {} was removed concurrently, \
                         expected version {}",
                        id, expected
                    ),
                }
            }
            Error::LockTimeout(id) => {
                write!(f, "Timed out waiting for lock on aggregate {}", id)
            }
            Error::ConcurrentModification {
                ca, current_version, command_version, conflicting_commands
            } => {
                write!(
                    f,
                    "CA {} was modified concurrently, current version {} \
                     command version {}",
                    ca, current_version, command_version
                )?;
                if !conflicting_commands.is_empty() {
                    let summaries: Vec<_> = conflicting_commands.iter().map(
                        |cmd| cmd.summary.as_str()
                    ).collect();
                    write!(f, ", conflicting: {}", summaries.join(" "))?;
                }
                Ok(())
            }
            Error::MissingHandler(command_type) => {
                write!(f, "No handler for command type {}", command_type)
            }
            Error::EntityTagDoesNotMatch => {
                write!(f, "Entity tag does not match")
            }
            Error::PreconditionRequired => {
                write!(f, "An entity tag is required for this update")
            }
            Error::IllegalResource(msg) => {
                write!(f, "Illegal resource: {}", msg)
            }
            Error::NotHolderOfResources(resources) => {
                write!(f, "Not holder of resources: {}", resources)
            }
            Error::PrivateAsnsUsed(asns) => {
                let asns: Vec<_> = asns.iter().map(ToString::to_string).collect();
                write!(f, "Private AS numbers are not allowed: {}", asns.join(", "))
            }
            Error::DuplicateResource(msg) => {
                write!(f, "Duplicate resource: {}", msg)
            }
            Error::InvalidCommand(msg) => {
                write!(f, "Invalid command: {}", msg)
            }
            Error::ResourceSetError(e) => e.fmt(f),
            Error::UnknownCa(id) => write!(f, "Unknown CA: {}", id),
            Error::CaAlreadyExists(id) => write!(f, "CA {} already exists", id),
            Error::Custom(msg) => msg.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl From<ResourceSetError> for Error {
    fn from(e: ResourceSetError) -> Self {
        Error::ResourceSetError(e)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify() {
        let id = AggregateId::from(1);
        assert!(Error::LockTimeout(id).is_transient());
        assert!(Error::VersionConflict {
            id, expected: 1, found: Some(2)
        }.is_transient());
        assert!(!Error::EntityTagDoesNotMatch.is_transient());
        assert!(Error::EntityTagDoesNotMatch.is_user_error());
        assert!(Error::PrivateAsnsUsed(vec![]).is_user_error());
        assert!(!Error::custom("oops").is_user_error());
        assert!(!Error::ConcurrentModification {
            ca: id,
            current_version: 2,
            command_version: 1,
            conflicting_commands: vec![],
        }.is_transient());
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::ConcurrentModification {
                ca: AggregateId::from(7),
                current_version: 3,
                command_version: 1,
                conflicting_commands: vec![],
            }.to_string(),
            "CA 7 was modified concurrently, current version 3 command version 1"
        );
        assert_eq!(
            Error::PrivateAsnsUsed(vec![Asn::from_u32(64512)]).to_string(),
            "Private AS numbers are not allowed: AS64512"
        );
    }
}
