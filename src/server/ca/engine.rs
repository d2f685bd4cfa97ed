//! Executing commands against certificate authorities.
//!
//! Every command is executed in its own transaction on the CA store. The
//! handler for the command type loads and changes the CA and publishes
//! events about what it did. The events are delivered synchronously to the
//! event listeners, which keep derived configuration consistent as part of
//! the same transaction. If the transaction conflicts with another one, the
//! whole command is tried again.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use log::{debug, error, info, trace, warn};
use crate::api::history::{CommandGroup, CommandType};
use crate::commons::error::Error;
use crate::commons::eventsourcing::{
    Aggregate, AggregateId, AggregateStore, LockMode, PropagationScope,
    Transaction, VersionedId,
};
use crate::commons::util::log_context;
use crate::commons::util::metrics::{Metric, Target};
use crate::config::Config;
use crate::server::bgp::AnnouncementIndex;
use super::alerts::RoaAlertMaintenance;
use super::aspa::AspaConfigurationMaintenance;
use super::audit::CommandAudit;
use super::certauth::CertificateAuthority;
use super::commands::CaCommand;
use super::events::CaEvent;
use super::handlers;
use super::metrics::{CommandMetrics, CommandOutcome};


//------------ CommandHandler ------------------------------------------------

/// Processes the commands of one type.
pub trait CommandHandler: Send + Sync {
    /// The command type this handler is responsible for.
    fn command_type(&self) -> CommandType;

    /// Applies the command.
    ///
    /// Return [`Error::NoEffect`] if there was nothing to do. Any other
    /// error aborts the whole command.
    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error>;
}


//------------ CaEventListener -----------------------------------------------

/// Reacts to events while the command that caused them is executed.
pub trait CaEventListener: Send + Sync {
    fn listen(
        &self, ctx: &mut CommandContext, event: &CaEvent
    ) -> Result<(), Error>;
}


//------------ CommandStatus -------------------------------------------------

/// The result of executing a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandStatus {
    /// Whether the command changed anything.
    pub has_effect: bool,

    /// The CA and its version after the command.
    pub id: VersionedId,
}


//------------ CommandEngineBuilder ------------------------------------------

pub struct CommandEngineBuilder {
    config: Arc<Config>,
    store: Option<Arc<AggregateStore<CertificateAuthority>>>,
    audit: Option<Arc<CommandAudit>>,
    bgp: Option<Arc<AnnouncementIndex>>,
    handlers: HashMap<CommandType, Arc<dyn CommandHandler>>,
    listeners: Vec<Arc<dyn CaEventListener>>,
}

impl CommandEngineBuilder {
    pub fn new(config: Arc<Config>) -> Self {
        CommandEngineBuilder {
            config,
            store: None,
            audit: None,
            bgp: None,
            handlers: HashMap::new(),
            listeners: Vec::new(),
        }
    }

    pub fn store(mut self, store: Arc<AggregateStore<CertificateAuthority>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit(mut self, audit: Arc<CommandAudit>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn bgp(mut self, bgp: Arc<AnnouncementIndex>) -> Self {
        self.bgp = Some(bgp);
        self
    }

    /// Registers a handler, replacing any handler for the same type.
    pub fn handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        if let Some(old) = self.handlers.insert(handler.command_type(), handler) {
            debug!("Replaced handler for {}", old.command_type());
        }
        self
    }

    /// Registers the handlers for all command types.
    pub fn default_handlers(self) -> Self {
        handlers::all().into_iter().fold(self, |builder, handler| {
            builder.handler(handler)
        })
    }

    /// Adds a listener subscribed for every command invocation.
    pub fn listener(mut self, listener: Arc<dyn CaEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Adds the listeners keeping derived configuration consistent.
    pub fn default_listeners(self) -> Self {
        self.listener(Arc::new(RoaAlertMaintenance))
            .listener(Arc::new(AspaConfigurationMaintenance))
    }

    /// Builds the engine.
    ///
    /// Fails if there is no handler for one of the command types.
    pub fn build(self) -> Result<CommandEngine, Error> {
        if let Some(missing) = CommandType::ALL.iter().find(|command_type| {
            !self.handlers.contains_key(command_type)
        }) {
            return Err(Error::MissingHandler(missing.to_string()))
        }
        let bgp = self.bgp.unwrap_or_else(|| {
            Arc::new(AnnouncementIndex::new(self.config.bgp))
        });
        Ok(CommandEngine {
            config: self.config,
            store: self.store.unwrap_or_default(),
            audit: self.audit.unwrap_or_default(),
            bgp,
            handlers: self.handlers,
            listeners: self.listeners,
            metrics: CommandMetrics::default(),
        })
    }
}


//------------ CommandEngine -------------------------------------------------

pub struct CommandEngine {
    config: Arc<Config>,
    store: Arc<AggregateStore<CertificateAuthority>>,
    audit: Arc<CommandAudit>,
    bgp: Arc<AnnouncementIndex>,
    handlers: HashMap<CommandType, Arc<dyn CommandHandler>>,
    listeners: Vec<Arc<dyn CaEventListener>>,
    metrics: CommandMetrics,
}

impl CommandEngine {
    /// Creates an engine with all built-in handlers and listeners.
    pub fn new(config: Arc<Config>) -> Result<Self, Error> {
        Self::builder(config).default_handlers().default_listeners().build()
    }

    pub fn builder(config: Arc<Config>) -> CommandEngineBuilder {
        CommandEngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &AggregateStore<CertificateAuthority> {
        &self.store
    }

    pub fn audit(&self) -> &CommandAudit {
        &self.audit
    }

    pub fn bgp(&self) -> &AnnouncementIndex {
        &self.bgp
    }

    pub fn metrics(&self) -> &CommandMetrics {
        &self.metrics
    }

    /// Returns a new CA id for creating a CA.
    ///
    /// The id is never handed out again, even if the command using it
    /// fails.
    pub fn get_next_id(&self) -> VersionedId {
        VersionedId::new(self.store.next_id(), 0)
    }

    /// Executes a command.
    pub fn execute(&self, command: &CaCommand) -> Result<CommandStatus, Error> {
        let _context = log_context::enter(format!(
            "{}:{}:{}",
            command.group(), command.command_type(), command.ca().id()
        ));
        let started = Instant::now();
        let res = self.execute_with_retries(command);
        self.metrics.record_duration(command.command_type(), started.elapsed());
        self.metrics.record_outcome(match &res {
            Ok(status) if status.has_effect => CommandOutcome::Success,
            Ok(_) => CommandOutcome::NoEffect,
            Err(_) => CommandOutcome::Failure,
        });
        res
    }

    fn execute_with_retries(
        &self, command: &CaCommand
    ) -> Result<CommandStatus, Error> {
        let max_attempts = self.config.commands.max_attempts.max(1);
        let mut retry = 0;
        loop {
            match self.execute_once(command) {
                Ok(status) => return Ok(status),
                Err(err) if err.is_transient() => {
                    if retry + 1 >= max_attempts {
                        error!(
                            "Error processing command after {} tries: {}: {}",
                            retry + 1, command, err
                        );
                        return Err(self.concurrent_modification(command))
                    }
                    let backoff = self.config.commands.backoff(retry);
                    retry += 1;
                    self.metrics.record_retry();
                    info!(
                        "Command failed with possibly transient error '{}', \
                         retry {} in {} ms: {}",
                        err, retry, backoff.as_millis(), command
                    );
                    thread::sleep(backoff);
                }
                Err(err) => {
                    if err.is_user_error() {
                        info!(
                            "Aborted a (user) command: {} for reason {}",
                            command, err
                        );
                    }
                    else {
                        warn!("Error processing command: {}: {}", command, err);
                    }
                    return Err(err)
                }
            }
        }
    }

    /// Runs a single attempt of a command in a fresh transaction.
    fn execute_once(&self, command: &CaCommand) -> Result<CommandStatus, Error> {
        let scope = PropagationScope::new();
        let tx = self.store.transaction(self.config.commands.lock_timeout());
        let mut ctx = CommandContext {
            engine: self,
            tx,
            scope: &scope,
            frames: Vec::new(),
            audits: Vec::new(),
            deleted_audits: Vec::new(),
        };
        let res = ctx.invoke(command);
        let CommandContext { tx, audits, deleted_audits, .. } = ctx;
        scope.reset();

        let status = match res {
            Ok(status) => status,
            Err(err) => {
                tx.rollback();
                return Err(err)
            }
        };

        tx.commit_with(|versions| {
            for ca in &deleted_audits {
                let count = self.audit.delete_commands_for_ca(*ca);
                debug!("Marked {} audit records of CA {} deleted", count, ca);
            }
            for pending in audits {
                let ca = pending.command.ca().id();
                let version = versions.get(ca).unwrap_or(pending.version);
                self.audit.record(
                    VersionedId::new(ca, version),
                    &pending.command,
                    &pending.events,
                );
            }
        })?;
        debug!("Command completed.");
        Ok(status)
    }

    fn concurrent_modification(&self, command: &CaCommand) -> Error {
        let ca = command.ca();
        Error::ConcurrentModification {
            ca: ca.id(),
            current_version: self.store.version(ca.id()).unwrap_or(
                ca.version()
            ),
            command_version: ca.version(),
            conflicting_commands: self.audit.find_commands_since_ca_version(ca),
        }
    }

    fn handler(
        &self, command_type: CommandType
    ) -> Result<Arc<dyn CommandHandler>, Error> {
        self.handlers.get(&command_type).cloned().ok_or_else(|| {
            Error::MissingHandler(command_type.to_string())
        })
    }

    /// Writes the engine metrics in Prometheus text format.
    pub fn write_metrics(&self, target: &mut Target) {
        self.metrics.write_metrics(target);
        target.single(
            Metric::gauge(
                "bgp_announcements", "number of indexed BGP announcements"
            ),
            self.bgp.len(),
        );
        target.single(
            Metric::gauge("cas", "number of certificate authorities"),
            self.store.ids().len(),
        );
    }
}


//------------ CommandContext ------------------------------------------------

/// Everything a handler or listener can use while a command is executed.
pub struct CommandContext<'a> {
    engine: &'a CommandEngine,
    tx: Transaction<'a, CertificateAuthority>,
    scope: &'a PropagationScope<dyn CaEventListener>,

    /// The invocations currently running, innermost last.
    frames: Vec<Frame>,

    /// Audit records to write when the transaction is committed.
    audits: Vec<PendingAudit>,

    /// CAs whose audit records are to be marked deleted on commit.
    deleted_audits: Vec<AggregateId>,
}

/// The events recorded by one command invocation.
#[derive(Default)]
struct Frame {
    events: Vec<String>,
}

struct PendingAudit {
    command: CaCommand,
    version: u64,
    events: Vec<String>,
}

/// # Transaction access
///
impl CommandContext<'_> {
    /// Locks a CA for the rest of the command.
    pub fn lock(&mut self, ca: AggregateId, mode: LockMode) -> Result<(), Error> {
        self.tx.lock(ca, mode)
    }

    /// Locks a CA exclusively and increments its version on commit.
    pub fn lock_and_increment(&mut self, ca: AggregateId) -> Result<(), Error> {
        self.tx.lock_and_increment(ca)
    }

    pub fn get(&mut self, ca: AggregateId) -> Result<&CertificateAuthority, Error> {
        self.tx.get(ca).ok_or(Error::UnknownCa(ca))
    }

    pub fn get_mut(
        &mut self, ca: AggregateId
    ) -> Result<&mut CertificateAuthority, Error> {
        self.tx.get_mut(ca).ok_or(Error::UnknownCa(ca))
    }

    /// Returns the id of a CA with the version it will have when committed.
    pub fn versioned_id(&mut self, ca: AggregateId) -> Result<VersionedId, Error> {
        self.tx.pending_version(ca).map(|version| {
            VersionedId::new(ca, version)
        }).ok_or(Error::UnknownCa(ca))
    }

    pub fn insert(&mut self, ca: CertificateAuthority) -> Result<(), Error> {
        let id = ca.id();
        if self.tx.insert(ca) {
            Ok(())
        }
        else {
            Err(Error::CaAlreadyExists(id))
        }
    }

    pub fn remove(&mut self, ca: AggregateId) -> Result<CertificateAuthority, Error> {
        self.tx.remove(ca).ok_or(Error::UnknownCa(ca))
    }

    /// Marks the audit records of a CA as deleted when committing.
    pub fn delete_audit_records(&mut self, ca: AggregateId) {
        self.deleted_audits.push(ca)
    }

    pub fn bgp(&self) -> &AnnouncementIndex {
        &self.engine.bgp
    }

    pub fn config(&self) -> &Config {
        &self.engine.config
    }

    /// Returns the number of command invocations currently running.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// # Events and nested commands
///
impl CommandContext<'_> {
    /// Records an event and delivers it to the listeners.
    ///
    /// The event becomes part of the audit record of the running command.
    /// Delivery happens right away. The first listener error is returned.
    pub fn publish(&mut self, event: CaEvent) -> Result<(), Error> {
        self.record_event(&event);
        for listener in self.scope.listeners() {
            listener.listen(self, &event)?;
        }
        Ok(())
    }

    /// Records an event without delivering it.
    pub fn record_event(&mut self, event: &CaEvent) {
        debug!("Event for CA {}: {}", event.ca(), event);
        if let Some(frame) = self.frames.last_mut() {
            frame.events.push(event.to_string())
        }
    }

    /// Executes a nested command as part of the current one.
    ///
    /// The nested command shares the transaction. It gets its own status
    /// and audit record.
    pub fn execute(&mut self, command: &CaCommand) -> Result<CommandStatus, Error> {
        self.invoke(command)
    }

    fn invoke(&mut self, command: &CaCommand) -> Result<CommandStatus, Error> {
        let engine = self.engine;
        let scope = self.scope;
        let handler = engine.handler(command.command_type())?;

        if command.group() == CommandGroup::User {
            self.check_concurrent_modification(command)?;
        }

        let _delegate = scope.enter();
        let _subscriptions: Vec<_> = engine.listeners.iter().map(|listener| {
            scope.subscribe(listener.clone())
        }).collect();

        trace!("Dispatching {} at depth {}", command, self.frames.len());
        self.frames.push(Frame::default());
        let res = handler.handle(self, command);
        let frame = self.frames.pop().unwrap_or_default();

        let ca = command.ca().id();
        let has_effect = match res {
            Ok(()) => true,
            Err(Error::NoEffect) => {
                debug!("Command without effect: {}", command);
                false
            }
            Err(err) => return Err(err),
        };
        let version = self.tx.pending_version(ca).or_else(|| {
            engine.store.version(ca)
        }).unwrap_or(command.ca().version());

        if has_effect && (
            command.group() == CommandGroup::User || !frame.events.is_empty()
        ) {
            self.audits.push(PendingAudit {
                command: command.clone(),
                version,
                events: frame.events,
            });
        }
        Ok(CommandStatus {
            has_effect,
            id: VersionedId::new(ca, version),
        })
    }

    /// Refuses user commands based on a version other users changed since.
    fn check_concurrent_modification(
        &mut self, command: &CaCommand
    ) -> Result<(), Error> {
        let id = command.ca();
        let current = match self.tx.get(id.id()) {
            Some(ca) => ca.version(),
            None => return Ok(()),
        };
        if id.version() >= current {
            return Ok(())
        }
        let conflicting: Vec<_> = self.engine.audit.find_commands_since_ca_version(
            id
        ).into_iter().filter(|record| {
            record.command_group == CommandGroup::User
        }).collect();
        if conflicting.is_empty() {
            return Ok(())
        }
        Err(Error::ConcurrentModification {
            ca: id.id(),
            current_version: current,
            command_version: id.version(),
            conflicting_commands: conflicting,
        })
    }
}


//------------ Tests ---------------------------------------------------------
