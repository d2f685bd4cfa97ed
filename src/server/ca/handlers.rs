//! The handlers for all CA commands.

use std::sync::Arc;
use log::{info, warn};
use rpki::repository::resources::Asn;
use crate::api::aspa::{AspaConfigurationData, AspaDuplicate};
use crate::api::history::CommandType;
use crate::api::resources::{ResourceSet, PRIVATE_USE_ASNS};
use crate::commons::error::Error;
use crate::commons::eventsourcing::LockMode;
use super::certauth::CertificateAuthority;
use super::commands::{CaCommand, CaCommandDetails};
use super::engine::{CommandContext, CommandHandler};
use super::events::CaEvent;


/// Returns a handler for every command type.
pub fn all() -> Vec<Arc<dyn CommandHandler>> {
    vec![
        Arc::new(CreateCaHandler),
        Arc::new(UpdateIncomingHandler),
        Arc::new(RevokeIncomingHandler),
        Arc::new(SubscribeToRoaAlertHandler),
        Arc::new(UnsubscribeFromRoaAlertHandler),
        Arc::new(UpdateRoaAlertIgnoredHandler),
        Arc::new(UpdateAspaConfigurationHandler),
        Arc::new(DeleteCaHandler),
    ]
}

fn unexpected(command: &CaCommand) -> Error {
    Error::custom(format!("handler received unexpected command {}", command))
}


//------------ CreateCaHandler -----------------------------------------------

pub struct CreateCaHandler;

impl CommandHandler for CreateCaHandler {
    fn command_type(&self) -> CommandType {
        CommandType::CreateCertificateAuthority
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::CreateCertificateAuthority { name } = command.details() else {
            return Err(unexpected(command))
        };
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        ctx.insert(CertificateAuthority::new(id, name.clone()))?;
        info!("Created CA '{}' with id {}", name, id);
        Ok(())
    }
}


//------------ UpdateIncomingHandler -----------------------------------------

pub struct UpdateIncomingHandler;

impl CommandHandler for UpdateIncomingHandler {
    fn command_type(&self) -> CommandType {
        CommandType::UpdateIncomingCertificate
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::UpdateIncomingCertificate {
            key, resources
        } = command.details() else {
            return Err(unexpected(command))
        };
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        if ctx.get(id)?.incoming_resources(key) == Some(resources) {
            return Err(Error::NoEffect)
        }
        ctx.get_mut(id)?.update_incoming(key, resources.clone());

        let ca = ctx.versioned_id(id)?;
        ctx.publish(CaEvent::IncomingCertificateUpdated {
            ca,
            key: key.clone(),
            resources: resources.clone(),
        })
    }
}


//------------ RevokeIncomingHandler -----------------------------------------

pub struct RevokeIncomingHandler;

impl CommandHandler for RevokeIncomingHandler {
    fn command_type(&self) -> CommandType {
        CommandType::RevokeIncomingCertificate
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::RevokeIncomingCertificate { key } = command.details() else {
            return Err(unexpected(command))
        };
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        if ctx.get(id)?.incoming_resources(key).is_none() {
            return Err(Error::NoEffect)
        }
        ctx.get_mut(id)?.revoke_incoming(key);

        let ca = ctx.versioned_id(id)?;
        ctx.publish(CaEvent::IncomingCertificateRevoked { ca, key: key.clone() })
    }
}


//------------ SubscribeToRoaAlertHandler ------------------------------------

pub struct SubscribeToRoaAlertHandler;

impl CommandHandler for SubscribeToRoaAlertHandler {
    fn command_type(&self) -> CommandType {
        CommandType::SubscribeToRoaAlert
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::SubscribeToRoaAlert {
            email, route_validity_states, frequency
        } = command.details() else {
            return Err(unexpected(command))
        };
        if email.trim().is_empty() {
            return Err(Error::InvalidCommand("email is required".into()))
        }
        if route_validity_states.is_empty() {
            return Err(Error::InvalidCommand(
                "route validity states are required".into()
            ))
        }
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        ctx.get_mut(id)?.roa_alerts_or_default().subscribe(
            email, route_validity_states.clone(), *frequency
        );
        Ok(())
    }
}


//------------ UnsubscribeFromRoaAlertHandler --------------------------------

pub struct UnsubscribeFromRoaAlertHandler;

impl CommandHandler for UnsubscribeFromRoaAlertHandler {
    fn command_type(&self) -> CommandType {
        CommandType::UnsubscribeFromRoaAlert
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::UnsubscribeFromRoaAlert {
            email, notify_on_roa_changes
        } = command.details() else {
            return Err(unexpected(command))
        };
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        let subscribed = ctx.get(id)?.roa_alerts().is_some_and(|alerts| {
            alerts.subscription().is_some()
        });
        if !subscribed {
            return Err(Error::NoEffect)
        }

        let ca = ctx.get_mut(id)?;
        let alerts = ca.roa_alerts_or_default();
        alerts.set_notify_on_roa_changes(*notify_on_roa_changes);
        if !alerts.remove_email(email) {
            info!(
                "Trying to unsubscribe the address {} that is not subscribed",
                email
            );
        }
        Ok(())
    }
}


//------------ UpdateRoaAlertIgnoredHandler ----------------------------------

pub struct UpdateRoaAlertIgnoredHandler;

impl CommandHandler for UpdateRoaAlertIgnoredHandler {
    fn command_type(&self) -> CommandType {
        CommandType::UpdateRoaAlertIgnoredAnnouncedRoutes
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::UpdateRoaAlertIgnoredAnnouncedRoutes {
            additions, deletions
        } = command.details() else {
            return Err(unexpected(command))
        };
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        let mut alerts = ctx.get(id)?.roa_alerts().cloned().unwrap_or_default();
        if !alerts.update(additions, deletions) {
            return Err(Error::NoEffect)
        }
        *ctx.get_mut(id)?.roa_alerts_or_default() = alerts;
        Ok(())
    }
}


//------------ UpdateAspaConfigurationHandler --------------------------------

pub struct UpdateAspaConfigurationHandler;

impl UpdateAspaConfigurationHandler {
    /// Checks that the customers are held and the providers are valid.
    fn validate(
        certified: &ResourceSet, configuration: &[AspaConfigurationData]
    ) -> Result<(), Error> {
        let customers = ResourceSet::from_asns(
            configuration.iter().map(|entry| entry.customer)
        );
        let not_held = customers.difference(certified);
        if !not_held.is_empty() {
            return Err(Error::NotHolderOfResources(not_held))
        }

        for entry in configuration {
            if entry.providers.iter().any(|provider| {
                provider.asn == entry.customer
            }) {
                let providers: Vec<_> = entry.providers.iter().map(|provider| {
                    provider.asn.to_string()
                }).collect();
                return Err(Error::DuplicateResource(format!(
                    "customer {} appears in provider set [{}]",
                    entry.customer, providers.join(", ")
                )))
            }
        }

        let private: Vec<Asn> = configuration.iter().flat_map(|entry| {
            entry.providers.iter().map(|provider| provider.asn)
        }).filter(|asn| PRIVATE_USE_ASNS.contains_asn(*asn)).collect();
        if !private.is_empty() {
            return Err(Error::PrivateAsnsUsed(private))
        }
        Ok(())
    }
}

impl CommandHandler for UpdateAspaConfigurationHandler {
    fn command_type(&self) -> CommandType {
        CommandType::UpdateAspaConfiguration
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let CaCommandDetails::UpdateAspaConfiguration {
            if_match, configuration, ..
        } = command.details() else {
            return Err(unexpected(command))
        };
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;

        let ca = ctx.get(id)?;
        let Some(if_match) = if_match else {
            return Err(Error::PreconditionRequired)
        };
        if *if_match != ca.aspa().entity_tag() {
            return Err(Error::EntityTagDoesNotMatch)
        }

        let updated = AspaConfigurationData::into_configuration(
            configuration.clone()
        ).map_err(|err| {
            let asn = match err {
                AspaDuplicate::Customer(asn) => asn,
                AspaDuplicate::Provider(_, asn) => asn,
            };
            Error::DuplicateResource(format!(
                "duplicate ASN {} in ASPA configuration", asn
            ))
        })?;
        Self::validate(&ca.certified_resources(), configuration)?;

        if &updated == ca.aspa() {
            return Err(Error::NoEffect)
        }

        let ca = ctx.get_mut(id)?;
        ca.set_aspa(updated);
        ca.mark_configuration_updated();
        Ok(())
    }
}


//------------ DeleteCaHandler -----------------------------------------------

pub struct DeleteCaHandler;

impl CommandHandler for DeleteCaHandler {
    fn command_type(&self) -> CommandType {
        CommandType::DeleteCertificateAuthority
    }

    fn handle(
        &self, ctx: &mut CommandContext, command: &CaCommand
    ) -> Result<(), Error> {
        let id = command.ca().id();
        ctx.lock(id, LockMode::Exclusive)?;
        let ca = ctx.remove(id)?;
        warn!("Deleting CA '{}' (id = {}, uuid = {})", ca.name(), id, ca.uuid());
        ctx.delete_audit_records(id);
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;
    use crate::api::alerts::{RoaAlertFrequency, RouteValidityState};
    use crate::commons::actor::Actor;
    use crate::commons::eventsourcing::VersionedId;
    use crate::config::Config;
    use crate::constants::ACTOR_DEF_SYSTEM;
    use crate::server::ca::CommandEngine;
    use crate::test::{announced_route, init_logging, resources};
    use super::*;

    fn alice() -> Actor {
        Actor::user("alice")
    }

    fn engine_with_ca() -> (CommandEngine, VersionedId) {
        init_logging();
        let engine = CommandEngine::new(Arc::new(Config::default())).unwrap();
        let id = engine.get_next_id();
        engine.execute(&CaCommand::create(id, "ca", ACTOR_DEF_SYSTEM)).unwrap();
        let status = engine.execute(&CaCommand::update_incoming(
            id, "key", resources("AS1-AS10, 10.0.0.0/8"), ACTOR_DEF_SYSTEM
        )).unwrap();
        (engine, status.id)
    }

    fn update_aspa(
        engine: &CommandEngine, id: VersionedId, entries: &[&str]
    ) -> Result<bool, Error> {
        let ca = engine.store().get(id.id()).unwrap();
        let configuration = entries.iter().map(|entry| {
            AspaConfigurationData::from_str(entry).unwrap()
        }).collect();
        engine.execute(&CaCommand::update_aspa_configuration(
            ca.versioned_id(),
            Some(ca.aspa().entity_tag()),
            configuration,
            ca.aspa(),
            alice(),
        )).map(|status| status.has_effect)
    }

    #[test]
    fn create_twice() {
        let (engine, id) = engine_with_ca();
        assert!(matches!(
            engine.execute(&CaCommand::create(id, "again", ACTOR_DEF_SYSTEM)),
            Err(Error::CaAlreadyExists(_))
        ));
    }

    #[test]
    fn revoke_unknown_key() {
        let (engine, id) = engine_with_ca();
        let status = engine.execute(
            &CaCommand::revoke_incoming(id, "other", ACTOR_DEF_SYSTEM)
        ).unwrap();
        assert!(!status.has_effect);

        let status = engine.execute(
            &CaCommand::revoke_incoming(id, "key", ACTOR_DEF_SYSTEM)
        ).unwrap();
        assert!(status.has_effect);
        assert!(
            engine.store().get(id.id()).unwrap().certified_resources().is_empty()
        );
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let (engine, id) = engine_with_ca();
        let states: std::collections::BTreeSet<_> = [
            RouteValidityState::InvalidAsn
        ].into();

        assert!(matches!(
            engine.execute(&CaCommand::subscribe_to_roa_alert(
                id, " ", states.clone(), RoaAlertFrequency::Daily, alice()
            )),
            Err(Error::InvalidCommand(_))
        ));
        assert!(matches!(
            engine.execute(&CaCommand::subscribe_to_roa_alert(
                id, "alice@example.com", Default::default(),
                RoaAlertFrequency::Daily, alice()
            )),
            Err(Error::InvalidCommand(_))
        ));

        let status = engine.execute(&CaCommand::unsubscribe_from_roa_alert(
            id, "alice@example.com", false, alice()
        )).unwrap();
        assert!(!status.has_effect);

        let status = engine.execute(&CaCommand::subscribe_to_roa_alert(
            id, "Alice@Example.com", states, RoaAlertFrequency::Weekly, alice()
        )).unwrap();
        let status = engine.execute(&CaCommand::unsubscribe_from_roa_alert(
            status.id, "alice@example.com", true, alice()
        )).unwrap();
        assert!(status.has_effect);

        let ca = engine.store().get(id.id()).unwrap();
        let alerts = ca.roa_alerts().unwrap();
        assert!(alerts.subscription().is_none());
        assert!(alerts.notify_on_roa_changes());
    }

    #[test]
    fn ignore_routes() {
        let (engine, id) = engine_with_ca();
        let route = announced_route(64496, "10.0.0.0/16");
        let audits = |engine: &CommandEngine| {
            engine.audit().find_most_recent_commands_for_ca(id.id()).len()
        };

        let status = engine.execute(&CaCommand::update_roa_alert_ignored(
            id, vec![route], vec![], alice()
        )).unwrap();
        assert!(status.has_effect);
        let recorded = audits(&engine);

        for (additions, deletions) in [
            (vec![route], vec![]),
            (vec![], vec![announced_route(64497, "10.0.0.0/16")]),
        ] {
            let unchanged = engine.execute(&CaCommand::update_roa_alert_ignored(
                status.id, additions, deletions, alice()
            )).unwrap();
            assert!(!unchanged.has_effect);
            assert_eq!(unchanged.id, status.id);
        }
        assert_eq!(audits(&engine), recorded);
    }

    #[test]
    fn aspa_validation() {
        let (engine, id) = engine_with_ca();
        assert!(matches!(
            update_aspa(&engine, id, &["AS1 => AS2", "AS1 => AS3"]),
            Err(Error::DuplicateResource(_))
        ));
        assert!(matches!(
            update_aspa(&engine, id, &["AS1 => AS2, AS2(v4)"]),
            Err(Error::DuplicateResource(_))
        ));
        match update_aspa(&engine, id, &["AS1 => AS1, AS2"]) {
            Err(Error::DuplicateResource(msg)) => {
                assert_eq!(msg, "customer AS1 appears in provider set [AS1, AS2]")
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            update_aspa(&engine, id, &["AS11 => AS2"]),
            Err(Error::NotHolderOfResources(_))
        ));
        assert!(matches!(
            update_aspa(&engine, id, &["AS1 => AS64512"]),
            Err(Error::PrivateAsnsUsed(_))
        ));

        assert!(update_aspa(&engine, id, &["AS1 => AS2(v6)"]).unwrap());
        assert!(!update_aspa(&engine, id, &["AS1 => AS2(v6)"]).unwrap());

        let ca = engine.store().get(id.id()).unwrap();
        assert!(ca.configuration_updated());
        let audits = engine.audit().find_most_recent_commands_for_ca(id.id());
        assert_eq!(
            audits[0].summary,
            "Updated ASPA configuration: AS1 => AS2(v6) (was: [])."
        );
    }

    #[test]
    fn delete_ca() {
        let (engine, id) = engine_with_ca();
        let status = engine.execute(&CaCommand::delete(id, alice())).unwrap();
        assert!(status.has_effect);
        assert!(!engine.store().has(id.id()));
        assert!(matches!(
            engine.execute(&CaCommand::delete(id, ACTOR_DEF_SYSTEM)),
            Err(Error::UnknownCa(_))
        ));
    }
}
