//! Keeping suppressed ROA alert announcements within the CA's resources.

use log::debug;
use crate::api::resources::ResourceSet;
use crate::commons::error::Error;
use crate::commons::eventsourcing::AggregateId;
use super::engine::{CaEventListener, CommandContext};
use super::events::CaEvent;


/// Returns the CA and the resources it holds after an event.
///
/// Returns `None` for events that do not change the resources. Otherwise
/// the resources are the union of what all of the CA's current incoming
/// certificates hold, not just the certificate named in the event.
pub(super) fn changed_resources(
    ctx: &mut CommandContext, event: &CaEvent
) -> Result<Option<(AggregateId, ResourceSet)>, Error> {
    match event {
        CaEvent::IncomingCertificateUpdated { ca, .. }
        | CaEvent::IncomingCertificateRevoked { ca, .. } => {
            let resources = ctx.get(ca.id())?.certified_resources();
            Ok(Some((ca.id(), resources)))
        }
        CaEvent::RoaAlertIgnoredAnnouncedRoutesUpdated { .. }
        | CaEvent::AspaConfigurationUpdatedDueToChangedResources { .. } => {
            Ok(None)
        }
    }
}


//------------ RoaAlertMaintenance -------------------------------------------

/// Removes suppressed announcements the CA no longer holds resources for.
///
/// An announcement stays suppressed as long as its prefix overlaps with the
/// resources at all, so less specific announcements are kept.
pub struct RoaAlertMaintenance;

impl CaEventListener for RoaAlertMaintenance {
    fn listen(
        &self, ctx: &mut CommandContext, event: &CaEvent
    ) -> Result<(), Error> {
        let Some((id, resources)) = changed_resources(ctx, event)? else {
            return Ok(())
        };
        let Some(mut alerts) = ctx.get(id)?.roa_alerts().cloned() else {
            return Ok(())
        };
        let removed = alerts.retain_overlapping(&resources);
        if removed.is_empty() {
            return Ok(())
        }
        debug!(
            "Removing {} suppressed announcements outside of {}",
            removed.len(), resources
        );
        *ctx.get_mut(id)?.roa_alerts_or_default() = alerts;

        let ca = ctx.versioned_id(id)?;
        ctx.record_event(
            &CaEvent::RoaAlertIgnoredAnnouncedRoutesUpdated { ca, removed }
        );
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------
