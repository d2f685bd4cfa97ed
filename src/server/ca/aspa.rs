//! Keeping the ASPA configuration within the CA's resources.

use log::info;
use crate::commons::error::Error;
use super::alerts::changed_resources;
use super::engine::{CaEventListener, CommandContext};
use super::events::CaEvent;


//------------ AspaConfigurationMaintenance ----------------------------------

/// Removes ASPA entries for customer ASNs the CA no longer holds.
pub struct AspaConfigurationMaintenance;

impl CaEventListener for AspaConfigurationMaintenance {
    fn listen(
        &self, ctx: &mut CommandContext, event: &CaEvent
    ) -> Result<(), Error> {
        let Some((id, resources)) = changed_resources(ctx, event)? else {
            return Ok(())
        };
        let mut aspa = ctx.get(id)?.aspa().clone();
        let removed = aspa.retain_held(&resources);
        if removed.is_empty() {
            return Ok(())
        }

        let ca = ctx.get_mut(id)?;
        info!(
            "Removing ASPA configuration for {} customer(s) of CA '{}' no \
             longer held",
            removed.len(), ca.name()
        );
        ca.set_aspa(aspa);
        ca.mark_configuration_updated();

        let ca = ctx.versioned_id(id)?;
        ctx.record_event(
            &CaEvent::AspaConfigurationUpdatedDueToChangedResources {
                ca, removed
            }
        );
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------
