//! Maintenance-mode state machine
//!
//! States: off -> entering -> quiesced -> exiting -> off. Operators set
//! `entering` and `exiting` through the meta store; this loop advances
//! the two automatic transitions: entering becomes quiesced once the
//! write plane drains, exiting becomes off immediately.

use crate::state::Gateway;
use seglake_meta::MaintenanceState;
use std::sync::Arc;
use tracing::{info, warn};

/// Drive the state machine until the gateway shuts down.
pub async fn run_loop(gw: Arc<Gateway>) {
    let poll = gw.config.maintenance.poll();
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = step(&gw).await {
            warn!(error = %e, "maintenance poll failed");
        }
    }
}

/// One poll step; advances at most one transition.
pub async fn step(gw: &Arc<Gateway>) -> Result<(), seglake_meta::MetaError> {
    match gw.meta.maintenance_state().await? {
        MaintenanceState::Entering => {
            if gw.in_flight_writes() == 0 {
                gw.meta
                    .set_maintenance_state(MaintenanceState::Quiesced)
                    .await?;
                info!("maintenance: entering -> quiesced");
            }
        }
        MaintenanceState::Exiting => {
            gw.meta.set_maintenance_state(MaintenanceState::Off).await?;
            info!("maintenance: exiting -> off");
        }
        MaintenanceState::Off | MaintenanceState::Quiesced => {}
    }
    Ok(())
}
