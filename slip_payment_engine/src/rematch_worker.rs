use std::time::Duration;

use log::*;
use tokio::task::JoinHandle;

use crate::{recon_api::reconciliation_api::ReconciliationApi, SqliteDatabase};

/// Payments examined per pass.
pub const REMATCH_BATCH_SIZE: u32 = 100;

/// Starts the re-match worker. Every `interval` it runs one pass of
/// [`ReconciliationApi::process_pending_payments`], so that slips which arrived before their obligation was created
/// are picked up. Do not await the returned JoinHandle, as it will run indefinitely.
pub fn start_rematch_worker(api: ReconciliationApi<SqliteDatabase>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Re-match worker started. Running every {}s", interval.as_secs());
        loop {
            timer.tick().await;
            trace!("🕰️ Running re-match job");
            match api.process_pending_payments(REMATCH_BATCH_SIZE).await {
                Ok(summary) => {
                    debug!("🕰️ {} pending payments examined, {} allocated", summary.examined, summary.allocated)
                },
                Err(e) => error!("🕰️ Error running re-match job: {e}"),
            }
        }
    })
}
