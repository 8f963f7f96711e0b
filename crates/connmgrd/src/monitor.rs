//! The readiness monitor task.
//!
//! A single long-lived worker: block on the wake signal, recompute
//! readiness for every changed slot under the table lock, publish the
//! coalesced edge events outside it, repeat until shutdown. Wake
//! delivery is idempotent; the loop trusts the `changed` bits, not the
//! number of wakes.

use crate::manager::ConnMgr;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(crate) async fn run(mgr: ConnMgr, shutdown: CancellationToken) {
    info!("readiness monitor started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("readiness monitor stopping");
                return;
            }
            _ = mgr.wake_signal().notified() => {}
        }
        mgr.process_changes();
    }
}
