//! Background keep-alive timer.

use crate::ftp::session::SessionCore;
use log::{debug, warn};
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Spawn a task that sends a NOOP every `interval_secs`.
///
/// Ticks that find the session busy are skipped. The task ends on its own
/// once the session is dropped; callers abort it on disconnect.
pub(crate) fn spawn_keepalive(core: Weak<Mutex<SessionCore>>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(interval_secs);
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(core) = core.upgrade() else {
                break;
            };
            let Ok(mut guard) = core.try_lock() else {
                debug!("Keep-alive skipped: session busy");
                continue;
            };
            if let Err(e) = guard.keep_alive().await {
                warn!("Keep-alive reconnect failed: {}", e);
            }
        }
    })
}
