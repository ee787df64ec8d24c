//! Conference expiration sweeper.
//!
//! A periodic task that walks the registry snapshot and expires every
//! conference reporting itself expirable (no endpoints, idle past the
//! inactivity timeout). Started by `Bridge::start`, stopped by
//! `Bridge::stop`.

use crate::bridge::Bridge;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(crate) fn spawn_expire_sweeper(
    bridge: Weak<Bridge>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(bridge) = bridge.upgrade() else { break };
                    for conference in bridge.conferences() {
                        if conference.should_expire() {
                            info!(
                                target: "bridge.expiry",
                                conference_id = %conference.id(),
                                "Expiring idle conference"
                            );
                            bridge.expire_conference(&conference);
                        }
                    }
                }
            }
        }

        debug!(target: "bridge.expiry", "Expiration sweeper stopped");
    })
}
