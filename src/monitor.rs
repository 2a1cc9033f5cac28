// src/monitor.rs

//! The background health monitor: one dedicated subscription connection
//! listening for sentinel-emitted down/up/switch events for the configured
//! master name, flipping the availability flag consumed by the
//! connection-return path.

use crate::errors::SentinelPoolError;
use crate::pool::ConnectionFactory;
use crate::protocol::PushMessage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Event channel signaling the monitored object is objectively down.
const DOWN_CHANNEL: &str = "+odown";
/// Event channel signaling the monitored object is back up.
const UP_CHANNEL: &str = "-odown";
/// Event channel signaling a master switch completed.
const SWITCH_CHANNEL: &str = "switch-master";

/// "Is the master currently considered up by the monitor network."
///
/// Initialized true. Written only by the monitor task; read by the
/// connection-return path to decide between reuse and discard.
#[derive(Debug)]
pub struct AvailabilityFlag(AtomicBool);

impl AvailabilityFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, up: bool) {
        self.0.store(up, Ordering::Release);
    }
}

impl Default for AvailabilityFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs for the lifetime of the client: subscribe through the factory,
/// consume events, and reconnect after `retry_delay` when the stream drops.
/// This task never performs resolution itself; it only mutates the flag.
pub(crate) async fn run(
    factory: Arc<dyn ConnectionFactory>,
    master_name: String,
    flag: Arc<AvailabilityFlag>,
    retry_delay: Duration,
) {
    loop {
        if let Err(e) = listen_once(factory.as_ref(), &master_name, &flag).await {
            warn!("Health monitor connection lost: {}; reconnecting", e);
        }
        tokio::time::sleep(retry_delay).await;
    }
}

/// Subscribes to the three event channels and applies deliveries until the
/// connection fails.
async fn listen_once(
    factory: &dyn ConnectionFactory,
    master_name: &str,
    flag: &AvailabilityFlag,
) -> Result<(), SentinelPoolError> {
    let mut conn = factory.create().await?;
    conn.execute(&["SUBSCRIBE", DOWN_CHANNEL, UP_CHANNEL, SWITCH_CHANNEL])
        .await?;
    // Two more subscription confirmations follow the first reply.
    conn.next_frame().await?;
    conn.next_frame().await?;
    debug!("Health monitor subscribed for master '{}'", master_name);

    loop {
        let frame = conn.next_frame().await?;
        if let Some(push) = PushMessage::decode(&frame) {
            apply_event(master_name, flag, &push.channel, &push.payload);
        }
    }
}

/// Applies one delivered event to the flag. Events about other masters are
/// ignored.
pub fn apply_event(master_name: &str, flag: &AvailabilityFlag, channel: &str, payload: &str) {
    if !concerns_master(master_name, payload) {
        return;
    }
    match channel {
        DOWN_CHANNEL => {
            warn!("Master '{}' reported objectively down", master_name);
            flag.set(false);
        }
        UP_CHANNEL | SWITCH_CHANNEL => {
            debug!("Master '{}' reported available again", master_name);
            flag.set(true);
        }
        _ => {}
    }
}

/// A message is relevant only if field 1 of its whitespace-split payload
/// equals the configured master name. Malformed payloads (fewer than three
/// fields) are logged and ignored, never fatal.
pub fn concerns_master(master_name: &str, payload: &str) -> bool {
    let fields: Vec<&str> = payload.splitn(3, ' ').collect();
    if fields.len() < 3 {
        warn!("Incorrectly formatted sentinel event payload: {}", payload);
        return false;
    }
    fields[1] == master_name
}
