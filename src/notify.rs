// src/notify.rs

//! Persistent event subscriptions: the dispatch primitive that pushes
//! delivered messages into caller handlers, and the registry that replays
//! every live subscription after a resolution cycle.

use crate::errors::SentinelPoolError;
use crate::pool::ConnectionFactory;
use crate::protocol::PushMessage;
use indexmap::IndexMap;
use indexmap::map::Entry as MapEntry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Caller-supplied callback, invoked with the raw message, the subscribed
/// key, and the delivered payload (or the delivery error). Handlers are
/// opaque: the registry never inspects them.
pub type Handler = Arc<dyn Fn(&str, &str, Result<&str, &SentinelPoolError>) + Send + Sync>;

/// Diagnostics hook for best-effort resubscription failures during automatic
/// recovery, invoked with the command, the key, and the failure.
pub type ReplayDiagnostics = Arc<dyn Fn(&str, &str, &SentinelPoolError) + Send + Sync>;

/// One live subscription: the handler list shared with the reader task, and
/// the reader task bound to the pool generation that created it.
struct Subscription {
    handlers: Arc<Mutex<Vec<Handler>>>,
    reader: Option<JoinHandle<()>>,
}

/// Insertion-ordered record of every active (command, key) subscription.
///
/// Register/unregister are infrequent control-plane operations and replay
/// runs only at the tail of a resolution cycle, so a plain exclusive lock
/// around the map is sufficient.
pub struct SubscriptionRegistry {
    entries: Mutex<IndexMap<(String, String), Subscription>>,
    diagnostics: Option<ReplayDiagnostics>,
}

impl SubscriptionRegistry {
    pub fn new(diagnostics: Option<ReplayDiagnostics>) -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            diagnostics,
        }
    }

    /// Subscribes `handler` under `command` for each key. The wire
    /// subscription is established first; only on success is the handler
    /// recorded. Multiple handlers per key are permitted and all preserved.
    pub async fn register(
        &self,
        factory: &Arc<dyn ConnectionFactory>,
        command: &str,
        handler: Handler,
        keys: &[&str],
    ) -> Result<(), SentinelPoolError> {
        for key in keys {
            let entry_key = (command.to_string(), key.to_string());

            let appended = {
                let mut entries = self.entries.lock();
                if let Some(sub) = entries.get_mut(&entry_key) {
                    sub.handlers.lock().push(handler.clone());
                    true
                } else {
                    false
                }
            };
            if appended {
                continue;
            }

            let handlers = Arc::new(Mutex::new(vec![handler.clone()]));
            let reader = spawn_reader(factory.clone(), command, key, handlers.clone()).await?;

            let mut entries = self.entries.lock();
            match entries.entry(entry_key) {
                // Lost a race with a concurrent register for the same key:
                // fold the handler in and drop the redundant reader.
                MapEntry::Occupied(mut occupied) => {
                    occupied.get_mut().handlers.lock().push(handler.clone());
                    reader.abort();
                }
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Subscription {
                        handlers,
                        reader: Some(reader),
                    });
                }
            }
        }
        Ok(())
    }

    /// Removes the subscriptions for each key. Local bookkeeping is cleared
    /// unconditionally so stale entries can never be replayed later; the
    /// wire subscription ends with its dedicated connection.
    pub fn unregister(&self, command: &str, keys: &[&str]) -> Result<(), SentinelPoolError> {
        let mut missing = Vec::new();
        for key in keys {
            let entry_key = (command.to_string(), key.to_string());
            let removed = self.entries.lock().shift_remove(&entry_key);
            match removed {
                Some(mut sub) => {
                    if let Some(reader) = sub.reader.take() {
                        reader.abort();
                    }
                }
                None => missing.push(key.to_string()),
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SentinelPoolError::Subscription(format!(
                "no subscription registered under '{command}' for: {}",
                missing.join(", ")
            )))
        }
    }

    /// Re-issues every registered subscription against the new pool
    /// generation, in registry order, exactly once each. Failures are
    /// best-effort: reported through the diagnostics hook and logged, never
    /// surfaced; no caller is positioned to react mid-recovery. Invoked at
    /// the tail of every resolution cycle.
    pub async fn replay(&self, factory: &Arc<dyn ConnectionFactory>) {
        let snapshot: Vec<((String, String), Arc<Mutex<Vec<Handler>>>)> = self
            .entries
            .lock()
            .iter()
            .map(|(key, sub)| (key.clone(), sub.handlers.clone()))
            .collect();

        for ((command, key), handlers) in snapshot {
            // The old reader died with the old master; retire it before
            // rewiring.
            if let Some(sub) = self.entries.lock().get_mut(&(command.clone(), key.clone())) {
                if let Some(reader) = sub.reader.take() {
                    reader.abort();
                }
            }

            match spawn_reader(factory.clone(), &command, &key, handlers).await {
                Ok(reader) => {
                    let mut entries = self.entries.lock();
                    if let Some(sub) = entries.get_mut(&(command.clone(), key.clone())) {
                        sub.reader = Some(reader);
                    } else {
                        // Unregistered while replaying; do not resurrect.
                        reader.abort();
                    }
                }
                Err(e) => {
                    warn!("Resubscribe of '{} {}' failed: {}", command, key, e);
                    if let Some(diagnostics) = &self.diagnostics {
                        diagnostics(&command, &key, &e);
                    }
                }
            }
        }
    }

    /// Registered (command, key) pairs in registry order.
    pub fn keys(&self) -> Vec<(String, String)> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Number of handlers currently registered for a (command, key) pair.
    pub fn handler_count(&self, command: &str, key: &str) -> usize {
        self.entries
            .lock()
            .get(&(command.to_string(), key.to_string()))
            .map_or(0, |sub| sub.handlers.lock().len())
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        for sub in self.entries.lock().values_mut() {
            if let Some(reader) = sub.reader.take() {
                reader.abort();
            }
        }
    }
}

/// Establishes one dedicated subscriber connection for (command, key) and
/// spawns the reader task that dispatches deliveries to the handlers.
async fn spawn_reader(
    factory: Arc<dyn ConnectionFactory>,
    command: &str,
    key: &str,
    handlers: Arc<Mutex<Vec<Handler>>>,
) -> Result<JoinHandle<()>, SentinelPoolError> {
    let mut conn = factory.create().await?;
    // The first reply to a subscribe command is its confirmation.
    conn.execute(&[command, key]).await?;

    let command = command.to_string();
    let key = key.to_string();
    let reader = tokio::spawn(async move {
        loop {
            match conn.next_frame().await {
                Ok(frame) => {
                    let Some(push) = PushMessage::decode(&frame) else {
                        continue;
                    };
                    if push.channel != key {
                        continue;
                    }
                    let raw = format!("message {} {}", push.channel, push.payload);
                    for handler in handlers.lock().iter() {
                        handler(&raw, &key, Ok(push.payload.as_str()));
                    }
                }
                Err(e) => {
                    // Notify handlers once, then stop; the replay after the
                    // next resolution cycle revives the subscription.
                    for handler in handlers.lock().iter() {
                        handler("", &key, Err(&e));
                    }
                    debug!(
                        "Subscription reader for '{} {}' stopped: {}",
                        command, key, e
                    );
                    return;
                }
            }
        }
    });
    Ok(reader)
}
