//! Webhook deduplication and echo suppression.
//!
//! Two expiring maps behind one mutex: `processed` holds the last time a
//! notification for a key was let through, `successful` holds the last time
//! this service wrote a change that originated on a given system. Both are
//! keyed `system:record_type:identity`.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::identity::identify;
use crate::models::{Record, System};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupSettings {
    pub enabled: bool,
    pub window: Duration,
    /// How long entries are kept before pruning
    pub retention: Duration,
}

impl DedupSettings {
    /// Enabled, with retention twice the window.
    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            enabled: true,
            window,
            retention: window * 2,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self::with_window(DEFAULT_DEDUP_WINDOW)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub enabled: bool,
    pub window_ms: u64,
    pub active_webhooks: usize,
    pub successful_syncs: usize,
    pub processed_keys: Vec<String>,
    pub successful_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct DedupState {
    processed: HashMap<String, Instant>,
    successful: HashMap<String, Instant>,
}

impl DedupState {
    fn prune(&mut self, now: Instant, retention: Duration) {
        let fresh = |seen: &mut Instant| now.saturating_duration_since(*seen) < retention;
        self.processed.retain(|_, seen| fresh(seen));
        self.successful.retain(|_, seen| fresh(seen));
    }
}

#[derive(Debug, Default)]
pub struct WebhookDeduplicator {
    settings: DedupSettings,
    state: Mutex<DedupState>,
}

impl WebhookDeduplicator {
    #[must_use]
    pub fn new(settings: DedupSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(DedupState::default()),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> DedupSettings {
        self.settings
    }

    /// Whether this notification repeats one seen within the window.
    ///
    /// A notification that is let through re-arms the window for its key.
    /// Records without a recognisable identity are never duplicates.
    pub async fn is_duplicate(&self, source: System, record_type: &str, data: &Record) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let Some(key) = dedup_key(source, record_type, data) else {
            return false;
        };

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.settings.retention);

        if let Some(seen) = state.processed.get(&key) {
            let elapsed = now.saturating_duration_since(*seen);
            if elapsed < self.settings.window {
                tracing::info!(
                    key = %key,
                    elapsed_ms = elapsed.as_millis(),
                    "Duplicate webhook discarded"
                );
                return true;
            }
        }
        state.processed.insert(key, now);
        false
    }

    /// Remember that a change originating on `origin` was just written to the
    /// other system, so that system's notification about it can be dropped.
    pub async fn record_successful_sync(&self, origin: System, record_type: &str, data: &Record) {
        if !self.settings.enabled {
            return;
        }
        let Some(key) = dedup_key(origin, record_type, data) else {
            return;
        };

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.settings.retention);
        tracing::debug!(key = %key, "Recorded successful sync");
        state.successful.insert(key, now);
    }

    /// Whether a notification from `source` is the echo of a write we made
    /// there on behalf of the opposite system. Does not re-arm the window.
    pub async fn is_opposite_service_webhook(
        &self,
        source: System,
        record_type: &str,
        data: &Record,
    ) -> bool {
        if !self.settings.enabled {
            return false;
        }
        let Some(key) = dedup_key(source.opposite(), record_type, data) else {
            return false;
        };

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.prune(now, self.settings.retention);

        match state.successful.get(&key) {
            Some(synced) if now.saturating_duration_since(*synced) < self.settings.window => {
                tracing::info!(key = %key, %source, "Echo webhook discarded");
                true
            }
            _ => false,
        }
    }

    pub async fn stats(&self) -> DedupStats {
        let state = self.state.lock().await;
        let mut processed_keys: Vec<String> = state.processed.keys().cloned().collect();
        let mut successful_keys: Vec<String> = state.successful.keys().cloned().collect();
        processed_keys.sort();
        successful_keys.sort();
        DedupStats {
            enabled: self.settings.enabled,
            window_ms: u64::try_from(self.settings.window.as_millis()).unwrap_or(u64::MAX),
            active_webhooks: processed_keys.len(),
            successful_syncs: successful_keys.len(),
            processed_keys,
            successful_keys,
        }
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.processed.clear();
        state.successful.clear();
        tracing::info!("Deduplication state cleared");
    }
}

fn dedup_key(system: System, record_type: &str, data: &Record) -> Option<String> {
    let identity = identify(record_type, data, system, None)?;
    Some(format!("{system}:{record_type}:{identity}"))
}
