//! Agent-wide settings shared by all conversations.
//!
//! Holds the caller's current location, vcard and DID (stamped into every
//! client message), the foreground/background mode and the heartbeat
//! interval. Conversations subscribe to interval changes to rebuild their
//! heartbeat timers.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::listeners::{ListenerId, Listeners};
use crate::core::{Location, VCard};
use crate::error::ValidationError;

pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 20_000;

/// Whether the client app is in the foreground.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    #[default]
    Active,
    Inactive,
}

#[derive(Default)]
struct Settings {
    location: Option<Location>,
    vcard: Option<VCard>,
    did: Option<String>,
    mode: Mode,
    heartbeat_interval: Option<Duration>,
}

pub struct Store {
    settings: RwLock<Settings>,
    default_heartbeat_interval: Duration,
    interval_listeners: Listeners<Duration>,
}

impl Store {
    /// `default_heartbeat_interval` is the namespace default restored by
    /// `set_heartbeat_interval(None)`.
    pub fn new(default_heartbeat_interval: Duration) -> Self {
        Self {
            settings: RwLock::new(Settings::default()),
            default_heartbeat_interval,
            interval_listeners: Listeners::new(),
        }
    }

    pub fn location(&self) -> Option<Location> {
        self.settings.read().location.clone()
    }

    pub fn set_location(&self, location: Option<Location>) {
        self.settings.write().location = location;
    }

    pub fn vcard(&self) -> Option<VCard> {
        self.settings.read().vcard.clone()
    }

    pub fn set_vcard(&self, vcard: Option<VCard>) {
        self.settings.write().vcard = vcard;
    }

    pub fn did(&self) -> Option<String> {
        self.settings.read().did.clone()
    }

    pub fn set_did(&self, did: Option<String>) {
        self.settings.write().did = did;
    }

    pub fn mode(&self) -> Mode {
        self.settings.read().mode
    }

    pub fn set_mode(&self, mode: Mode) {
        self.settings.write().mode = mode;
    }

    /// Current interval. Zero means heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval_or(self.default_heartbeat_interval)
    }

    /// Configured interval, or `default` if none is set. Conversations pass
    /// the default of their own namespace.
    pub fn heartbeat_interval_or(&self, default: Duration) -> Duration {
        self.settings.read().heartbeat_interval.unwrap_or(default)
    }

    pub fn default_heartbeat_interval(&self) -> Duration {
        self.default_heartbeat_interval
    }

    /// Set the heartbeat interval in milliseconds.
    ///
    /// `None` restores the namespace default, `Some(0)` disables heartbeats.
    ///
    /// # Errors
    /// [`ValidationError::HeartbeatIntervalOutOfRange`] for any other value
    /// outside `1000..=20000`.
    pub fn set_heartbeat_interval(&self, interval_ms: Option<u64>) -> Result<(), ValidationError> {
        let interval = match interval_ms {
            None => None,
            Some(0) => Some(Duration::ZERO),
            Some(ms) if (MIN_HEARTBEAT_INTERVAL_MS..=MAX_HEARTBEAT_INTERVAL_MS).contains(&ms) => {
                Some(Duration::from_millis(ms))
            }
            Some(ms) => return Err(ValidationError::HeartbeatIntervalOutOfRange(ms)),
        };

        self.settings.write().heartbeat_interval = interval;
        let current = self.heartbeat_interval();
        info!("[set_heartbeat_interval] Heartbeat interval is now {} ms", current.as_millis());
        self.interval_listeners.notify(&current);
        Ok(())
    }

    pub fn add_heartbeat_interval_listener(
        &self,
        listener: impl Fn(&Duration) + Send + Sync + 'static,
    ) -> ListenerId {
        self.interval_listeners.add(listener)
    }

    pub fn remove_heartbeat_interval_listener(&self, id: ListenerId) -> bool {
        self.interval_listeners.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_heartbeat_interval_validation() {
        let store = Store::new(Duration::from_secs(15));
        assert_eq!(store.heartbeat_interval(), Duration::from_secs(15));

        store.set_heartbeat_interval(Some(1_000)).unwrap();
        store.set_heartbeat_interval(Some(20_000)).unwrap();
        assert_eq!(store.heartbeat_interval(), Duration::from_secs(20));

        assert_eq!(
            store.set_heartbeat_interval(Some(999)),
            Err(ValidationError::HeartbeatIntervalOutOfRange(999))
        );
        assert!(store.set_heartbeat_interval(Some(20_001)).is_err());
        assert_eq!(store.heartbeat_interval(), Duration::from_secs(20));

        store.set_heartbeat_interval(Some(0)).unwrap();
        assert!(store.heartbeat_interval().is_zero());

        store.set_heartbeat_interval(None).unwrap();
        assert_eq!(store.heartbeat_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_interval_with_namespace_default() {
        let store = Store::new(Duration::from_secs(15));
        assert_eq!(store.heartbeat_interval_or(Duration::from_secs(10)), Duration::from_secs(10));

        store.set_heartbeat_interval(Some(5_000)).unwrap();
        assert_eq!(store.heartbeat_interval_or(Duration::from_secs(10)), Duration::from_secs(5));

        store.set_heartbeat_interval(Some(0)).unwrap();
        assert!(store.heartbeat_interval_or(Duration::from_secs(10)).is_zero());
    }

    #[test]
    fn test_interval_listeners() {
        let store = Store::new(Duration::from_secs(10));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = store.add_heartbeat_interval_listener(move |d| sink.lock().push(*d));
        store.set_heartbeat_interval(Some(5_000)).unwrap();
        let _ = store.set_heartbeat_interval(Some(50));
        store.set_heartbeat_interval(None).unwrap();
        assert!(store.remove_heartbeat_interval_listener(id));
        store.set_heartbeat_interval(Some(0)).unwrap();

        assert_eq!(*seen.lock(), vec![Duration::from_secs(5), Duration::from_secs(10)]);
    }
}
