//! # Connectivity Monitor
//!
//! Tracks whether the remote store is reachable and publishes transitions.
//!
//! ```text
//! ┌──────────────┐  set_online(bool)   ┌─────────────────────┐
//! │ Host network │────────────────────►│ ConnectivityMonitor │
//! │ callbacks    │                     │ (watch channel)     │
//! └──────────────┘                     └──────────┬──────────┘
//! ┌──────────────┐  set_online(bool)              │
//! │ HealthProbe  │────────────────────────────────┤
//! │ (optional)   │                                │
//! └──────────────┘                 ┌──────────────┴──────────────┐
//!                                  ▼                             ▼
//!                          is_online()                  subscribe()
//!                          (SyncEngine gate)            Online/Offline edges
//!                                                       (BackgroundSync)
//! ```
//!
//! Repeated reports of the same state are swallowed; subscribers only see
//! real transitions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use crate::config::RemoteSettings;
use crate::engine::CancelSignal;
use crate::error::{SyncError, SyncResult};

/// Answers "can we reach the remote store right now?".
///
/// Injected into the engine so tests and hosts control it directly.
pub trait ConnectivityPort: Send + Sync {
    fn is_online(&self) -> bool;
}

/// A change in reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    fn from_state(online: bool) -> Self {
        if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        }
    }
}

/// Shared online/offline state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    /// Creates a monitor with a known initial state.
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        ConnectivityMonitor { tx: Arc::new(tx) }
    }

    /// Records the current reachability. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    /// Subscribes to transitions that happen after this call.
    pub fn subscribe(&self) -> ConnectivityEvents {
        let rx = self.tx.subscribe();
        let last = *rx.borrow();
        ConnectivityEvents { rx, last }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ConnectivityPort for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Stream of connectivity transitions.
#[derive(Debug)]
pub struct ConnectivityEvents {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl ConnectivityEvents {
    /// Waits for the next transition. `None` once the monitor is gone.
    ///
    /// A quick offline/online flap between two polls is collapsed into the
    /// state it settled on; if that equals the last reported state nothing
    /// is emitted.
    pub async fn next(&mut self) -> Option<ConnectivityEvent> {
        loop {
            self.rx.changed().await.ok()?;
            let now = *self.rx.borrow_and_update();
            if now != self.last {
                self.last = now;
                return Some(ConnectivityEvent::from_state(now));
            }
        }
    }
}

// =============================================================================
// Health Probe
// =============================================================================

/// Polls the remote health endpoint and feeds the monitor.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    url: Url,
    interval: Duration,
}

impl HealthProbe {
    /// Creates a probe for `{base_url}/{health_path}`.
    pub fn new(
        base_url: &Url,
        health_path: &str,
        timeout: Duration,
        interval: Duration,
    ) -> SyncResult<Self> {
        let url = crate::remote::join_endpoint(base_url, health_path)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(HealthProbe {
            client,
            url,
            interval,
        })
    }

    /// Builds the probe from `[remote]`: `health_path` under `base_url`,
    /// polled every `health_interval_secs`.
    ///
    /// ## Returns
    /// * `Ok(None)` - No base URL configured; nothing to probe
    pub fn from_settings(settings: &RemoteSettings) -> SyncResult<Option<Self>> {
        let Some(base_url) = settings.parsed_base_url()? else {
            return Ok(None);
        };

        Self::new(
            &base_url,
            &settings.health_path,
            settings.request_timeout(),
            settings.health_interval(),
        )
        .map(Some)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if the endpoint answered with any non-5xx status.
    pub async fn check(&self) -> bool {
        match self.client.get(self.url.clone()).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!(error = %e, url = %self.url, "Health probe failed");
                false
            }
        }
    }

    /// Spawns the polling loop; it stops when `cancel` fires.
    pub fn spawn(self, monitor: ConnectivityMonitor, cancel: CancelSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let online = self.check().await;
                        monitor.set_online(online);
                    }
                    _ = cancel.cancelled() => {
                        debug!("Health probe stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_online_reports_changes_only() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.is_online());

        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.is_online());

        assert!(monitor.set_online(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribe_yields_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut events = monitor.subscribe();

        monitor.set_online(false);
        monitor.set_online(true);
        assert_eq!(events.next().await, Some(ConnectivityEvent::Online));

        monitor.set_online(true);
        monitor.set_online(false);
        assert_eq!(events.next().await, Some(ConnectivityEvent::Offline));
    }

    #[tokio::test]
    async fn test_events_end_when_monitor_dropped() {
        let monitor = ConnectivityMonitor::new(true);
        let mut events = monitor.subscribe();
        drop(monitor);

        assert_eq!(events.next().await, None);
    }

    #[test]
    fn test_health_probe_from_settings() {
        let settings = RemoteSettings {
            base_url: Some("https://api.example.com/rest/v1".to_string()),
            health_path: "status".to_string(),
            health_interval_secs: 12,
            ..RemoteSettings::default()
        };

        let probe = HealthProbe::from_settings(&settings).unwrap().expect("probe");
        assert_eq!(probe.url().as_str(), "https://api.example.com/rest/v1/status");
        assert_eq!(probe.interval(), Duration::from_secs(12));

        assert!(HealthProbe::from_settings(&RemoteSettings::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_health_probe_unreachable_is_offline() {
        let base = Url::parse("http://127.0.0.1:9/rest/v1").unwrap();
        let probe = HealthProbe::new(
            &base,
            "health",
            Duration::from_millis(500),
            Duration::from_secs(30),
        )
        .unwrap();

        assert!(!probe.check().await);
    }
}
