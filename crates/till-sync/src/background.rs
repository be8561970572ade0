//! # Background Sync
//!
//! Runs sync passes without anyone pressing a button.
//!
//! ## Triggers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Background Sync Task                              │
//! │                                                                         │
//! │   interval tick ───────┐   (absent when frequency = manual)            │
//! │   Online transition ───┤   (when sync_on_reconnect)                    │
//! │   handle.trigger() ────┼──► SyncEngine::sync_now(cancel)               │
//! │   handle.sync_now() ───┘       │                                        │
//! │   (OS background hook)         ▼                                        │
//! │                         single-flight guard: overlapping triggers      │
//! │                         return AlreadyRunning                          │
//! │                                                                         │
//! │   handle.shutdown() ──► cancel in-flight pass, stop the loop           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Registration with the OS scheduler is attempted once at spawn. If the
//! platform refuses, the in-process triggers keep working.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SyncSettings;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::engine::{CancelSignal, SyncEngine, SyncPassSummary};
use crate::error::{SyncError, SyncResult};

// =============================================================================
// OS Scheduler Port
// =============================================================================

/// Platform background-task registration (periodic wake-ups while the app
/// is suspended).
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Registers a periodic task under `tag`. `None` means on demand only.
    async fn register(&self, tag: &str, interval: Option<Duration>) -> SyncResult<()>;
}

/// Scheduler for platforms without background execution.
pub struct NoopScheduler;

#[async_trait]
impl BackgroundScheduler for NoopScheduler {
    async fn register(&self, tag: &str, _interval: Option<Duration>) -> SyncResult<()> {
        debug!(tag = %tag, "No OS scheduler, in-process triggers only");
        Ok(())
    }
}

// =============================================================================
// Settings
// =============================================================================

/// What makes the background task run a pass.
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// Timer period; `None` disables the timer.
    pub interval: Option<Duration>,
    pub sync_on_reconnect: bool,
    /// Refresh the product cache after a timer or reconnect pass that
    /// synced at least one sale.
    pub refresh_catalog: bool,
    pub background_tag: String,
}

impl From<&SyncSettings> for TriggerSettings {
    fn from(settings: &SyncSettings) -> Self {
        TriggerSettings {
            interval: settings.frequency.interval(),
            sync_on_reconnect: settings.sync_on_reconnect,
            refresh_catalog: settings.refresh_catalog,
            background_tag: settings.background_tag.clone(),
        }
    }
}

impl Default for TriggerSettings {
    fn default() -> Self {
        TriggerSettings::from(&SyncSettings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Reconnect,
    Requested,
}

// =============================================================================
// Background Task
// =============================================================================

/// Spawns and owns the background sync loop.
pub struct BackgroundSync;

impl BackgroundSync {
    /// Starts the loop on the current runtime.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        monitor: &ConnectivityMonitor,
        settings: TriggerSettings,
        scheduler: Arc<dyn BackgroundScheduler>,
    ) -> BackgroundSyncHandle {
        let cancel = CancelSignal::new();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let events = monitor.subscribe();

        let task = tokio::spawn(run_loop(
            engine.clone(),
            settings,
            scheduler,
            events,
            trigger_rx,
            shutdown_rx,
            cancel.clone(),
        ));

        BackgroundSyncHandle {
            engine,
            cancel,
            trigger_tx,
            shutdown_tx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

async fn run_loop(
    engine: Arc<SyncEngine>,
    settings: TriggerSettings,
    scheduler: Arc<dyn BackgroundScheduler>,
    mut events: crate::connectivity::ConnectivityEvents,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: mpsc::Receiver<()>,
    cancel: CancelSignal,
) {
    if let Err(e) = scheduler
        .register(&settings.background_tag, settings.interval)
        .await
    {
        warn!(tag = %settings.background_tag, error = %e, "OS background registration failed");
    }

    let mut ticker = settings.interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut events_open = true;

    info!(
        interval_secs = ?settings.interval.map(|d| d.as_secs()),
        sync_on_reconnect = settings.sync_on_reconnect,
        "Background sync started"
    );

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker) => {
                run_triggered_pass(&engine, &settings, &cancel, Trigger::Timer).await;
            }
            event = events.next(), if settings.sync_on_reconnect && events_open => {
                match event {
                    Some(ConnectivityEvent::Online) => {
                        run_triggered_pass(&engine, &settings, &cancel, Trigger::Reconnect).await;
                    }
                    Some(ConnectivityEvent::Offline) => debug!("Went offline"),
                    None => events_open = false,
                }
            }
            Some(()) = trigger_rx.recv() => {
                run_triggered_pass(&engine, &settings, &cancel, Trigger::Requested).await;
            }
            _ = shutdown_rx.recv() => {
                info!("Background sync received shutdown");
                break;
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_triggered_pass(
    engine: &SyncEngine,
    settings: &TriggerSettings,
    cancel: &CancelSignal,
    trigger: Trigger,
) {
    debug!(trigger = ?trigger, "Sync triggered");

    match engine.sync_now(cancel).await {
        Ok(summary) if summary.is_skipped() => {
            debug!(trigger = ?trigger, reason = ?summary.skipped, "Sync pass skipped");
        }
        Ok(summary) => {
            let automatic = matches!(trigger, Trigger::Timer | Trigger::Reconnect);
            if automatic && settings.refresh_catalog && !cancel.is_cancelled() {
                refresh_after(engine, &summary).await;
            }
        }
        Err(e) => error!(trigger = ?trigger, error = %e, "Background sync pass failed"),
    }
}

async fn refresh_after(engine: &SyncEngine, summary: &SyncPassSummary) {
    // Only after a pass that reached the backend with something to send
    if summary.succeeded == 0 {
        debug!(failed = summary.failed, "No sale synced, catalog refresh skipped");
        return;
    }

    match engine.refresh_catalog().await {
        Ok(count) => debug!(count, "Catalog refreshed after sync"),
        Err(e) if e.is_retryable() => {
            debug!(error = %e, "Catalog refresh skipped")
        }
        Err(e) => warn!(error = %e, "Catalog refresh failed"),
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Controls a running background sync loop.
#[derive(Clone)]
pub struct BackgroundSyncHandle {
    engine: Arc<SyncEngine>,
    cancel: CancelSignal,
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BackgroundSyncHandle {
    /// Runs a pass now and waits for its summary.
    ///
    /// Entry point for the UI button and the OS background hook.
    pub async fn sync_now(&self) -> SyncResult<SyncPassSummary> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }
        self.engine.sync_now(&self.cancel).await
    }

    /// Asks the loop to run a pass without waiting for it.
    ///
    /// A request made while one is already waiting is merged into it.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.trigger_tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::ShuttingDown),
        }
    }

    /// Signal shared with the loop; cancelled on shutdown.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Cancels any in-flight pass and stops the loop. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.shutdown_tx.send(()).await;

        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Background sync task ended abnormally");
            }
        }
        info!("Background sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteSale, RemoteSaleLine, RemoteStore};
    use crate::tenant::{SessionIdentity, StaticSession, TenantResolver};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use till_core::{CatalogItem, Money, NewQueuedSale, PaymentMethod, SaleLine};
    use till_db::{DbConfig, LocalStore};

    #[derive(Default)]
    struct CountingRemote {
        sales: AtomicUsize,
        catalog_fetches: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for CountingRemote {
        async fn create_sale(&self, sale: &RemoteSale) -> Result<String, RemoteError> {
            self.sales.fetch_add(1, Ordering::SeqCst);
            Ok(format!("remote-{}", sale.idempotency_key))
        }

        async fn create_sale_lines(&self, _lines: &[RemoteSaleLine]) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn fetch_catalog(&self, _tenant_id: &str) -> Result<Vec<CatalogItem>, RemoteError> {
            self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct FailingScheduler;

    #[async_trait]
    impl BackgroundScheduler for FailingScheduler {
        async fn register(&self, _tag: &str, _interval: Option<Duration>) -> SyncResult<()> {
            Err(SyncError::Scheduler("not permitted".into()))
        }
    }

    fn manual_settings() -> TriggerSettings {
        TriggerSettings {
            interval: None,
            sync_on_reconnect: true,
            refresh_catalog: false,
            background_tag: "test".to_string(),
        }
    }

    async fn engine_with_sale(
        monitor: &Arc<ConnectivityMonitor>,
        remote: Arc<CountingRemote>,
    ) -> Arc<SyncEngine> {
        let store = LocalStore::new(DbConfig::in_memory());
        let session = Arc::new(StaticSession::with_identity(SessionIdentity {
            user_id: "cashier-1".to_string(),
            tenant_id: Some("shop-1".to_string()),
            access_token: None,
        }));
        let engine = SyncEngine::builder(store.clone())
            .remote(remote)
            .connectivity(monitor.clone())
            .tenant_resolver(TenantResolver::new(session, store))
            .build()
            .unwrap();

        let sale = NewQueuedSale::new(
            "cashier-1",
            PaymentMethod::Card,
            vec![SaleLine::new("p-1", 1, Money::from_cents(450))],
        );
        engine.enqueue_sale(sale).await.unwrap();
        Arc::new(engine)
    }

    async fn wait_until_drained(engine: &SyncEngine) -> bool {
        for _ in 0..100 {
            if engine.status().await.pending_count == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn test_trigger_settings_from_frequency() {
        let mut settings = SyncSettings::default();
        assert_eq!(
            TriggerSettings::from(&settings).interval,
            Some(Duration::from_secs(60))
        );

        settings.frequency = crate::config::SyncFrequency::Manual;
        assert_eq!(TriggerSettings::from(&settings).interval, None);
    }

    #[tokio::test]
    async fn test_reconnect_triggers_pass() {
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let remote = Arc::new(CountingRemote::default());
        let engine = engine_with_sale(&monitor, remote.clone()).await;

        let handle = BackgroundSync::spawn(
            engine.clone(),
            &monitor,
            manual_settings(),
            Arc::new(NoopScheduler),
        );

        monitor.set_online(true);
        assert!(wait_until_drained(&engine).await);
        assert_eq!(remote.sales.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_timer_triggers_pass_and_refreshes_catalog() {
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let remote = Arc::new(CountingRemote::default());
        let engine = engine_with_sale(&monitor, remote.clone()).await;

        let settings = TriggerSettings {
            interval: Some(Duration::from_millis(50)),
            sync_on_reconnect: false,
            refresh_catalog: true,
            background_tag: "test".to_string(),
        };
        let handle = BackgroundSync::spawn(engine.clone(), &monitor, settings, Arc::new(NoopScheduler));

        assert!(wait_until_drained(&engine).await);
        for _ in 0..100 {
            if remote.catalog_fetches.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.shutdown().await;

        assert_eq!(remote.sales.load(Ordering::SeqCst), 1);
        assert!(remote.catalog_fetches.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_empty_timer_pass_skips_catalog_refresh() {
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let remote = Arc::new(CountingRemote::default());
        let engine = engine_with_sale(&monitor, remote.clone()).await;
        engine.sync_now(&CancelSignal::new()).await.unwrap();
        assert_eq!(engine.status().await.pending_count, 0);

        let settings = TriggerSettings {
            interval: Some(Duration::from_millis(20)),
            sync_on_reconnect: false,
            refresh_catalog: true,
            background_tag: "test".to_string(),
        };
        let handle = BackgroundSync::spawn(engine.clone(), &monitor, settings, Arc::new(NoopScheduler));

        // Several empty timer passes
        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.shutdown().await;

        assert_eq!(remote.sales.load(Ordering::SeqCst), 1);
        assert_eq!(remote.catalog_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scheduler_failure_is_not_fatal() {
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let remote = Arc::new(CountingRemote::default());
        let engine = engine_with_sale(&monitor, remote.clone()).await;

        let handle = BackgroundSync::spawn(
            engine.clone(),
            &monitor,
            manual_settings(),
            Arc::new(FailingScheduler),
        );

        handle.trigger().unwrap();
        assert!(wait_until_drained(&engine).await);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_sync_now_and_shutdown() {
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let remote = Arc::new(CountingRemote::default());
        let engine = engine_with_sale(&monitor, remote.clone()).await;

        let handle = BackgroundSync::spawn(
            engine.clone(),
            &monitor,
            manual_settings(),
            Arc::new(NoopScheduler),
        );

        let summary = handle.sync_now().await.unwrap();
        assert_eq!(summary.succeeded, 1);

        handle.shutdown().await;
        handle.shutdown().await;
        assert!(matches!(handle.sync_now().await, Err(SyncError::ShuttingDown)));
        assert!(matches!(handle.trigger(), Err(SyncError::ShuttingDown)));
    }
}
