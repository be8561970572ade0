//! # Sync Engine
//!
//! Drains the offline sale queue into the remote store.
//!
//! ## One Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncEngine::sync_now()                           │
//! │                                                                         │
//! │  pass already running? ──yes──► skipped(AlreadyRunning)                │
//! │  offline?              ──yes──► skipped(Offline)                       │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  snapshot = queue.list_pending()      (empty → zero summary, no I/O)   │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  ┌────────── batch 1 ──────────┐   ┌────────── batch 2 ──────────┐     │
//! │  │ sale  sale  sale  sale  sale│   │ sale  sale  ...             │     │
//! │  │  │     │     │     │     │  │   │                             │     │
//! │  │  └─────┴─ join_all ┴─────┘  │   │                             │     │
//! │  └─────────────┬───────────────┘   └─────────────────────────────┘     │
//! │                │  cooldown (interruptible)     ▲                        │
//! │                └───────────────────────────────┘                        │
//! │                                                                         │
//! │  Per sale:                                                              │
//! │    receipt? ──no──► create_sale(idempotency key) ──► record receipt    │
//! │    lines?   ──no──► create_sale_lines            ──► mark receipt      │
//! │    queue.remove(id)                                                    │
//! │                                                                         │
//! │    NetworkFailure / NoTenant / Timeout → stays queued                  │
//! │    RemoteRejection                    → quarantined                    │
//! │    StorageUnavailable                 → pass aborts                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Safety
//! A sale leaves the queue only after the remote store has both the header
//! and the lines. The sync receipt records how far a sale got, so a crash
//! between the two calls resumes at the lines instead of creating the sale
//! twice, and the idempotency key covers a crash before the receipt.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use till_core::{CatalogSearch, NewQueuedSale, QuarantinedSale, QueuedSale};
use till_db::{Database, DbError, LocalStore};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::{SyncConfig, SyncSettings};
use crate::connectivity::ConnectivityPort;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteSale, RemoteSaleLine, RemoteStore, RestRemoteStore};
use crate::tenant::{SessionProvider, StaticSession, TenantResolver};

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation for a sync pass.
///
/// Checked before each batch, during the cooldown and around every
/// submission. A cancelled submission leaves its sale queued.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        CancelSignal { tx: Arc::new(tx) }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Pass Results
// =============================================================================

/// Why a pass did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
    Cancelled,
}

/// What happened to one queued sale in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaleOutcome {
    /// Upstream and removed from the queue.
    Synced { remote_sale_id: String },
    /// Still queued; a later pass retries it.
    Failed { reason: String, retryable: bool },
    /// Rejected upstream and moved to quarantine.
    Quarantined { reason: String },
    /// Pass cancelled while this sale was in flight; still queued.
    Cancelled,
}

/// Outcome of one sale's submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAttemptResult {
    pub sale_id: String,
    pub outcome: SaleOutcome,
}

impl SyncAttemptResult {
    fn new(sale_id: &str, outcome: SaleOutcome) -> Self {
        SyncAttemptResult {
            sale_id: sale_id.to_string(),
            outcome,
        }
    }

    pub fn is_synced(&self) -> bool {
        matches!(self.outcome, SaleOutcome::Synced { .. })
    }
}

/// Aggregate result of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPassSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the pass did no work at all.
    pub skipped: Option<SkipReason>,
    /// Size of each batch actually submitted, in order.
    pub batches: Vec<usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub cancelled: usize,
    /// Cancellation stopped the pass before every batch ran.
    pub interrupted: bool,
    /// One entry per sale submitted, in queue order.
    pub attempts: Vec<SyncAttemptResult>,
}

impl SyncPassSummary {
    fn started() -> Self {
        let now = Utc::now();
        SyncPassSummary {
            started_at: now,
            finished_at: now,
            skipped: None,
            batches: Vec::new(),
            succeeded: 0,
            failed: 0,
            quarantined: 0,
            cancelled: 0,
            interrupted: false,
            attempts: Vec::new(),
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        SyncPassSummary {
            skipped: Some(reason),
            ..Self::started()
        }
    }

    fn record(&mut self, attempt: SyncAttemptResult) {
        match &attempt.outcome {
            SaleOutcome::Synced { .. } => self.succeeded += 1,
            SaleOutcome::Failed { .. } => self.failed += 1,
            SaleOutcome::Quarantined { .. } => self.quarantined += 1,
            SaleOutcome::Cancelled => self.cancelled += 1,
        }
        self.attempts.push(attempt);
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Number of sales a submission was attempted for.
    pub fn attempted(&self) -> usize {
        self.attempts.len()
    }

    /// Reason of the last failed sale, if any.
    pub fn last_failure(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| match &a.outcome {
            SaleOutcome::Failed { reason, .. } | SaleOutcome::Quarantined { reason } => {
                Some(reason.as_str())
            }
            _ => None,
        })
    }
}

// =============================================================================
// Status & Events
// =============================================================================

/// Snapshot of the engine for UI display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: i64,
    pub quarantined_count: i64,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_summary: Option<SyncPassSummary>,
}

/// Event emitter for sync status updates.
///
/// Implemented by the host (e.g. forwarding to a UI event bus).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a sync progress event.
    fn emit_progress(&self, pending: i64, synced: i64);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for headless operation.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: i64, _synced: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Options
// =============================================================================

/// Pacing of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Sales submitted concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_cooldown: Duration,
    /// Upper bound for one sale's submission.
    pub submit_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            batch_size: 5,
            batch_cooldown: Duration::from_millis(500),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&SyncSettings> for EngineOptions {
    fn from(settings: &SyncSettings) -> Self {
        EngineOptions {
            batch_size: settings.batch_size.max(1),
            batch_cooldown: Duration::from_millis(settings.batch_cooldown_ms),
            submit_timeout: Duration::from_secs(settings.submit_timeout_secs),
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Offline queue drain and product cache refresh.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<dyn ConnectivityPort>,
    tenants: TenantResolver,
    options: EngineOptions,
    emitter: Arc<dyn SyncEventEmitter>,
    pass_lock: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncEngine {
    /// Starts building an engine over `store`.
    pub fn builder(store: LocalStore) -> SyncEngineBuilder {
        SyncEngineBuilder::new(store)
    }

    /// Wires an engine from configuration with the REST remote store.
    pub fn from_config(
        config: &SyncConfig,
        store: LocalStore,
        session: Arc<dyn SessionProvider>,
        connectivity: Arc<dyn ConnectivityPort>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let remote = RestRemoteStore::new(&config.remote, session.clone())?;
        let tenants =
            TenantResolver::with_sources(config.tenant.sources()?, session, store.clone());

        info!(
            device_id = %config.device_id(),
            remote = %remote.base_url(),
            frequency = %config.frequency(),
            "Sync engine configured"
        );

        Self::builder(store)
            .remote(Arc::new(remote))
            .connectivity(connectivity)
            .tenant_resolver(tenants)
            .options(EngineOptions::from(&config.sync))
            .build()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn tenants(&self) -> &TenantResolver {
        &self.tenants
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Durably queues a completed sale.
    ///
    /// The sale is tagged with the current tenant when one resolves; if
    /// none does it is stored untagged and tagged at sync time. Cached
    /// stock is then decremented per line, best effort.
    ///
    /// ## Returns
    /// * `Ok(QueuedSale)` - On disk; survives a crash from here on
    /// * `Err(SyncError::InvalidSale)` - Rejected before queuing
    /// * `Err(SyncError::StorageUnavailable)` - Nothing was queued
    pub async fn enqueue_sale(&self, sale: NewQueuedSale) -> SyncResult<QueuedSale> {
        let db = self.store.open().await?;

        let tenant = match self.tenants.resolve().await {
            Ok(tenant) => Some(tenant),
            Err(SyncError::NoTenant) => {
                warn!(user_id = %sale.user_id, "No tenant available, queuing sale untagged");
                None
            }
            Err(e) => return Err(e),
        };

        let queued = db.queue().enqueue(sale, tenant.as_deref()).await?;
        info!(
            sale_id = %queued.id,
            total = %queued.total,
            tenant_id = ?queued.tenant_id,
            "Sale queued for sync"
        );

        let products = db.products();
        for line in &queued.lines {
            match products
                .decrement_stock_locally(&line.product_id, line.quantity)
                .await
            {
                Ok(remaining) => {
                    debug!(product_id = %line.product_id, remaining, "Cached stock decremented")
                }
                Err(DbError::NotFound { .. }) => {
                    debug!(product_id = %line.product_id, "Product not cached, stock unchanged")
                }
                Err(e) => {
                    warn!(product_id = %line.product_id, error = %e, "Cached stock not updated")
                }
            }
        }

        let pending = self.refresh_counts().await;
        self.emitter.emit_progress(pending, 0);

        Ok(queued)
    }

    /// Lists sales the remote store permanently rejected.
    pub async fn quarantined(&self) -> SyncResult<Vec<QuarantinedSale>> {
        let db = self.store.open().await?;
        Ok(db.queue().list_quarantined().await?)
    }

    /// Moves a quarantined sale back into the queue after it was fixed.
    pub async fn requeue_quarantined(&self, id: &str) -> SyncResult<QueuedSale> {
        let db = self.store.open().await?;
        let sale = db.queue().requeue_quarantined(id).await?;
        info!(sale_id = %id, "Quarantined sale requeued");
        self.refresh_counts().await;
        Ok(sale)
    }

    // =========================================================================
    // Product Cache
    // =========================================================================

    /// Searches the cached catalog; works offline.
    pub async fn search_catalog(&self, query: &str) -> SyncResult<CatalogSearch> {
        let db = self.store.open().await?;
        Ok(db.products().search(query).await?)
    }

    /// Replaces the product cache with the tenant's remote catalog.
    ///
    /// ## Returns
    /// * `Ok(count)` - Products now cached
    /// * `Err(SyncError::Offline)` - Not attempted
    pub async fn refresh_catalog(&self) -> SyncResult<usize> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }

        let tenant_id = self.tenants.resolve().await?;
        let items = self.remote.fetch_catalog(&tenant_id).await?;

        let db = self.store.open().await?;
        let count = db.products().replace_all(&items).await?;

        info!(tenant_id = %tenant_id, count, "Product cache refreshed");
        Ok(count)
    }

    // =========================================================================
    // Sync Pass
    // =========================================================================

    /// Runs one sync pass.
    ///
    /// Overlapping calls do not run concurrently: the second returns at
    /// once, skipped with [`SkipReason::AlreadyRunning`].
    ///
    /// ## Returns
    /// * `Ok(summary)` - Pass ran (or was skipped); per-sale failures are
    ///   inside the summary
    /// * `Err(SyncError::StorageUnavailable)` - The local store is gone
    pub async fn sync_now(&self, cancel: &CancelSignal) -> SyncResult<SyncPassSummary> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!("Sync pass already running, skipping");
            return Ok(SyncPassSummary::skipped(SkipReason::AlreadyRunning));
        };

        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync pass");
            self.status.write().await.is_online = false;
            return Ok(SyncPassSummary::skipped(SkipReason::Offline));
        }

        if cancel.is_cancelled() {
            return Ok(SyncPassSummary::skipped(SkipReason::Cancelled));
        }

        {
            let mut status = self.status.write().await;
            status.is_online = true;
            status.is_syncing = true;
        }

        let result = self.run_pass(cancel).await;
        self.finish_pass(&result).await;
        result
    }

    async fn run_pass(&self, cancel: &CancelSignal) -> SyncResult<SyncPassSummary> {
        let db = self.store.open().await?;
        let pending = db.queue().list_pending().await?;
        let mut summary = SyncPassSummary::started();

        if pending.is_empty() {
            debug!("Queue empty, nothing to sync");
        } else {
            let batch_size = self.options.batch_size.max(1);
            let total_batches = pending.len().div_ceil(batch_size);
            info!(pending = pending.len(), batch_size, batches = total_batches, "Sync pass started");

            for (index, batch) in pending.chunks(batch_size).enumerate() {
                if cancel.is_cancelled() {
                    info!(batch = index + 1, "Sync pass cancelled before batch");
                    summary.interrupted = true;
                    break;
                }

                debug!(batch = index + 1, of = total_batches, size = batch.len(), "Submitting batch");
                summary.batches.push(batch.len());

                let results =
                    join_all(batch.iter().map(|sale| self.attempt_sale(db, sale, cancel))).await;

                let mut fatal = None;
                for result in results {
                    match result {
                        Ok(attempt) => summary.record(attempt),
                        Err(e) => fatal = Some(e),
                    }
                }
                if let Some(e) = fatal {
                    return Err(e);
                }

                let remaining = (pending.len() - summary.succeeded - summary.quarantined) as i64;
                self.emitter.emit_progress(remaining, summary.succeeded as i64);

                let is_last = index + 1 == total_batches;
                if !is_last && !self.options.batch_cooldown.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.batch_cooldown) => {}
                        _ = cancel.cancelled() => {
                            info!(batch = index + 1, "Sync pass cancelled during cooldown");
                            summary.interrupted = true;
                            break;
                        }
                    }
                }
            }
        }

        summary.finished_at = Utc::now();
        if let Err(e) = db.settings().set_last_sync_at(summary.finished_at).await {
            let e = SyncError::from(e);
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "Failed to record last sync time");
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            quarantined = summary.quarantined,
            cancelled = summary.cancelled,
            interrupted = summary.interrupted,
            "Sync pass finished"
        );
        Ok(summary)
    }

    /// Submits one sale and classifies the result.
    ///
    /// Only a fatal storage error is returned as `Err`.
    async fn attempt_sale(
        &self,
        db: &Database,
        sale: &QueuedSale,
        cancel: &CancelSignal,
    ) -> SyncResult<SyncAttemptResult> {
        let timeout = self.options.submit_timeout;
        let submission = tokio::time::timeout(timeout, self.submit_sale(db, sale));

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(sale_id = %sale.id, "Submission cancelled, sale stays queued");
                return Ok(SyncAttemptResult::new(&sale.id, SaleOutcome::Cancelled));
            }
            result = submission => {
                result.unwrap_or_else(|_| Err(SyncError::Timeout(timeout.as_secs())))
            }
        };

        let outcome = match result {
            Ok(remote_sale_id) => {
                debug!(sale_id = %sale.id, remote_sale_id = %remote_sale_id, "Sale synced");
                SaleOutcome::Synced { remote_sale_id }
            }
            Err(e) if e.is_fatal() => {
                error!(sale_id = %sale.id, error = %e, "Local store failed during sync");
                return Err(e);
            }
            Err(e) if e.is_rejection() => {
                let reason = e.to_string();
                warn!(sale_id = %sale.id, reason = %reason, "Remote rejected sale, quarantining");
                match db.queue().quarantine(&sale.id, &reason).await {
                    Ok(_) => SaleOutcome::Quarantined { reason },
                    Err(qe) => {
                        let qe = SyncError::from(qe);
                        if qe.is_fatal() {
                            return Err(qe);
                        }
                        warn!(sale_id = %sale.id, error = %qe, "Quarantine failed, sale stays queued");
                        SaleOutcome::Failed {
                            reason,
                            retryable: false,
                        }
                    }
                }
            }
            Err(e) => {
                warn!(sale_id = %sale.id, error = %e, "Sale not synced, left in queue");
                SaleOutcome::Failed {
                    reason: e.to_string(),
                    retryable: e.is_retryable(),
                }
            }
        };

        Ok(SyncAttemptResult::new(&sale.id, outcome))
    }

    /// Creates the sale and its lines upstream, then drops it locally.
    async fn submit_sale(&self, db: &Database, sale: &QueuedSale) -> SyncResult<String> {
        let receipts = db.receipts();
        let existing = receipts.get(&sale.id).await?;

        // A resumed sale keeps the tenant its header was created under
        let pinned = existing.as_ref().and_then(|r| r.tenant_id.clone());
        let tenant_id = match (&sale.tenant_id, pinned) {
            (Some(tenant), _) => tenant.clone(),
            (None, Some(tenant)) => tenant,
            (None, None) => {
                let tenant = self.tenants.resolve().await?;
                debug!(sale_id = %sale.id, tenant_id = %tenant, "Untagged sale assigned current tenant");
                tenant
            }
        };

        let receipt = match existing {
            Some(receipt) => {
                debug!(
                    sale_id = %sale.id,
                    remote_sale_id = %receipt.remote_sale_id,
                    tenant_id = %tenant_id,
                    "Resuming sale from receipt"
                );
                receipt
            }
            None => {
                let remote_sale_id = self
                    .remote
                    .create_sale(&RemoteSale::from_queued(sale, &tenant_id))
                    .await?;
                receipts
                    .record_created(&sale.id, &remote_sale_id, &tenant_id)
                    .await?
            }
        };

        if receipt.lines_created_at.is_none() {
            let lines = RemoteSaleLine::for_sale(sale, &receipt.remote_sale_id, &tenant_id);
            self.remote.create_sale_lines(&lines).await?;
            receipts.mark_lines_created(&sale.id).await?;
        }

        db.queue().remove(&sale.id).await?;
        Ok(receipt.remote_sale_id)
    }

    async fn finish_pass(&self, result: &SyncResult<SyncPassSummary>) {
        {
            let mut status = self.status.write().await;
            status.is_syncing = false;
            match result {
                Ok(summary) => {
                    status.last_sync = Some(summary.finished_at);
                    status.last_error = summary.last_failure().map(str::to_string);
                    status.last_summary = Some(summary.clone());
                }
                Err(e) => status.last_error = Some(e.to_string()),
            }
        }

        if let Err(e) = result {
            error!(error = %e, "Sync pass aborted");
            self.emitter.emit_error(&e.to_string(), e.is_retryable());
        }

        self.refresh_counts().await;
        let status = self.status.read().await.clone();
        self.emitter.emit_status(&status);
    }

    /// Re-reads queue counters into the status. Returns the pending count.
    async fn refresh_counts(&self) -> i64 {
        let Ok(db) = self.store.open().await else {
            return self.status.read().await.pending_count;
        };

        let pending = db.queue().count_pending().await;
        let quarantined = db.queue().count_quarantined().await;
        let last_sync = db.settings().last_sync_at().await;

        let mut status = self.status.write().await;
        if let Ok(pending) = pending {
            status.pending_count = pending;
        }
        if let Ok(quarantined) = quarantined {
            status.quarantined_count = quarantined;
        }
        if let Ok(Some(at)) = last_sync {
            status.last_sync = Some(at);
        }
        status.pending_count
    }

    /// Returns the current status with fresh counters.
    pub async fn status(&self) -> SyncStatus {
        self.refresh_counts().await;
        let mut status = self.status.read().await.clone();
        status.is_online = self.connectivity.is_online();
        status
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncEngine with options.
pub struct SyncEngineBuilder {
    store: LocalStore,
    remote: Option<Arc<dyn RemoteStore>>,
    connectivity: Option<Arc<dyn ConnectivityPort>>,
    tenants: Option<TenantResolver>,
    options: EngineOptions,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncEngineBuilder {
    pub fn new(store: LocalStore) -> Self {
        SyncEngineBuilder {
            store,
            remote: None,
            connectivity: None,
            tenants: None,
            options: EngineOptions::default(),
            emitter: None,
        }
    }

    /// Sets the remote store (required).
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the connectivity source (required).
    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityPort>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Sets the tenant resolver. Defaults to an empty session plus the
    /// cached tenant.
    pub fn tenant_resolver(mut self, tenants: TenantResolver) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the event emitter.
    pub fn emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the SyncEngine.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;
        let connectivity = self
            .connectivity
            .ok_or_else(|| SyncError::InvalidConfig("Connectivity source required".into()))?;

        if self.options.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        let tenants = self.tenants.unwrap_or_else(|| {
            TenantResolver::new(Arc::new(StaticSession::new()), self.store.clone())
        });

        Ok(SyncEngine {
            store: self.store,
            remote,
            connectivity,
            tenants,
            options: self.options,
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            pass_lock: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use till_core::CatalogItem;
    use till_db::DbConfig;

    struct UnreachableRemote;

    #[async_trait]
    impl RemoteStore for UnreachableRemote {
        async fn create_sale(&self, _sale: &RemoteSale) -> Result<String, RemoteError> {
            Err(RemoteError::Network("unreachable".into()))
        }

        async fn create_sale_lines(&self, _lines: &[RemoteSaleLine]) -> Result<(), RemoteError> {
            Err(RemoteError::Network("unreachable".into()))
        }

        async fn fetch_catalog(&self, _tenant_id: &str) -> Result<Vec<CatalogItem>, RemoteError> {
            Err(RemoteError::Network("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let cancel = CancelSignal::new();
        assert!(!cancel.is_cancelled());

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };

        cancel.cancel();
        cancel.cancel();
        assert!(cancel.is_cancelled());
        waiter.await.unwrap();

        // Already cancelled resolves immediately
        cancel.cancelled().await;
    }

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = SyncPassSummary::started();
        summary.record(SyncAttemptResult::new(
            "a",
            SaleOutcome::Synced {
                remote_sale_id: "r-1".into(),
            },
        ));
        summary.record(SyncAttemptResult::new(
            "b",
            SaleOutcome::Failed {
                reason: "network: down".into(),
                retryable: true,
            },
        ));
        summary.record(SyncAttemptResult::new("c", SaleOutcome::Cancelled));

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.attempted(), 3);
        assert_eq!(summary.last_failure(), Some("network: down"));
        assert!(!summary.is_skipped());
    }

    #[test]
    fn test_options_from_settings() {
        let settings = SyncSettings {
            batch_size: 0,
            batch_cooldown_ms: 250,
            ..SyncSettings::default()
        };
        let options = EngineOptions::from(&settings);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.batch_cooldown, Duration::from_millis(250));
    }

    #[test]
    fn test_builder_requires_remote_and_connectivity() {
        let store = LocalStore::new(DbConfig::in_memory());
        assert!(SyncEngine::builder(store.clone()).build().is_err());

        let engine = SyncEngine::builder(store)
            .remote(Arc::new(UnreachableRemote))
            .connectivity(Arc::new(ConnectivityMonitor::new(true)))
            .build()
            .unwrap();
        assert_eq!(engine.options().batch_size, 5);
    }

    #[tokio::test]
    async fn test_refresh_catalog_offline() {
        let store = LocalStore::new(DbConfig::in_memory());
        let engine = SyncEngine::builder(store)
            .remote(Arc::new(UnreachableRemote))
            .connectivity(Arc::new(ConnectivityMonitor::new(false)))
            .build()
            .unwrap();

        assert!(matches!(engine.refresh_catalog().await, Err(SyncError::Offline)));
    }

    #[tokio::test]
    async fn test_status_reflects_queue() {
        let store = LocalStore::new(DbConfig::in_memory());
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let engine = SyncEngine::builder(store)
            .remote(Arc::new(UnreachableRemote))
            .connectivity(monitor.clone())
            .build()
            .unwrap();

        let sale = NewQueuedSale::new(
            "cashier-1",
            till_core::PaymentMethod::Cash,
            vec![till_core::SaleLine::new("p-1", 1, till_core::Money::from_cents(100))],
        );
        engine.enqueue_sale(sale).await.unwrap();

        let status = engine.status().await;
        assert_eq!(status.pending_count, 1);
        assert!(!status.is_online);
        assert!(!status.is_syncing);

        monitor.set_online(true);
        assert!(engine.status().await.is_online);
    }
}
