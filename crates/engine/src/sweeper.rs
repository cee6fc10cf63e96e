//! Background expiry of stale orders, transfers and orphaned reservations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use stock_store::InventoryStore;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SweeperConfig;
use crate::error::{EngineError, Result};
use crate::reservation::ReservationCoordinator;
use crate::transfer::TransferCoordinator;

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub orders_cancelled: usize,
    pub transfers_failed: usize,
    pub reservations_reclaimed: usize,
    /// Items that could not be resolved this pass; they are retried on the
    /// next one.
    pub errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

/// Resolves work that was left hanging:
/// - Pending orders untouched for longer than the reservation TTL are
///   cancelled through the regular cancel path
/// - Pending transfers older than the transfer TTL are marked Failed
/// - Order-line reservations older than the reservation TTL whose order is
///   missing or cancelled are released
///
/// Only one pass runs at a time.
pub struct ExpirySweeper<S: InventoryStore> {
    store: Arc<S>,
    reservations: ReservationCoordinator<S>,
    transfers: TransferCoordinator<S>,
    config: SweeperConfig,
    running: Arc<Mutex<()>>,
}

impl<S: InventoryStore> Clone for ExpirySweeper<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            reservations: self.reservations.clone(),
            transfers: self.transfers.clone(),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

impl<S: InventoryStore> ExpirySweeper<S> {
    pub fn new(
        store: Arc<S>,
        reservations: ReservationCoordinator<S>,
        transfers: TransferCoordinator<S>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            reservations,
            transfers,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Runs one pass as of now.
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.sweep(Utc::now()).await
    }

    /// Runs one pass treating `now` as the current time.
    ///
    /// Fails with `SweepInProgress` if another pass is running. Items that
    /// fail individually are logged and counted; the pass carries on.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let Ok(_pass) = self.running.try_lock() else {
            return Err(EngineError::SweepInProgress);
        };
        let started = Instant::now();
        let reservation_deadline = deadline(now, self.config.reservation_ttl)?;
        let transfer_deadline = deadline(now, self.config.transfer_ttl)?;
        let batch = self.config.batch_size;
        let mut report = SweepReport::default();

        for id in self
            .reservations
            .stale_orders(reservation_deadline, batch)
            .await?
        {
            match self
                .reservations
                .cancel_expired(id, reservation_deadline)
                .await
            {
                Ok(true) => report.orders_cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(order_id = %id, error = %e, "expiring order failed");
                    report.errors += 1;
                }
            }
        }

        for id in self
            .transfers
            .stale_transfers(transfer_deadline, batch)
            .await?
        {
            match self.transfers.fail_stale(id, transfer_deadline).await {
                Ok(true) => report.transfers_failed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(transfer_id = %id, error = %e, "expiring transfer failed");
                    report.errors += 1;
                }
            }
        }

        for entry in self
            .store
            .unsettled_reservations(reservation_deadline, batch)
            .await?
        {
            match self.reservations.reclaim_reservation(&entry).await {
                Ok(true) => report.reservations_reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(reference = %entry.reference, error = %e, "reclaiming reservation failed");
                    report.errors += 1;
                }
            }
        }

        metrics::counter!("sweeper_passes_total").increment(1);
        metrics::histogram!("sweeper_pass_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if report.is_empty() {
            tracing::debug!("sweep pass found nothing to do");
        } else {
            tracing::info!(
                orders_cancelled = report.orders_cancelled,
                transfers_failed = report.transfers_failed,
                reservations_reclaimed = report.reservations_reclaimed,
                errors = report.errors,
                "sweep pass finished"
            );
        }
        Ok(report)
    }

    /// Runs a pass every `interval` until `shutdown` fires.
    ///
    /// The next tick is only taken once the current pass has finished; a
    /// pass that overruns the interval delays the schedule rather than
    /// bunching up.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            reservation_ttl_secs = self.config.reservation_ttl.as_secs(),
            transfer_ttl_secs = self.config.transfer_ttl.as_secs(),
            "expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::warn!(error = %e, "sweep pass failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("expiry sweeper stopping");
                    break;
                }
            }
        }
    }
}

impl<S: InventoryStore + 'static> ExpirySweeper<S> {
    /// Runs the sweeper loop on its own task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

fn deadline(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .ok_or_else(|| EngineError::Internal(format!("sweeper TTL of {ttl:?} is out of range")))
}
