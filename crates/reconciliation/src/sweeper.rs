//! Background jobs that move orders nobody else will move.
//!
//! Two jobs run on their own intervals:
//! - payment timeout: `AWAITING_PAYMENT` orders past the payment window are cancelled
//! - stuck delivery: `DELIVERING` orders past the delivery window are completed
//!
//! Each order goes through the same compare-and-set as user and admin actions,
//! so an order that changed since the scan is skipped, not overwritten.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderStatus, RequestContext};
use domain::{LifecycleError, OrderLifecycle};
use order_store::{Order, OrderStore};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::Result;

/// Intervals and age thresholds for the two jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub payment_interval: Duration,
    pub payment_timeout: Duration,
    pub delivery_interval: Duration,
    pub delivery_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            payment_interval: Duration::from_secs(3 * 60),
            payment_timeout: Duration::from_secs(15 * 60),
            delivery_interval: Duration::from_secs(24 * 60 * 60),
            delivery_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Which sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepJob {
    PaymentTimeout,
    DeliveryStuck,
}

impl SweepJob {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepJob::PaymentTimeout => "payment_timeout",
            SweepJob::DeliveryStuck => "delivery_stuck",
        }
    }

    fn status(&self) -> OrderStatus {
        match self {
            SweepJob::PaymentTimeout => OrderStatus::AwaitingPayment,
            SweepJob::DeliveryStuck => OrderStatus::Delivering,
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub transitioned: usize,
    /// Orders that moved on between the scan and the update.
    pub skipped: usize,
    pub failed: usize,
}

pub struct TimeoutSweeper<S: OrderStore> {
    lifecycle: Arc<OrderLifecycle<S>>,
    config: SweeperConfig,
}

impl<S: OrderStore> TimeoutSweeper<S> {
    pub fn new(lifecycle: Arc<OrderLifecycle<S>>, config: SweeperConfig) -> Self {
        Self { lifecycle, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Cancels unpaid orders created more than the payment timeout before `now`.
    pub async fn sweep_payment_timeouts(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweep(SweepJob::PaymentTimeout, now).await
    }

    /// Completes delivering orders created more than the delivery timeout before `now`.
    pub async fn sweep_stuck_deliveries(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweep(SweepJob::DeliveryStuck, now).await
    }

    /// Runs one pass of `job`. A failed scan is an error; a failed order is counted.
    #[tracing::instrument(skip(self, job), fields(job = job.as_str()))]
    pub async fn sweep(&self, job: SweepJob, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - self.timeout(job);
        let ctx = RequestContext::sweeper();

        let orders = self
            .lifecycle
            .store()
            .find_by_status_created_before(job.status(), cutoff)
            .await
            .map_err(LifecycleError::from)?;

        let mut report = SweepReport {
            scanned: orders.len(),
            ..Default::default()
        };

        for order in &orders {
            let outcome = match self.apply(job, &ctx, order).await {
                Ok(_) => {
                    report.transitioned += 1;
                    "transitioned"
                }
                Err(e) if e.is_invalid_transition() => {
                    tracing::debug!(
                        order_number = %order.number,
                        "Order moved on before sweep, skipping"
                    );
                    report.skipped += 1;
                    "skipped"
                }
                Err(e) => {
                    tracing::error!(
                        order_number = %order.number,
                        error = %e,
                        "Sweep failed for order"
                    );
                    report.failed += 1;
                    "failed"
                }
            };
            metrics::counter!("sweeper_orders_total", "job" => job.as_str(), "outcome" => outcome)
                .increment(1);
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                transitioned = report.transitioned,
                skipped = report.skipped,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// Runs both jobs on their intervals until `shutdown` flips.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            payment_interval_secs = self.config.payment_interval.as_secs(),
            delivery_interval_secs = self.config.delivery_interval.as_secs(),
            "Timeout sweeper started"
        );
        tokio::join!(
            self.run_job(SweepJob::PaymentTimeout, shutdown.clone()),
            self.run_job(SweepJob::DeliveryStuck, shutdown),
        );
        tracing::info!("Timeout sweeper stopped");
    }

    async fn run_job(&self, job: SweepJob, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval(job));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(job, Utc::now()).await {
                        tracing::error!(job = job.as_str(), error = %e, "Sweep scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn apply(
        &self,
        job: SweepJob,
        ctx: &RequestContext,
        order: &Order,
    ) -> domain::Result<Order> {
        match job {
            SweepJob::PaymentTimeout => self.lifecycle.expire_unpaid(ctx, order).await,
            SweepJob::DeliveryStuck => self.lifecycle.auto_complete(ctx, order).await,
        }
    }

    fn interval(&self, job: SweepJob) -> Duration {
        match job {
            SweepJob::PaymentTimeout => self.config.payment_interval,
            SweepJob::DeliveryStuck => self.config.delivery_interval,
        }
    }

    fn timeout(&self, job: SweepJob) -> chrono::Duration {
        let timeout = match job {
            SweepJob::PaymentTimeout => self.config.payment_timeout,
            SweepJob::DeliveryStuck => self.config.delivery_timeout,
        };
        chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX)
    }
}
