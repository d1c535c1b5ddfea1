//! # Reconciliation Sweep
//!
//! Rolls back checkouts that never completed. A `Pending` order is deleted
//! (the same effect as a failure callback) once both the order and its
//! checkout are older than the timeout. A checkout counts from its latest
//! progress, or from its session expiry when that is later, so a resumed
//! checkout keeps its order alive. Intents whose order no longer exists are
//! pruned once they have gone just as long without progress.

use crate::error::OrderResult;
use crate::intent::IntentRepository;
use crate::store::{DiscardOutcome, OrderRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// What a single sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Pending orders deleted
    pub rolled_back: Vec<String>,
    /// Orphaned intents removed
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.rolled_back.is_empty() && self.pruned == 0
    }
}

pub struct Reconciler {
    orders: Arc<dyn OrderRepository>,
    intents: Arc<dyn IntentRepository>,
    pending_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        intents: Arc<dyn IntentRepository>,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            intents,
            pending_timeout,
        }
    }

    /// One pass relative to `now`
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> OrderResult<SweepReport> {
        let timeout = chrono::Duration::from_std(self.pending_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = now - timeout;
        let mut report = SweepReport::default();

        for order in self.orders.pending_before(cutoff).await? {
            if let Some(intent) = self.intents.get(&order.id).await? {
                let live_until = intent.live_until(timeout);
                if live_until > now {
                    debug!(order_id = %order.id, %live_until, "checkout still live; kept");
                    continue;
                }
            }
            // A late success callback may have landed since the listing
            match self.orders.delete_unpaid(&order.id).await? {
                DiscardOutcome::Deleted(_) => {
                    self.intents.remove(&order.id).await?;
                    warn!(
                        order_id = %order.id,
                        created = %order.date,
                        "rolled back stale pending order"
                    );
                    report.rolled_back.push(order.id);
                }
                DiscardOutcome::AlreadyPaid | DiscardOutcome::Missing => {}
            }
        }

        let live: HashSet<String> = self
            .orders
            .list_all()
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        // Recent intents may belong to an order that is about to be written
        for intent in self.intents.list().await? {
            if !live.contains(&intent.order_id) && intent.updated_at < cutoff {
                self.intents.remove(&intent.order_id).await?;
                report.pruned += 1;
            }
        }

        if !report.is_empty() {
            info!(
                rolled_back = report.rolled_back.len(),
                pruned = report.pruned,
                "reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until the task is dropped
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                error!(error = %e, "reconciliation sweep failed");
            }
        }
    }
}
