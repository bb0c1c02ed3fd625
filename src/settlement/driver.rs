// Settlement Driver - periodic sweep of due merchants
//
// Hourly Flow:
// 1. On start, sweep the hour already in progress, then wake at each top of the hour
// 2. Ask the scheduler which policies are due on today's weekday
// 3. Keep the ones whose settlement_time falls in this hour
// 4. Settle each merchant's whole pending balance (if >= minimum_amount)
//
// Transient store errors are retried a bounded number of times with a linear
// backoff. Distinct merchants are swept concurrently; a failure for one
// merchant is logged and counted, never aborts the cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, DurationRound, Timelike, Utc};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::models::SettlementConfig;
use super::scheduler::SettlementScheduler;
use crate::clock::Clock;
use crate::error::AppResult;
use crate::ledger::BalanceLedger;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Per-cycle tally
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Policies due on this weekday
    pub due: usize,
    /// Of those, policies whose run fires in this hour
    pub attempted: usize,
    pub settled: usize,
    /// Saturates at i64::MAX
    pub settled_amount: i64,
    pub nothing_pending: usize,
    pub below_minimum: usize,
    /// Pending shrank between read and settle (another sweeper won)
    pub contended: usize,
    pub failed: usize,
    /// Store calls repeated after a transient error
    pub retried: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    Settled(i64),
    NothingPending,
    BelowMinimum,
    Contended,
    Failed,
}

pub struct SettlementDriver {
    ledger: Arc<BalanceLedger>,
    scheduler: Arc<SettlementScheduler>,
    clock: Arc<dyn Clock>,
    concurrency: usize,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl SettlementDriver {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        scheduler: Arc<SettlementScheduler>,
        clock: Arc<dyn Clock>,
        concurrency: usize,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            clock,
            concurrency: concurrency.max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = retry_backoff;
        self
    }

    /// Start the hourly sweep loop (runs in background)
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // a worker started at 09:30 still owes the 09:00 policies their run
            let mut slot = current_slot(self.clock.now());

            loop {
                match self.run_cycle(slot).await {
                    Ok(report) => info!(
                        due = report.due,
                        attempted = report.attempted,
                        settled = report.settled,
                        settled_amount = report.settled_amount,
                        below_minimum = report.below_minimum,
                        contended = report.contended,
                        failed = report.failed,
                        retried = report.retried,
                        "✓ Settlement sweep completed"
                    ),
                    Err(e) => error!(
                        retryable = e.is_retryable(),
                        "❌ Settlement sweep failed: {:?}", e
                    ),
                }

                let now = self.clock.now();
                slot = next_cycle_at(now);
                info!(
                    "⏰ Next settlement sweep scheduled for: {} UTC",
                    slot.format("%Y-%m-%d %H:%M:%S")
                );
                if let Ok(wait) = (slot - now).to_std() {
                    tokio::time::sleep(wait).await;
                }
            }
        })
    }

    /// One sweep for the slot starting at `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> AppResult<CycleReport> {
        let mut retried = 0;
        let scheduler = &self.scheduler;
        let weekday = now.weekday();
        let due = self
            .with_retries("list_due", &mut retried, move || scheduler.list_due(weekday))
            .await?;

        let mut report = CycleReport {
            due: due.len(),
            retried,
            ..CycleReport::default()
        };

        let mut this_hour = Vec::new();
        for config in due {
            match self.scheduler.settlement_hour(&config) {
                Ok(hour) if hour == now.hour() => this_hour.push(config),
                Ok(_) => {}
                Err(e) => {
                    warn!(merchant_id = %config.merchant_id, "Skipping merchant: {}", e);
                    report.failed += 1;
                }
            }
        }
        report.attempted = this_hour.len();

        let outcomes: Vec<(SweepOutcome, usize)> = stream::iter(this_hour)
            .map(|config| self.sweep(config))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (outcome, retried) in outcomes {
            report.retried += retried;
            match outcome {
                SweepOutcome::Settled(amount) => {
                    report.settled += 1;
                    report.settled_amount = report.settled_amount.saturating_add(amount);
                }
                SweepOutcome::NothingPending => report.nothing_pending += 1,
                SweepOutcome::BelowMinimum => report.below_minimum += 1,
                SweepOutcome::Contended => report.contended += 1,
                SweepOutcome::Failed => report.failed += 1,
            }
        }

        Ok(report)
    }

    /// Settle everything currently pending for one merchant
    async fn sweep(&self, config: SettlementConfig) -> (SweepOutcome, usize) {
        let mut retried = 0;
        let outcome = self.sweep_once(&config, &mut retried).await;
        (outcome, retried)
    }

    async fn sweep_once(&self, config: &SettlementConfig, retried: &mut usize) -> SweepOutcome {
        let merchant_id = config.merchant_id;
        let currency = config.currency.as_str();
        let ledger = &self.ledger;

        let balance = match self
            .with_retries("get_balance", retried, move || ledger.get(merchant_id, currency))
            .await
        {
            Ok(Some(balance)) => balance,
            Ok(None) => return SweepOutcome::NothingPending,
            Err(e) => {
                error!(%merchant_id, retryable = e.is_retryable(), "Failed to read balance: {}", e);
                return SweepOutcome::Failed;
            }
        };

        let amount = balance.pending_balance;
        if amount <= 0 {
            return SweepOutcome::NothingPending;
        }
        if amount < config.minimum_amount {
            debug!(
                %merchant_id,
                pending = amount,
                minimum = config.minimum_amount,
                "Pending below settlement minimum"
            );
            return SweepOutcome::BelowMinimum;
        }

        // settle is conditional on pending >= amount, so a repeat after an
        // unacknowledged commit surfaces as contention, never a second move
        match self
            .with_retries("settle", retried, move || ledger.settle(merchant_id, currency, amount))
            .await
        {
            Ok(_) => SweepOutcome::Settled(amount),
            Err(e) if e.is_insufficient_funds() => SweepOutcome::Contended,
            Err(e) => {
                error!(%merchant_id, retryable = e.is_retryable(), "Settlement failed: {}", e);
                SweepOutcome::Failed
            }
        }
    }

    /// Run `call`, repeating it while the error is transient and attempts remain
    async fn with_retries<T, F, Fut>(
        &self,
        operation: &'static str,
        retried: &mut usize,
        mut call: F,
    ) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Transient failure, retrying: {}", e
                    );
                    *retried += 1;
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Start of the hour containing `now`
fn current_slot(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(ChronoDuration::hours(1)).unwrap_or(now)
}

/// Next top of the hour strictly after `now`
fn next_cycle_at(now: DateTime<Utc>) -> DateTime<Utc> {
    current_slot(now) + ChronoDuration::hours(1)
}
