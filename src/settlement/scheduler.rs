// Settlement Scheduler - decides whether/when a merchant's pending funds are
// swept to available.
//
// Policies:
// - daily:  every day at settlement_time
// - weekly: at settlement_time on the listed weekdays
// - manual: never automatically
//
// Funds are eligible T+N days after the transaction (settlement_delay_days).

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike, Utc, Weekday};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::models::{SettlementConfig, SettlementConfigUpdate};
use super::repository::SettlementConfigStore;
use super::schedule;
use crate::error::AppResult;
use crate::ledger::models::normalize_currency;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Currency for policies created on first request
    pub default_currency: String,
    /// Fail instead of falling back to 09:00:00 on a malformed settlement_time
    pub strict_settlement_time: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_currency: "NGN".to_string(),
            strict_settlement_time: false,
        }
    }
}

/// Reads settlement policies and answers due-ness / timing questions.
/// Never mutates a policy as a side effect of a query.
pub struct SettlementScheduler {
    store: Arc<dyn SettlementConfigStore>,
    settings: SchedulerSettings,
}

impl SettlementScheduler {
    pub fn new(store: Arc<dyn SettlementConfigStore>, settings: SchedulerSettings) -> Self {
        Self { store, settings }
    }

    /// The merchant's policy, created with defaults on first request
    pub async fn config_for(&self, merchant_id: Uuid) -> AppResult<SettlementConfig> {
        if let Some(config) = self.store.get(merchant_id).await? {
            return Ok(config);
        }

        let currency = normalize_currency(&self.settings.default_currency)?;
        let config = self
            .store
            .get_or_create(SettlementConfig::default_for(merchant_id, &currency))
            .await?;
        info!(%merchant_id, "Created default settlement config");
        Ok(config)
    }

    /// Validate and replace the merchant's whole policy
    pub async fn update_config(
        &self,
        merchant_id: Uuid,
        update: SettlementConfigUpdate,
    ) -> AppResult<SettlementConfig> {
        let update = update.normalized();
        update.validate()?;

        let mut config = self.config_for(merchant_id).await?;
        config.apply(update);
        let stored = self.store.upsert(config).await?;

        info!(
            %merchant_id,
            schedule_type = ?stored.schedule_type,
            settlement_days = ?stored.settlement_days,
            delay_days = stored.settlement_delay_days,
            auto_settle = stored.auto_settle,
            "Updated settlement config"
        );
        Ok(stored)
    }

    pub fn should_settle_today(&self, config: &SettlementConfig, today: NaiveDate) -> bool {
        schedule::should_settle_today(config, today)
    }

    pub fn next_settlement_time(
        &self,
        config: &SettlementConfig,
        now: DateTime<Utc>,
    ) -> AppResult<DateTime<Utc>> {
        let time = schedule::resolve_settlement_time(config, self.settings.strict_settlement_time)?;
        schedule::next_settlement_time(config, now, time)
    }

    pub fn calculate_settlement_date(
        &self,
        config: &SettlementConfig,
        transaction_date: NaiveDate,
    ) -> AppResult<NaiveDate> {
        schedule::calculate_settlement_date(config, transaction_date)
    }

    /// Every auto-settling policy due on `weekday`. Moves no money.
    pub async fn list_due(&self, weekday: Weekday) -> AppResult<Vec<SettlementConfig>> {
        let due = self.store.list_due(weekday).await?;
        debug!(?weekday, count = due.len(), "Listed due settlement configs");
        Ok(due)
    }

    /// Hour-of-day at which this policy's run fires
    pub fn settlement_hour(&self, config: &SettlementConfig) -> AppResult<u32> {
        let time = schedule::resolve_settlement_time(config, self.settings.strict_settlement_time)?;
        Ok(time.hour())
    }
}
