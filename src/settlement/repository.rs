use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Utc, Weekday};
use parking_lot::RwLock;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{weekday_number, SettlementConfig};
use super::schedule::is_due_on;
use crate::error::AppResult;

/// Storage seam for settlement policies (one row per merchant)
#[async_trait]
pub trait SettlementConfigStore: Send + Sync {
    async fn get(&self, merchant_id: Uuid) -> AppResult<Option<SettlementConfig>>;

    /// Insert `default` unless the merchant already has a policy; returns the stored row
    async fn get_or_create(&self, default: SettlementConfig) -> AppResult<SettlementConfig>;

    /// Replace the merchant's whole policy
    async fn upsert(&self, config: SettlementConfig) -> AppResult<SettlementConfig>;

    /// auto_settle AND (daily OR (weekly AND weekday in settlement_days))
    async fn list_due(&self, weekday: Weekday) -> AppResult<Vec<SettlementConfig>>;
}

const CONFIG_COLUMNS: &str = "id, merchant_id, schedule_type, settlement_time, settlement_days, \
     minimum_amount, auto_settle, settlement_delay_days, currency, created_at, updated_at";

pub struct PgSettlementConfigStore {
    pool: PgPool,
}

impl PgSettlementConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementConfigStore for PgSettlementConfigStore {
    async fn get(&self, merchant_id: Uuid) -> AppResult<Option<SettlementConfig>> {
        let config = sqlx::query_as::<_, SettlementConfig>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM settlement_configs WHERE merchant_id = $1"
        ))
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }

    async fn get_or_create(&self, default: SettlementConfig) -> AppResult<SettlementConfig> {
        let config = sqlx::query_as::<_, SettlementConfig>(&format!(
            r#"
            INSERT INTO settlement_configs (
                id, merchant_id, schedule_type, settlement_time, settlement_days,
                minimum_amount, auto_settle, settlement_delay_days, currency
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (merchant_id)
            DO UPDATE SET merchant_id = EXCLUDED.merchant_id
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(default.id)
        .bind(default.merchant_id)
        .bind(default.schedule_type)
        .bind(&default.settlement_time)
        .bind(&default.settlement_days)
        .bind(default.minimum_amount)
        .bind(default.auto_settle)
        .bind(default.settlement_delay_days)
        .bind(&default.currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(config)
    }

    async fn upsert(&self, config: SettlementConfig) -> AppResult<SettlementConfig> {
        let stored = sqlx::query_as::<_, SettlementConfig>(&format!(
            r#"
            INSERT INTO settlement_configs (
                id, merchant_id, schedule_type, settlement_time, settlement_days,
                minimum_amount, auto_settle, settlement_delay_days, currency
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (merchant_id)
            DO UPDATE SET
                schedule_type = EXCLUDED.schedule_type,
                settlement_time = EXCLUDED.settlement_time,
                settlement_days = EXCLUDED.settlement_days,
                minimum_amount = EXCLUDED.minimum_amount,
                auto_settle = EXCLUDED.auto_settle,
                settlement_delay_days = EXCLUDED.settlement_delay_days,
                currency = EXCLUDED.currency,
                updated_at = NOW()
            RETURNING {CONFIG_COLUMNS}
            "#
        ))
        .bind(config.id)
        .bind(config.merchant_id)
        .bind(config.schedule_type)
        .bind(&config.settlement_time)
        .bind(&config.settlement_days)
        .bind(config.minimum_amount)
        .bind(config.auto_settle)
        .bind(config.settlement_delay_days)
        .bind(&config.currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn list_due(&self, weekday: Weekday) -> AppResult<Vec<SettlementConfig>> {
        let configs = sqlx::query_as::<_, SettlementConfig>(&format!(
            r#"
            SELECT {CONFIG_COLUMNS}
            FROM settlement_configs
            WHERE auto_settle = TRUE
              AND (
                schedule_type = 'daily'
                OR (schedule_type = 'weekly' AND $1 = ANY(settlement_days))
              )
            ORDER BY merchant_id
            "#
        ))
        .bind(weekday_number(weekday))
        .fetch_all(&self.pool)
        .await?;

        Ok(configs)
    }
}

/// In-process policy store used by tests and local runs
#[derive(Default)]
pub struct InMemorySettlementConfigStore {
    configs: RwLock<HashMap<Uuid, SettlementConfig>>,
}

impl InMemorySettlementConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementConfigStore for InMemorySettlementConfigStore {
    async fn get(&self, merchant_id: Uuid) -> AppResult<Option<SettlementConfig>> {
        Ok(self.configs.read().get(&merchant_id).cloned())
    }

    async fn get_or_create(&self, default: SettlementConfig) -> AppResult<SettlementConfig> {
        Ok(self
            .configs
            .write()
            .entry(default.merchant_id)
            .or_insert(default)
            .clone())
    }

    async fn upsert(&self, mut config: SettlementConfig) -> AppResult<SettlementConfig> {
        let mut configs = self.configs.write();
        if let Some(existing) = configs.get(&config.merchant_id) {
            config.id = existing.id;
            config.created_at = existing.created_at;
        }
        config.updated_at = Utc::now();
        configs.insert(config.merchant_id, config.clone());
        Ok(config)
    }

    async fn list_due(&self, weekday: Weekday) -> AppResult<Vec<SettlementConfig>> {
        let mut due: Vec<SettlementConfig> = self
            .configs
            .read()
            .values()
            .filter(|config| is_due_on(config, weekday))
            .cloned()
            .collect();
        due.sort_by_key(|config| config.merchant_id);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::models::ScheduleType;

    fn policy(schedule_type: ScheduleType, days: Vec<i32>, auto_settle: bool) -> SettlementConfig {
        let mut config = SettlementConfig::default_for(Uuid::new_v4(), "NGN");
        config.schedule_type = schedule_type;
        config.settlement_days = days;
        config.auto_settle = auto_settle;
        config
    }

    #[tokio::test]
    async fn test_get_or_create_keeps_existing() {
        let store = InMemorySettlementConfigStore::new();
        let mut first = policy(ScheduleType::Weekly, vec![2], true);
        first.minimum_amount = 5_000;
        let merchant_id = first.merchant_id;
        store.get_or_create(first.clone()).await.unwrap();

        let mut second = SettlementConfig::default_for(merchant_id, "USD");
        second.minimum_amount = 1;
        let stored = store.get_or_create(second).await.unwrap();

        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_upsert_preserves_identity() {
        let store = InMemorySettlementConfigStore::new();
        let original = store
            .get_or_create(policy(ScheduleType::Daily, vec![], true))
            .await
            .unwrap();

        let mut replacement = SettlementConfig::default_for(original.merchant_id, "NGN");
        replacement.schedule_type = ScheduleType::Manual;
        let stored = store.upsert(replacement).await.unwrap();

        assert_eq!(stored.id, original.id);
        assert_eq!(stored.created_at, original.created_at);
        assert_eq!(stored.schedule_type, ScheduleType::Manual);
    }

    #[tokio::test]
    async fn test_list_due_filters() {
        let store = InMemorySettlementConfigStore::new();
        let daily = policy(ScheduleType::Daily, vec![], true);
        let mon_wed = policy(ScheduleType::Weekly, vec![1, 3], true);
        let paused = policy(ScheduleType::Daily, vec![], false);
        let manual = policy(ScheduleType::Manual, vec![1, 2, 3, 4, 5, 6, 7], true);
        for config in [&daily, &mon_wed, &paused, &manual] {
            store.upsert(config.clone()).await.unwrap();
        }

        let monday: Vec<Uuid> = store
            .list_due(Weekday::Mon)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.merchant_id)
            .collect();
        assert_eq!(monday.len(), 2);
        assert!(monday.contains(&daily.merchant_id));
        assert!(monday.contains(&mon_wed.merchant_id));

        let tuesday = store.list_due(Weekday::Tue).await.unwrap();
        assert_eq!(tuesday.len(), 1);
        assert_eq!(tuesday[0].merchant_id, daily.merchant_id);
    }
}
