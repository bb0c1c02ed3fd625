use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::models::MerchantBalance;
use super::repository::BalanceStore;
use crate::error::{AppError, AppResult};

type BalanceKey = (Uuid, String);

/// In-process balance store.
///
/// Each row sits behind its own mutex; the conditional check and the
/// mutation run inside one guard, so same-row calls serialize and distinct
/// rows never share a lock. The outer map lock is only held to find or
/// insert a row handle.
#[derive(Default)]
pub struct InMemoryBalanceStore {
    rows: RwLock<HashMap<BalanceKey, Arc<Mutex<MerchantBalance>>>>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, merchant_id: Uuid, currency: &str) -> Option<Arc<Mutex<MerchantBalance>>> {
        self.rows
            .read()
            .get(&(merchant_id, currency.to_string()))
            .cloned()
    }

    fn row_or_insert(&self, merchant_id: Uuid, currency: &str) -> Arc<Mutex<MerchantBalance>> {
        if let Some(row) = self.row(merchant_id, currency) {
            return row;
        }

        self.rows
            .write()
            .entry((merchant_id, currency.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(MerchantBalance::zeroed(merchant_id, currency))))
            .clone()
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn get(&self, merchant_id: Uuid, currency: &str) -> AppResult<Option<MerchantBalance>> {
        Ok(self.row(merchant_id, currency).map(|row| row.lock().clone()))
    }

    async fn get_or_create(&self, merchant_id: Uuid, currency: &str) -> AppResult<MerchantBalance> {
        Ok(self.row_or_insert(merchant_id, currency).lock().clone())
    }

    async fn add_pending(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        let row = self.row_or_insert(merchant_id, currency);
        let mut balance = row.lock();

        let overflow = || AppError::BalanceOverflow {
            merchant_id,
            currency: currency.to_string(),
        };
        let pending = balance.pending_balance.checked_add(amount).ok_or_else(overflow)?;
        let volume = balance.total_volume.checked_add(amount).ok_or_else(overflow)?;

        balance.pending_balance = pending;
        balance.total_volume = volume;
        balance.updated_at = Utc::now();
        Ok(balance.clone())
    }

    async fn settle_pending(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        let insufficient = || AppError::InsufficientPendingFunds {
            merchant_id,
            currency: currency.to_string(),
            requested: amount,
        };

        let row = self.row(merchant_id, currency).ok_or_else(insufficient)?;
        let mut balance = row.lock();

        if !balance.has_pending(amount) {
            return Err(insufficient());
        }
        let available = balance
            .available_balance
            .checked_add(amount)
            .ok_or_else(|| AppError::BalanceOverflow {
                merchant_id,
                currency: currency.to_string(),
            })?;

        balance.pending_balance -= amount;
        balance.available_balance = available;
        balance.updated_at = Utc::now();
        Ok(balance.clone())
    }

    async fn deduct_available(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        let insufficient = || AppError::InsufficientAvailableFunds {
            merchant_id,
            currency: currency.to_string(),
            requested: amount,
        };

        let row = self.row(merchant_id, currency).ok_or_else(insufficient)?;
        let mut balance = row.lock();

        if !balance.has_available(amount) {
            return Err(insufficient());
        }

        balance.available_balance -= amount;
        balance.updated_at = Utc::now();
        Ok(balance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_lazy_and_stable() {
        let store = InMemoryBalanceStore::new();
        let merchant = Uuid::new_v4();

        assert!(store.get(merchant, "NGN").await.unwrap().is_none());

        let created = store.get_or_create(merchant, "NGN").await.unwrap();
        assert_eq!(created.pending_balance, 0);
        assert_eq!(created.available_balance, 0);
        assert_eq!(created.total_volume, 0);

        store.add_pending(merchant, "NGN", 10).await.unwrap();
        let again = store.get_or_create(merchant, "NGN").await.unwrap();
        assert_eq!(again.pending_balance, 10);
    }

    #[tokio::test]
    async fn test_settle_missing_row_is_insufficient() {
        let store = InMemoryBalanceStore::new();
        let err = store
            .settle_pending(Uuid::new_v4(), "NGN", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPendingFunds { requested: 1, .. }));
    }

    #[tokio::test]
    async fn test_add_pending_overflow_leaves_row_untouched() {
        let store = InMemoryBalanceStore::new();
        let merchant = Uuid::new_v4();

        store.add_pending(merchant, "NGN", i64::MAX).await.unwrap();
        let err = store.add_pending(merchant, "NGN", 1).await.unwrap_err();
        assert!(matches!(err, AppError::BalanceOverflow { .. }));

        let balance = store.get(merchant, "NGN").await.unwrap().unwrap();
        assert_eq!(balance.pending_balance, i64::MAX);
        assert_eq!(balance.total_volume, i64::MAX);
    }

    #[tokio::test]
    async fn test_rows_are_keyed_by_currency() {
        let store = InMemoryBalanceStore::new();
        let merchant = Uuid::new_v4();

        store.add_pending(merchant, "NGN", 100).await.unwrap();
        store.add_pending(merchant, "USD", 7).await.unwrap();

        assert_eq!(store.get(merchant, "NGN").await.unwrap().unwrap().pending_balance, 100);
        assert_eq!(store.get(merchant, "USD").await.unwrap().unwrap().pending_balance, 7);
    }
}
