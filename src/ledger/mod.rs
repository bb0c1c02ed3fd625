// Balance ledger - the only path through which balance numbers change
pub mod memory;
pub mod models;
pub mod repository;

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use models::{normalize_currency, BalanceSummary, MerchantBalance};
use repository::BalanceStore;

/// Validates input, then delegates each mutation to one atomic store call
pub struct BalanceLedger {
    store: Arc<dyn BalanceStore>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self { store }
    }

    /// Read a balance without creating it
    pub async fn get(
        &self,
        merchant_id: Uuid,
        currency: &str,
    ) -> AppResult<Option<MerchantBalance>> {
        let currency = normalize_currency(currency)?;
        self.store.get(merchant_id, &currency).await
    }

    pub async fn get_or_create(
        &self,
        merchant_id: Uuid,
        currency: &str,
    ) -> AppResult<MerchantBalance> {
        let currency = normalize_currency(currency)?;
        self.store.get_or_create(merchant_id, &currency).await
    }

    /// Balance in major units; unknown pairs read as zero without creating a row
    pub async fn summary(&self, merchant_id: Uuid, currency: &str) -> AppResult<BalanceSummary> {
        let currency = normalize_currency(currency)?;
        let balance = self
            .store
            .get(merchant_id, &currency)
            .await?
            .unwrap_or_else(|| MerchantBalance::zeroed(merchant_id, &currency));
        Ok(balance.summary())
    }

    /// Credit a captured transaction to pending. Callers guarantee at-most-once per transaction.
    pub async fn record_transaction(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        ensure_positive(amount)?;
        let currency = normalize_currency(currency)?;

        let balance = self.store.add_pending(merchant_id, &currency, amount).await?;
        debug!(
            %merchant_id, currency = %currency, amount,
            pending = balance.pending_balance,
            "Recorded transaction"
        );
        Ok(balance)
    }

    /// Move `amount` from pending to available
    pub async fn settle(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        ensure_positive(amount)?;
        let currency = normalize_currency(currency)?;

        match self.store.settle_pending(merchant_id, &currency, amount).await {
            Ok(balance) => {
                info!(
                    %merchant_id, currency = %currency, amount,
                    pending = balance.pending_balance,
                    available = balance.available_balance,
                    "Settled pending funds"
                );
                Ok(balance)
            }
            Err(e) => {
                if e.is_insufficient_funds() {
                    warn!(
                        %merchant_id,
                        currency = %currency,
                        amount,
                        "Settlement rejected: insufficient pending funds"
                    );
                }
                Err(e)
            }
        }
    }

    /// Deduct `amount` from available for an outgoing payout
    pub async fn payout(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        ensure_positive(amount)?;
        let currency = normalize_currency(currency)?;

        match self.store.deduct_available(merchant_id, &currency, amount).await {
            Ok(balance) => {
                info!(
                    %merchant_id, currency = %currency, amount,
                    available = balance.available_balance,
                    "Deducted payout"
                );
                Ok(balance)
            }
            Err(e) => {
                if e.is_insufficient_funds() {
                    warn!(
                        %merchant_id,
                        currency = %currency,
                        amount,
                        "Payout rejected: insufficient available funds"
                    );
                }
                Err(e)
            }
        }
    }
}

fn ensure_positive(amount: i64) -> AppResult<()> {
    if amount <= 0 {
        return Err(AppError::InvalidInput(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryBalanceStore;
    use super::*;
    use crate::error::ErrorKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(Arc::new(InMemoryBalanceStore::new()))
    }

    #[tokio::test]
    async fn test_record_then_settle_full_amount() {
        let ledger = ledger();
        let m1 = Uuid::new_v4();

        ledger.record_transaction(m1, "NGN", 500_000).await.unwrap();
        let balance = ledger.settle(m1, "NGN", 500_000).await.unwrap();

        assert_eq!(balance.pending_balance, 0);
        assert_eq!(balance.available_balance, 500_000);
        assert_eq!(balance.total_volume, 500_000);
    }

    #[tokio::test]
    async fn test_settle_on_fresh_balance_fails() {
        let ledger = ledger();
        let m1 = Uuid::new_v4();
        let before = ledger.get_or_create(m1, "NGN").await.unwrap();

        let err = ledger.settle(m1, "NGN", 100).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientPendingFunds { requested: 100, .. }));
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);

        let after = ledger.get(m1, "NGN").await.unwrap().unwrap();
        assert_eq!(after.pending_balance, before.pending_balance);
        assert_eq!(after.available_balance, before.available_balance);
        assert_eq!(after.total_volume, before.total_volume);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let ledger = ledger();
        let m1 = Uuid::new_v4();

        for amount in [0, -1, i64::MIN] {
            let err = ledger.record_transaction(m1, "NGN", amount).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            let err = ledger.settle(m1, "NGN", amount).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            let err = ledger.payout(m1, "NGN", amount).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        // rejected before any row was created
        assert!(ledger.get(m1, "NGN").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payout_from_available_only() {
        let ledger = ledger();
        let m1 = Uuid::new_v4();

        ledger.record_transaction(m1, "NGN", 1_000).await.unwrap();
        let err = ledger.payout(m1, "NGN", 1).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientAvailableFunds { .. }));

        ledger.settle(m1, "NGN", 600).await.unwrap();
        let balance = ledger.payout(m1, "NGN", 600).await.unwrap();
        assert_eq!(balance.available_balance, 0);
        assert_eq!(balance.pending_balance, 400);
        assert_eq!(balance.total_volume, 1_000);

        assert!(ledger.payout(m1, "NGN", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_currency_is_normalized() {
        let ledger = ledger();
        let m1 = Uuid::new_v4();

        ledger.record_transaction(m1, " ngn", 50).await.unwrap();
        let balance = ledger.get(m1, "NGN").await.unwrap().unwrap();
        assert_eq!(balance.currency, "NGN");
        assert_eq!(balance.pending_balance, 50);
    }

    #[tokio::test]
    async fn test_summary_does_not_create_row() {
        let ledger = ledger();
        let m1 = Uuid::new_v4();

        let summary = ledger.summary(m1, "NGN").await.unwrap();
        assert!(summary.pending_balance.is_zero());
        assert!(ledger.get(m1, "NGN").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_settles_never_oversettle() {
        let ledger = Arc::new(ledger());
        let m1 = Uuid::new_v4();
        ledger.record_transaction(m1, "NGN", 1_000).await.unwrap();

        // 40 x 70 = 2800 requested against 1000 pending: exactly 14 fit
        let mut handles = Vec::new();
        for _ in 0..40 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.settle(m1, "NGN", 70).await }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(balance) => {
                    assert!(balance.pending_balance >= 0);
                    succeeded += 1;
                }
                Err(e) => assert!(e.is_insufficient_funds()),
            }
        }

        let balance = ledger.get(m1, "NGN").await.unwrap().unwrap();
        assert_eq!(succeeded, 14);
        assert_eq!(balance.pending_balance, 1_000 - 14 * 70);
        assert_eq!(balance.available_balance, 14 * 70);
        assert_eq!(balance.total_volume, 1_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_mixed_operations_conserve_funds() {
        let ledger = Arc::new(ledger());
        let m1 = Uuid::new_v4();
        ledger.record_transaction(m1, "NGN", 5_000).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..60 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                match i % 3 {
                    0 => ledger.record_transaction(m1, "NGN", 100).await.map(|_| (100, 0, 0)),
                    1 => ledger.settle(m1, "NGN", 300).await.map(|_| (0, 300, 0)),
                    _ => ledger.payout(m1, "NGN", 200).await.map(|_| (0, 0, 200)),
                }
            }));
        }

        let (mut recorded, mut settled, mut paid) = (5_000i64, 0i64, 0i64);
        for handle in handles {
            if let Ok((r, s, p)) = handle.await.unwrap() {
                recorded += r;
                settled += s;
                paid += p;
            }
        }

        let balance = ledger.get(m1, "NGN").await.unwrap().unwrap();
        assert_eq!(balance.total_volume, recorded);
        assert_eq!(balance.pending_balance, recorded - settled);
        assert_eq!(balance.available_balance, settled - paid);
        assert_eq!(balance.pending_balance + balance.available_balance + paid, recorded);
    }

    #[tokio::test]
    async fn test_random_sequences_keep_balances_non_negative() {
        let ledger = ledger();
        let mut rng = StdRng::seed_from_u64(0x5e77_1e);
        let merchants: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        for _ in 0..2_000 {
            let merchant = merchants[rng.random_range(0..merchants.len())];
            let amount = rng.random_range(1..=10_000);
            let before = ledger.get_or_create(merchant, "NGN").await.unwrap();

            let result = match rng.random_range(0..3) {
                0 => ledger.record_transaction(merchant, "NGN", amount).await,
                1 => ledger.settle(merchant, "NGN", amount).await,
                _ => ledger.payout(merchant, "NGN", amount).await,
            };

            let after = ledger.get(merchant, "NGN").await.unwrap().unwrap();
            assert!(after.pending_balance >= 0);
            assert!(after.available_balance >= 0);
            assert!(after.total_volume >= before.total_volume);

            if result.is_err() {
                assert_eq!(after.pending_balance, before.pending_balance);
                assert_eq!(after.available_balance, before.available_balance);
            }
        }
    }
}
