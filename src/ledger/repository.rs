use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::MerchantBalance;
use crate::error::{AppError, AppResult};

/// Storage seam for balance rows.
///
/// Every mutating call is a single atomic step against one
/// (merchant, currency) row. `settle` and `payout` must check and mutate
/// together; implementations never read first and write later.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn get(&self, merchant_id: Uuid, currency: &str) -> AppResult<Option<MerchantBalance>>;

    async fn get_or_create(&self, merchant_id: Uuid, currency: &str) -> AppResult<MerchantBalance>;

    /// pending += amount, total_volume += amount (row created if absent)
    async fn add_pending(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance>;

    /// pending -= amount, available += amount iff pending >= amount
    async fn settle_pending(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance>;

    /// available -= amount iff available >= amount
    async fn deduct_available(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance>;
}

const BALANCE_COLUMNS: &str = "merchant_id, currency, pending_balance, available_balance, \
     total_volume, created_at, updated_at";

/// Postgres-backed balance store - the source of truth in production
pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn get(&self, merchant_id: Uuid, currency: &str) -> AppResult<Option<MerchantBalance>> {
        let balance = sqlx::query_as::<_, MerchantBalance>(&format!(
            r#"
            SELECT {BALANCE_COLUMNS}
            FROM merchant_balances
            WHERE merchant_id = $1 AND currency = $2
            "#
        ))
        .bind(merchant_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn get_or_create(&self, merchant_id: Uuid, currency: &str) -> AppResult<MerchantBalance> {
        // No-op update on conflict so the existing row is RETURNED even when a
        // concurrent caller inserted it first.
        let balance = sqlx::query_as::<_, MerchantBalance>(&format!(
            r#"
            INSERT INTO merchant_balances (merchant_id, currency, pending_balance, available_balance, total_volume)
            VALUES ($1, $2, 0, 0, 0)
            ON CONFLICT (merchant_id, currency)
            DO UPDATE SET currency = EXCLUDED.currency
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(merchant_id)
        .bind(currency)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn add_pending(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        let balance = sqlx::query_as::<_, MerchantBalance>(&format!(
            r#"
            INSERT INTO merchant_balances (merchant_id, currency, pending_balance, available_balance, total_volume)
            VALUES ($1, $2, $3, 0, $3)
            ON CONFLICT (merchant_id, currency)
            DO UPDATE SET
                pending_balance = merchant_balances.pending_balance + $3,
                total_volume = merchant_balances.total_volume + $3,
                updated_at = NOW()
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(merchant_id)
        .bind(currency)
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| overflow_or_database(e, merchant_id, currency))?;

        Ok(balance)
    }

    async fn settle_pending(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        let balance = sqlx::query_as::<_, MerchantBalance>(&format!(
            r#"
            UPDATE merchant_balances
            SET pending_balance = pending_balance - $3,
                available_balance = available_balance + $3,
                updated_at = NOW()
            WHERE merchant_id = $1 AND currency = $2 AND pending_balance >= $3
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(merchant_id)
        .bind(currency)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| overflow_or_database(e, merchant_id, currency))?;

        balance.ok_or_else(|| AppError::InsufficientPendingFunds {
            merchant_id,
            currency: currency.to_string(),
            requested: amount,
        })
    }

    async fn deduct_available(
        &self,
        merchant_id: Uuid,
        currency: &str,
        amount: i64,
    ) -> AppResult<MerchantBalance> {
        let balance = sqlx::query_as::<_, MerchantBalance>(&format!(
            r#"
            UPDATE merchant_balances
            SET available_balance = available_balance - $3,
                updated_at = NOW()
            WHERE merchant_id = $1 AND currency = $2 AND available_balance >= $3
            RETURNING {BALANCE_COLUMNS}
            "#
        ))
        .bind(merchant_id)
        .bind(currency)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        balance.ok_or_else(|| AppError::InsufficientAvailableFunds {
            merchant_id,
            currency: currency.to_string(),
            requested: amount,
        })
    }
}

/// BIGINT overflow on a credit (SQLSTATE 22003 numeric_value_out_of_range)
fn overflow_or_database(error: sqlx::Error, merchant_id: Uuid, currency: &str) -> AppError {
    let overflow = matches!(
        &error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22003")
    );
    if overflow {
        AppError::BalanceOverflow {
            merchant_id,
            currency: currency.to_string(),
        }
    } else {
        AppError::from(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct PgStateError(&'static str);

    impl fmt::Display for PgStateError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "SQLSTATE {}", self.0)
        }
    }

    impl StdError for PgStateError {}

    impl sqlx::error::DatabaseError for PgStateError {
        fn message(&self) -> &str {
            "database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgStateError(code)))
    }

    #[test]
    fn test_out_of_range_maps_to_overflow() {
        let merchant_id = Uuid::new_v4();
        let err = overflow_or_database(db_error("22003"), merchant_id, "NGN");
        match &err {
            AppError::BalanceOverflow {
                merchant_id: m,
                currency,
            } => {
                assert_eq!(*m, merchant_id);
                assert_eq!(currency, "NGN");
            }
            other => panic!("expected overflow, got {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_other_database_errors_pass_through() {
        let merchant_id = Uuid::new_v4();

        let err = overflow_or_database(db_error("40001"), merchant_id, "NGN");
        assert!(matches!(err, AppError::Database(_)));
        assert!(err.is_retryable());

        let err = overflow_or_database(sqlx::Error::RowNotFound, merchant_id, "NGN");
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
