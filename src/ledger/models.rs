use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Currencies without a minor unit (ISO 4217 exponent 0)
const ZERO_DECIMAL_CURRENCIES: [&str; 8] = ["JPY", "KRW", "UGX", "RWF", "XAF", "XOF", "VND", "CLP"];

/// Balance entity (per merchant, per currency), amounts in minor units
///
/// INVARIANT: pending_balance >= 0, available_balance >= 0,
/// total_volume never decreases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct MerchantBalance {
    pub merchant_id: Uuid,
    pub currency: String,
    pub pending_balance: i64,
    pub available_balance: i64,
    pub total_volume: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MerchantBalance {
    pub fn zeroed(merchant_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            merchant_id,
            currency: currency.to_string(),
            pending_balance: 0,
            available_balance: 0,
            total_volume: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_pending(&self, required: i64) -> bool {
        self.pending_balance >= required
    }

    pub fn has_available(&self, required: i64) -> bool {
        self.available_balance >= required
    }

    pub fn summary(&self) -> BalanceSummary {
        let scale = minor_unit_exponent(&self.currency);
        BalanceSummary {
            merchant_id: self.merchant_id,
            currency: self.currency.clone(),
            pending_balance: Decimal::new(self.pending_balance, scale),
            available_balance: Decimal::new(self.available_balance, scale),
            total_volume: Decimal::new(self.total_volume, scale),
        }
    }
}

/// Merchant-facing balance view in major currency units (e.g. NGN, not kobo).
/// Amounts serialize as JSON numbers (`serde-float`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSummary {
    pub merchant_id: Uuid,
    pub currency: String,
    pub pending_balance: Decimal,
    pub available_balance: Decimal,
    pub total_volume: Decimal,
}

pub fn minor_unit_exponent(currency: &str) -> u32 {
    if ZERO_DECIMAL_CURRENCIES.contains(&currency) {
        0
    } else {
        2
    }
}

/// Trim and upper-case a currency code; empty or non-alphabetic codes are rejected
pub fn normalize_currency(currency: &str) -> AppResult<String> {
    let code = currency.trim().to_ascii_uppercase();
    if code.is_empty() || code.len() > 8 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::InvalidInput(format!(
            "Invalid currency code: {:?}",
            currency
        )));
    }
    Ok(code)
}
