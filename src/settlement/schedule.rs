// Calendar arithmetic for settlement policies.
//
// Everything here is a pure function of the config and the instant passed in;
// nothing reads the system clock.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use tracing::warn;

use super::models::{ScheduleType, SettlementConfig};
use crate::error::{AppError, AppResult};

/// Days scanned forward when looking for an allowed weekday
const WEEK_SCAN_DAYS: u64 = 7;

/// Whether an automatic run should fire on `today`
pub fn should_settle_today(config: &SettlementConfig, today: NaiveDate) -> bool {
    is_due_on(config, today.weekday())
}

/// Due-ness for a weekday: auto_settle AND (daily OR weekly-on-this-day)
pub fn is_due_on(config: &SettlementConfig, weekday: Weekday) -> bool {
    if !config.auto_settle {
        return false;
    }

    match config.schedule_type {
        ScheduleType::Manual => false,
        ScheduleType::Daily => true,
        ScheduleType::Weekly => config.settles_on(weekday),
    }
}

/// Settlement time of day. A malformed stored value falls back to 09:00:00
/// unless `strict` is set, in which case it is an `InvalidConfig` error.
pub fn resolve_settlement_time(config: &SettlementConfig, strict: bool) -> AppResult<NaiveTime> {
    if let Some(time) = config.parsed_settlement_time() {
        return Ok(time);
    }

    if strict {
        return Err(AppError::InvalidConfig(format!(
            "merchant {} has malformed settlement_time {:?}",
            config.merchant_id, config.settlement_time
        )));
    }

    warn!(
        merchant_id = %config.merchant_id,
        settlement_time = %config.settlement_time,
        "Malformed settlement_time, falling back to 09:00:00"
    );
    Ok(default_settlement_time())
}

fn default_settlement_time() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()
}

/// Next instant at which this policy's run fires, at or after `now`
pub fn next_settlement_time(
    config: &SettlementConfig,
    now: DateTime<Utc>,
    settlement_time: NaiveTime,
) -> AppResult<DateTime<Utc>> {
    let mut date = now.date_naive();

    // Already passed today: start from tomorrow
    if date.and_time(settlement_time) < now.naive_utc() {
        date = add_days(config, date, 1)?;
    }

    if config.schedule_type == ScheduleType::Weekly {
        date = first_settlement_day_from(config, date)?;
    }

    Ok(Utc.from_utc_datetime(&date.and_time(settlement_time)))
}

/// Date on which funds from a transaction on `transaction_date` become
/// eligible: T+N, then for auto-settling weekly policies rolled forward to
/// the first allowed weekday.
pub fn calculate_settlement_date(
    config: &SettlementConfig,
    transaction_date: NaiveDate,
) -> AppResult<NaiveDate> {
    let delay = u64::try_from(config.settlement_delay_days).map_err(|_| {
        AppError::InvalidConfig(format!(
            "merchant {} has negative settlement_delay_days {}",
            config.merchant_id, config.settlement_delay_days
        ))
    })?;
    let delayed = add_days(config, transaction_date, delay)?;

    if !config.auto_settle || config.schedule_type != ScheduleType::Weekly {
        return Ok(delayed);
    }

    first_settlement_day_from(config, delayed)
}

/// Earliest date >= `start` whose weekday is in settlement_days
fn first_settlement_day_from(config: &SettlementConfig, start: NaiveDate) -> AppResult<NaiveDate> {
    if config.settlement_days.is_empty() {
        return Err(AppError::InvalidConfig(format!(
            "merchant {} has a weekly schedule without settlement days",
            config.merchant_id
        )));
    }

    let mut date = start;
    for _ in 0..WEEK_SCAN_DAYS {
        if config.settles_on(date.weekday()) {
            return Ok(date);
        }
        date = add_days(config, date, 1)?;
    }

    // Only reachable when every listed day is outside 1..=7
    Err(AppError::InvalidConfig(format!(
        "merchant {} has no valid weekday in settlement_days {:?}",
        config.merchant_id, config.settlement_days
    )))
}

fn add_days(config: &SettlementConfig, date: NaiveDate, days: u64) -> AppResult<NaiveDate> {
    date.checked_add_days(Days::new(days)).ok_or_else(|| {
        AppError::InvalidConfig(format!(
            "settlement date out of range for merchant {}",
            config.merchant_id
        ))
    })
}
