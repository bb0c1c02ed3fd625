use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub const SETTLEMENT_TIME_FORMAT: &str = "%H:%M:%S";
pub const DEFAULT_SETTLEMENT_TIME: &str = "09:00:00";
pub const DEFAULT_SETTLEMENT_DAYS: [i32; 5] = [1, 2, 3, 4, 5];
pub const DEFAULT_DELAY_DAYS: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_schedule_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Daily,
    Weekly,
    Manual,
}

/// Per-merchant settlement policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SettlementConfig {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub schedule_type: ScheduleType,
    /// HH:MM:SS; picks the hour a daily/weekly run fires
    pub settlement_time: String,
    /// ISO weekday numbers, 1 = Monday .. 7 = Sunday (weekly only)
    pub settlement_days: Vec<i32>,
    /// Minor units; the driver skips sweeps below this
    pub minimum_amount: i64,
    pub auto_settle: bool,
    /// T+N
    pub settlement_delay_days: i32,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementConfig {
    /// Daily, 09:00:00, Mon-Fri, T+2, auto-settle on
    pub fn default_for(merchant_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            merchant_id,
            schedule_type: ScheduleType::Daily,
            settlement_time: DEFAULT_SETTLEMENT_TIME.to_string(),
            settlement_days: DEFAULT_SETTLEMENT_DAYS.to_vec(),
            minimum_amount: 0,
            auto_settle: true,
            settlement_delay_days: DEFAULT_DELAY_DAYS,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn settles_on(&self, weekday: Weekday) -> bool {
        self.settlement_days.contains(&weekday_number(weekday))
    }

    /// Parsed settlement time, or None when the stored value is malformed
    pub fn parsed_settlement_time(&self) -> Option<NaiveTime> {
        parse_settlement_time(&self.settlement_time)
    }

    /// Replace every mutable field with the (validated) update
    pub fn apply(&mut self, update: SettlementConfigUpdate) {
        self.schedule_type = update.schedule_type;
        self.settlement_time = update.settlement_time;
        self.settlement_days = normalize_days(&update.settlement_days);
        self.minimum_amount = update.minimum_amount;
        self.auto_settle = update.auto_settle;
        self.settlement_delay_days = update.settlement_delay_days;
        self.currency = update.currency;
        self.updated_at = Utc::now();
    }
}

/// Full replacement of a merchant's settlement policy
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_weekly_days"))]
pub struct SettlementConfigUpdate {
    pub schedule_type: ScheduleType,
    #[validate(custom = "validate_settlement_time")]
    pub settlement_time: String,
    #[validate(custom = "validate_weekday_numbers")]
    pub settlement_days: Vec<i32>,
    #[validate(range(min = 0, message = "minimum_amount must not be negative"))]
    pub minimum_amount: i64,
    pub auto_settle: bool,
    #[validate(range(min = 0, max = 30, message = "settlement_delay_days must be within 0..=30"))]
    pub settlement_delay_days: i32,
    #[validate(custom = "validate_currency_code")]
    pub currency: String,
}

impl SettlementConfigUpdate {
    /// Upper-case the currency before validation
    pub fn normalized(mut self) -> Self {
        self.currency = self.currency.trim().to_ascii_uppercase();
        self.settlement_time = self.settlement_time.trim().to_string();
        self
    }
}

/// 1 = Monday .. 7 = Sunday
pub fn weekday_number(weekday: Weekday) -> i32 {
    weekday.number_from_monday() as i32
}

pub fn parse_settlement_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, SETTLEMENT_TIME_FORMAT).ok()
}

fn normalize_days(days: &[i32]) -> Vec<i32> {
    let mut days = days.to_vec();
    days.sort_unstable();
    days.dedup();
    days
}

fn validate_settlement_time(value: &str) -> Result<(), ValidationError> {
    match parse_settlement_time(value) {
        Some(_) => Ok(()),
        None => {
            let mut error = ValidationError::new("settlement_time");
            error.message = Some("settlement_time must be HH:MM:SS".into());
            Err(error)
        }
    }
}

fn validate_weekday_numbers(days: &[i32]) -> Result<(), ValidationError> {
    if days.iter().all(|day| (1..=7).contains(day)) {
        return Ok(());
    }
    let mut error = ValidationError::new("settlement_days");
    error.message = Some("settlement_days must be within 1..=7".into());
    Err(error)
}

fn validate_currency_code(value: &str) -> Result<(), ValidationError> {
    if value.len() == 3 && value.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Ok(());
    }
    let mut error = ValidationError::new("currency");
    error.message = Some("currency must be a 3-letter code".into());
    Err(error)
}

fn validate_weekly_days(update: &SettlementConfigUpdate) -> Result<(), ValidationError> {
    if update.schedule_type == ScheduleType::Weekly && update.settlement_days.is_empty() {
        let mut error = ValidationError::new("settlement_days");
        error.message = Some("weekly schedules need at least one settlement day".into());
        return Err(error);
    }
    Ok(())
}
