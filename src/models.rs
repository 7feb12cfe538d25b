use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub paid_at: Option<NaiveDate>,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyBucket {
    pub week_start: NaiveDate,
    pub revenue: f64,
    pub transaction_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub revenue: i64,
    pub patients: i64,
}
