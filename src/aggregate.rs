use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{PaymentRow, WeeklyBucket};

pub const NO_DATA_CONTEXT: &str = "Transaction data is not available yet.";

const SUMMARY_WEEKS: usize = 5;

pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Reduces raw payment rows to a contiguous Monday-anchored weekly series.
/// Rows without a date or with a non-positive amount are dropped first.
/// Returns None when nothing survives the filter, which callers treat as
/// "no history yet" rather than an error.
pub fn aggregate_weekly(rows: &[PaymentRow]) -> Option<Vec<WeeklyBucket>> {
    let mut by_week: BTreeMap<NaiveDate, (f64, u32)> = BTreeMap::new();

    for row in rows {
        let Some(paid_at) = row.paid_at else {
            continue;
        };
        if row.amount <= 0.0 {
            continue;
        }
        let entry = by_week.entry(week_start(paid_at)).or_insert((0.0, 0));
        entry.0 += row.amount;
        entry.1 += 1;
    }

    let first = *by_week.keys().next()?;
    let last = *by_week.keys().next_back()?;

    let mut buckets = Vec::new();
    let mut week = first;
    while week <= last {
        let (revenue, transaction_count) = by_week.get(&week).copied().unwrap_or((0.0, 0));
        buckets.push(WeeklyBucket {
            week_start: week,
            revenue,
            transaction_count,
        });
        week = week + Duration::weeks(1);
    }

    Some(buckets)
}

/// Plain-text metrics block injected into the chat system prompt. Covers the
/// last five weeks of the series, or fewer when history is shorter.
pub fn recent_summary(buckets: &[WeeklyBucket]) -> String {
    if buckets.is_empty() {
        return NO_DATA_CONTEXT.to_string();
    }

    let recent = &buckets[buckets.len().saturating_sub(SUMMARY_WEEKS)..];
    let weeks = recent.len();
    let total_revenue: f64 = recent.iter().map(|b| b.revenue).sum();
    let total_patients: u32 = recent.iter().map(|b| b.transaction_count).sum();
    let avg_revenue = total_revenue / weeks as f64;
    let avg_patients = total_patients / weeks as u32;

    let mut summary = String::new();
    let _ = writeln!(summary, "Data for the last {weeks} weeks:");
    let _ = writeln!(summary, "- Total revenue: Rp {total_revenue:.0}");
    let _ = writeln!(summary, "- Average revenue per week: Rp {avg_revenue:.0}");
    let _ = writeln!(summary, "- Total transactions: {total_patients} patients");
    let _ = write!(summary, "- Average patients per week: {avg_patients} patients");
    summary
}
