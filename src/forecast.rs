use chrono::Duration;
use thiserror::Error;

use crate::models::{ForecastPoint, WeeklyBucket};

pub const MIN_WEEKS: usize = 5;
pub const HORIZON_WEEKS: usize = 4;

// Damping stays below 1 so a fitted trend decays over the horizon instead of
// extrapolating linearly forever.
const PHI_MIN: f64 = 0.80;
const PHI_MAX: f64 = 0.98;
const PHI_STEP: f64 = 0.02;
const GRID_STEPS: u32 = 19;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient history: {0} weeks, need at least {MIN_WEEKS}")]
    InsufficientData(usize),
    #[error("model fit failed: {0}")]
    FitFailed(String),
}

/// Projects revenue and patient counts over the given number of future weeks.
/// Revenue is fit with a damped additive trend, patient counts with an
/// undamped one; both models are refit from the full series on every call.
pub fn forecast(
    buckets: &[WeeklyBucket],
    horizon: usize,
) -> Result<Vec<ForecastPoint>, ForecastError> {
    if buckets.len() < MIN_WEEKS {
        return Err(ForecastError::InsufficientData(buckets.len()));
    }

    let revenue: Vec<f64> = buckets.iter().map(|b| b.revenue).collect();
    let visits: Vec<f64> = buckets.iter().map(|b| f64::from(b.transaction_count)).collect();

    let revenue_model = fit_trend(&revenue, true)?;
    let visit_model = fit_trend(&visits, false)?;

    let last_week = buckets[buckets.len() - 1].week_start;
    let points = (1..=horizon)
        .map(|step| ForecastPoint {
            date: last_week + Duration::weeks(step as i64),
            revenue: clip_to_count(revenue_model.predict(step)),
            patients: clip_to_count(visit_model.predict(step)),
        })
        .collect();

    Ok(points)
}

// A forecast cannot promise negative revenue or patients, so values are
// clipped at zero rather than reported as errors.
fn clip_to_count(value: f64) -> i64 {
    value.round().max(0.0) as i64
}

#[derive(Debug, Clone, Copy)]
struct TrendModel {
    level: f64,
    trend: f64,
    phi: f64,
}

impl TrendModel {
    fn predict(&self, steps_ahead: usize) -> f64 {
        let mut damped_steps = 0.0;
        let mut factor = 1.0;
        for _ in 0..steps_ahead {
            factor *= self.phi;
            damped_steps += factor;
        }
        self.level + self.trend * damped_steps
    }
}

/// Holt's additive-trend smoothing. Alpha, beta and (for the damped variant)
/// phi are chosen by minimizing one-step-ahead squared error over a dense
/// grid, mirroring an optimizer-based fit without persisted model state.
fn fit_trend(series: &[f64], damped: bool) -> Result<TrendModel, ForecastError> {
    if series.len() < 2 {
        return Err(ForecastError::FitFailed(
            "series too short to estimate a trend".to_string(),
        ));
    }
    if series.iter().any(|value| !value.is_finite()) {
        return Err(ForecastError::FitFailed(
            "non-finite value in series".to_string(),
        ));
    }

    let phis: Vec<f64> = if damped {
        let count = ((PHI_MAX - PHI_MIN) / PHI_STEP).round() as u32;
        (0..=count).map(|i| PHI_MIN + PHI_STEP * f64::from(i)).collect()
    } else {
        vec![1.0]
    };

    let mut best: Option<(f64, TrendModel)> = None;
    for &phi in &phis {
        for a in 1..=GRID_STEPS {
            let alpha = f64::from(a) / f64::from(GRID_STEPS + 1);
            for b in 1..=GRID_STEPS {
                let beta = f64::from(b) / f64::from(GRID_STEPS + 1);
                if let Some((sse, model)) = smooth(series, alpha, beta, phi) {
                    if best.as_ref().map_or(true, |(best_sse, _)| sse < *best_sse) {
                        best = Some((sse, model));
                    }
                }
            }
        }
    }

    best.map(|(_, model)| model).ok_or_else(|| {
        ForecastError::FitFailed("no parameter set produced a finite fit".to_string())
    })
}

fn smooth(series: &[f64], alpha: f64, beta: f64, phi: f64) -> Option<(f64, TrendModel)> {
    let mut level = series[0];
    let mut trend = series[1] - series[0];
    let mut sse = 0.0;

    for &observed in &series[1..] {
        let predicted = level + phi * trend;
        let error = observed - predicted;
        sse += error * error;

        let previous_level = level;
        level = alpha * observed + (1.0 - alpha) * predicted;
        trend = beta * (level - previous_level) + (1.0 - beta) * phi * trend;
    }

    if !(sse.is_finite() && level.is_finite() && trend.is_finite()) {
        return None;
    }
    Some((sse, TrendModel { level, trend, phi }))
}
