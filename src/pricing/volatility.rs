// =============================================================================
// Volatility forecasting — GARCH(1,1), EGARCH(1,1) and surface analytics
// =============================================================================
//
// Both conditional-variance models work on demeaned daily log returns and use
// variance targeting: the intercept is chosen so the long-run variance equals
// the sample variance of the series.  A perfectly flat series therefore
// forecasts zero variance instead of drifting towards an arbitrary constant.
//
//   GARCH:   s2_t = w + a * e2_{t-1} + b * s2_{t-1}
//   EGARCH:  ln s2_t = w + b * ln s2_{t-1} + a * (|z| - E|z|) + g * z
//
// With g < 0 a negative shock lifts EGARCH variance more than a positive one.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::PricingError;
use crate::types::{SurfacePoint, VolRegime};

pub const MIN_OBSERVATIONS: usize = 30;
pub const TRADING_DAYS: f64 = 252.0;

/// E|z| for a standard normal.
const EXPECTED_ABS_Z: f64 = 0.797_884_560_802_865_4;

const VARIANCE_FLOOR: f64 = 1e-16;

// =============================================================================
// GARCH(1,1)
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GarchParams {
    pub alpha: f64,
    pub beta: f64,
    /// Fixed intercept.  `None` means variance targeting.
    pub omega: Option<f64>,
    /// Steps in the forecast path.
    pub horizon: usize,
}

impl Default for GarchParams {
    fn default() -> Self {
        Self {
            alpha: 0.10,
            beta: 0.85,
            omega: None,
            horizon: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceForecast {
    /// One-step-ahead daily variance.
    pub next_variance: f64,
    pub long_run_variance: f64,
    /// Daily variance for steps 1..=horizon.
    pub path: Vec<f64>,
}

impl VarianceForecast {
    pub fn annualized_vol(&self) -> f64 {
        (self.next_variance * TRADING_DAYS).sqrt()
    }
}

fn check_len(returns: &[f64]) -> Result<(), PricingError> {
    if returns.len() < MIN_OBSERVATIONS {
        return Err(PricingError::InsufficientData {
            required: MIN_OBSERVATIONS,
            actual: returns.len(),
        });
    }
    if returns.iter().any(|r| !r.is_finite()) {
        return Err(PricingError::InvalidInput("non-finite return".into()));
    }
    Ok(())
}

fn demeaned(returns: &[f64]) -> (Vec<f64>, f64) {
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let resid: Vec<f64> = returns.iter().map(|r| r - mean).collect();
    let var = resid.iter().map(|e| e * e).sum::<f64>() / n;
    (resid, var)
}

/// One-step-ahead GARCH(1,1) variance from a return series.
pub fn garch_forecast(returns: &[f64], params: &GarchParams) -> Result<VarianceForecast, PricingError> {
    check_len(returns)?;
    let persistence = params.alpha + params.beta;
    if params.alpha < 0.0 || params.beta < 0.0 || persistence >= 1.0 {
        return Err(PricingError::InvalidInput(format!(
            "GARCH parameters not stationary (alpha={}, beta={})",
            params.alpha, params.beta
        )));
    }

    let (resid, sample_var) = demeaned(returns);
    let omega = params.omega.unwrap_or((1.0 - persistence) * sample_var);

    let mut variance = sample_var;
    for e in &resid {
        variance = omega + params.alpha * e * e + params.beta * variance;
    }

    let long_run = omega / (1.0 - persistence);
    let path = (0..params.horizon.max(1))
        .map(|h| long_run + persistence.powi(h as i32) * (variance - long_run))
        .collect();

    Ok(VarianceForecast {
        next_variance: variance,
        long_run_variance: long_run,
        path,
    })
}

// =============================================================================
// EGARCH(1,1)
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EgarchParams {
    pub alpha: f64,
    pub gamma: f64,
    pub beta: f64,
}

impl Default for EgarchParams {
    fn default() -> Self {
        Self {
            alpha: 0.10,
            gamma: -0.05,
            beta: 0.95,
        }
    }
}

/// Single EGARCH log-variance update for a standardised shock `z`.
pub fn egarch_step(omega: f64, prev_log_var: f64, z: f64, p: &EgarchParams) -> f64 {
    omega + p.beta * prev_log_var + p.alpha * (z.abs() - EXPECTED_ABS_Z) + p.gamma * z
}

/// One-step-ahead EGARCH(1,1) variance.
pub fn egarch_forecast(returns: &[f64], params: &EgarchParams) -> Result<VarianceForecast, PricingError> {
    check_len(returns)?;
    if params.beta.abs() >= 1.0 {
        return Err(PricingError::InvalidInput(format!(
            "EGARCH beta must be inside (-1, 1), got {}",
            params.beta
        )));
    }

    let (resid, sample_var) = demeaned(returns);
    if sample_var < VARIANCE_FLOOR {
        return Ok(VarianceForecast {
            next_variance: 0.0,
            long_run_variance: 0.0,
            path: vec![0.0],
        });
    }

    let long_run_log = sample_var.ln();
    let omega = (1.0 - params.beta) * long_run_log;

    let mut log_var = long_run_log;
    for e in &resid {
        let z = e / log_var.exp().sqrt();
        log_var = egarch_step(omega, log_var, z, params);
    }

    let next = log_var.exp();
    Ok(VarianceForecast {
        next_variance: next,
        long_run_variance: sample_var,
        path: vec![next],
    })
}

// =============================================================================
// Realised-vol and surface analytics
// =============================================================================

/// Annualised standard deviation of the last `window` returns.
pub fn realized_vol(returns: &[f64], window: usize) -> Option<f64> {
    if window < 2 || returns.len() < window {
        return None;
    }
    let tail = &returns[returns.len() - window..];
    let mean = tail.iter().sum::<f64>() / window as f64;
    let var = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
    Some((var * TRADING_DAYS).sqrt())
}

/// Expected move as a fraction of spot over `days` calendar days.
pub fn expected_move_pct(implied_vol: f64, days: f64) -> f64 {
    implied_vol * (days.max(0.0) / 365.0).sqrt()
}

/// Classify an annualised vol into one of the four bands.
pub fn classify_regime(annual_vol: f64, bands: &[f64; 3]) -> VolRegime {
    if annual_vol < bands[0] {
        VolRegime::Low
    } else if annual_vol < bands[1] {
        VolRegime::Normal
    } else if annual_vol < bands[2] {
        VolRegime::Elevated
    } else {
        VolRegime::Extreme
    }
}

/// Summary statistics read off an implied-vol surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceStats {
    /// ATM vol interpolated at ~30 days.
    pub iv30: Option<f64>,
    /// ATM vol interpolated at ~90 days.
    pub iv90: Option<f64>,
    /// IV90 - IV30; positive means contango.
    pub term_slope: Option<f64>,
    /// OTM put vol minus OTM call vol (~10% wings) at the front expiry.
    pub skew: Option<f64>,
}

impl SurfaceStats {
    pub fn from_surface(surface: &[SurfacePoint], spot: f64, today: NaiveDate) -> Self {
        let mut expiries: Vec<NaiveDate> = surface.iter().map(|p| p.expiration).collect();
        expiries.sort();
        expiries.dedup();

        let atm: Vec<(f64, f64)> = expiries
            .iter()
            .filter_map(|&exp| {
                let days = (exp - today).num_days() as f64;
                if days <= 0.0 {
                    return None;
                }
                nearest_strike(surface, exp, spot).map(|p| (days, p.implied_vol))
            })
            .collect();

        let iv30 = interpolate(&atm, 30.0);
        let iv90 = interpolate(&atm, 90.0);
        let term_slope = match (iv30, iv90) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };

        let skew = expiries
            .iter()
            .find(|&&e| (e - today).num_days() > 0)
            .and_then(|&front| {
                let put = nearest_strike(surface, front, spot * 0.9)?;
                let call = nearest_strike(surface, front, spot * 1.1)?;
                Some(put.implied_vol - call.implied_vol)
            });

        Self {
            iv30,
            iv90,
            term_slope,
            skew,
        }
    }
}

fn nearest_strike(surface: &[SurfacePoint], expiration: NaiveDate, target: f64) -> Option<&SurfacePoint> {
    surface
        .iter()
        .filter(|p| p.expiration == expiration)
        .min_by(|a, b| (a.strike - target).abs().total_cmp(&(b.strike - target).abs()))
}

/// Linear interpolation in days, flat beyond the ends.
fn interpolate(points: &[(f64, f64)], days: f64) -> Option<f64> {
    let first = points.first()?;
    let last = points.last()?;
    if days <= first.0 {
        return Some(first.1);
    }
    if days >= last.0 {
        return Some(last.1);
    }
    points.windows(2).find_map(|w| {
        let (d0, v0) = w[0];
        let (d1, v1) = w[1];
        (days >= d0 && days <= d1).then(|| v0 + (v1 - v0) * (days - d0) / (d1 - d0))
    })
}
