// =============================================================================
// Pricing Engine — valuation, Greeks and volatility forecasting
// =============================================================================
//
// Pure functions only.  Everything here is safe to call from any number of
// analyst tasks at once; no module holds shared mutable state.
//
// `VolContext` strings the models together for one candidate and degrades
// gracefully: GARCH forecast -> Heston fitted spot vol -> ATM implied vol.
// =============================================================================

pub mod black_scholes;
pub mod heston;
pub mod volatility;

pub use black_scholes::{implied_volatility, price, OptionInputs};
pub use volatility::{classify_regime, egarch_forecast, garch_forecast, EgarchParams, GarchParams};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{Candidate, VolRegime};
use heston::{FitOptions, FitPoint, HestonFit};
use volatility::SurfaceStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastSource {
    Garch,
    Heston,
    ImpliedAtm,
}

/// Volatility picture of one candidate, computed once per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolContext {
    /// Annualised forecast vol used for regime classification.
    pub forecast_vol: f64,
    pub source: ForecastSource,
    pub regime: VolRegime,
    pub garch_vol: Option<f64>,
    pub egarch_vol: Option<f64>,
    pub heston: Option<HestonFit>,
    pub realized_vol_20d: Option<f64>,
    pub surface: SurfaceStats,
}

impl VolContext {
    /// Returns `None` only when no model and no quoted vol is available.
    /// A fired `cancel` skips the rest of the Heston calibration.
    pub fn build(candidate: &Candidate, today: NaiveDate, bands: &[f64; 3], cancel: &CancellationToken) -> Option<Self> {
        let returns = candidate.log_returns();

        let garch_vol = match garch_forecast(&returns, &GarchParams::default()) {
            Ok(f) => Some(f.annualized_vol()),
            Err(e) => {
                debug!(symbol = %candidate.symbol, error = %e, "GARCH unavailable");
                None
            }
        };
        let egarch_vol = egarch_forecast(&returns, &EgarchParams::default())
            .ok()
            .map(|f| f.annualized_vol());

        let points = FitPoint::from_surface(&candidate.surface, candidate.last_price, today);
        let heston = match heston::fit(&points, &FitOptions::default(), cancel) {
            Ok(fit) => {
                debug!(
                    symbol = %candidate.symbol,
                    spot_vol = fit.params.v0.sqrt(),
                    long_run_vol = fit.params.long_run_vol(),
                    "Heston fit"
                );
                Some(fit)
            }
            Err(e) => {
                debug!(symbol = %candidate.symbol, error = %e, "Heston fit skipped");
                None
            }
        };

        let (forecast_vol, source) = if let Some(v) = garch_vol {
            (v, ForecastSource::Garch)
        } else if let Some(h) = &heston {
            (h.params.v0.sqrt(), ForecastSource::Heston)
        } else {
            (candidate.atm_implied_vol()?, ForecastSource::ImpliedAtm)
        };

        Some(Self {
            forecast_vol,
            source,
            regime: classify_regime(forecast_vol, bands),
            garch_vol,
            egarch_vol,
            heston,
            realized_vol_20d: volatility::realized_vol(&returns, 20),
            surface: SurfaceStats::from_surface(&candidate.surface, candidate.last_price, today),
        })
    }

    /// Implied minus realised; positive means options are rich.
    pub fn variance_risk_premium(&self) -> Option<f64> {
        Some(self.surface.iv30? - self.realized_vol_20d?)
    }
}
