//! Black-Scholes-Merton valuation with continuous dividend yield.
//!
//! Greeks conventions:
//! - theta per calendar day
//! - vega and rho per 1 percentage point
//!
//! Inside one minute of expiry the closed form is not evaluated; the option is
//! worth its intrinsic value and carries no time decay.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::f64::consts::{PI, SQRT_2};

use crate::errors::PricingError;
use crate::types::OptionRight;

/// Below this year-fraction the option is treated as expired.
pub const EXPIRY_EPSILON: f64 = 1.0 / (365.0 * 24.0 * 60.0);

const IV_LOWER: f64 = 0.001;
const IV_UPPER: f64 = 5.0;

/// Standard normal PDF.
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Standard normal CDF.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionInputs {
    pub spot: f64,
    pub strike: f64,
    /// Years to expiration.
    pub time_to_expiry: f64,
    pub risk_free_rate: f64,
    /// Annualised volatility.
    pub volatility: f64,
    pub dividend_yield: f64,
    pub right: OptionRight,
}

impl OptionInputs {
    pub fn new(
        spot: f64,
        strike: f64,
        time_to_expiry: f64,
        risk_free_rate: f64,
        volatility: f64,
        right: OptionRight,
    ) -> Self {
        Self {
            spot,
            strike,
            time_to_expiry,
            risk_free_rate,
            volatility,
            dividend_yield: 0.0,
            right,
        }
    }

    pub fn with_dividend(mut self, q: f64) -> Self {
        self.dividend_yield = q;
        self
    }

    pub fn with_volatility(mut self, vol: f64) -> Self {
        self.volatility = vol;
        self
    }

    pub fn intrinsic(&self) -> f64 {
        match self.right {
            OptionRight::Call => (self.spot - self.strike).max(0.0),
            OptionRight::Put => (self.strike - self.spot).max(0.0),
        }
    }

    fn validate(&self) -> Result<(), PricingError> {
        let finite = [
            self.spot,
            self.strike,
            self.time_to_expiry,
            self.risk_free_rate,
            self.volatility,
            self.dividend_yield,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(PricingError::InvalidInput("non-finite input".into()));
        }
        if self.spot <= 0.0 || self.strike <= 0.0 {
            return Err(PricingError::InvalidInput(format!(
                "spot and strike must be positive (spot={}, strike={})",
                self.spot, self.strike
            )));
        }
        if self.time_to_expiry < 0.0 {
            return Err(PricingError::InvalidInput("negative time to expiry".into()));
        }
        if self.volatility <= 0.0 && self.time_to_expiry >= EXPIRY_EPSILON {
            return Err(PricingError::InvalidInput(format!(
                "volatility must be positive, got {}",
                self.volatility
            )));
        }
        Ok(())
    }
}

/// Theoretical price plus the five primary Greeks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionValuation {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

/// Price and Greeks for one option.
pub fn price(inputs: &OptionInputs) -> Result<OptionValuation, PricingError> {
    inputs.validate()?;

    if inputs.time_to_expiry < EXPIRY_EPSILON {
        let itm = inputs.intrinsic() > 0.0;
        let delta = match (inputs.right, itm) {
            (OptionRight::Call, true) => 1.0,
            (OptionRight::Put, true) => -1.0,
            _ => 0.0,
        };
        return Ok(OptionValuation {
            price: inputs.intrinsic(),
            delta,
            ..Default::default()
        });
    }

    let OptionInputs {
        spot: s,
        strike: k,
        time_to_expiry: t,
        risk_free_rate: r,
        volatility: sigma,
        dividend_yield: q,
        right,
    } = *inputs;

    let sqrt_t = t.sqrt();
    let d1 = ((s / k).ln() + (r - q + 0.5 * sigma * sigma) * t) / (sigma * sqrt_t);
    let d2 = d1 - sigma * sqrt_t;
    let df_r = (-r * t).exp();
    let df_q = (-q * t).exp();
    let pdf_d1 = norm_pdf(d1);

    let gamma = df_q * pdf_d1 / (s * sigma * sqrt_t);
    let vega = s * df_q * pdf_d1 * sqrt_t / 100.0;
    let decay = -s * df_q * pdf_d1 * sigma / (2.0 * sqrt_t);

    let v = match right {
        OptionRight::Call => {
            let nd1 = norm_cdf(d1);
            let nd2 = norm_cdf(d2);
            OptionValuation {
                price: s * df_q * nd1 - k * df_r * nd2,
                delta: df_q * nd1,
                gamma,
                theta: (decay - r * k * df_r * nd2 + q * s * df_q * nd1) / 365.0,
                vega,
                rho: k * t * df_r * nd2 / 100.0,
            }
        }
        OptionRight::Put => {
            let nmd1 = norm_cdf(-d1);
            let nmd2 = norm_cdf(-d2);
            OptionValuation {
                price: k * df_r * nmd2 - s * df_q * nmd1,
                delta: -df_q * nmd1,
                gamma,
                theta: (decay + r * k * df_r * nmd2 - q * s * df_q * nmd1) / 365.0,
                vega,
                rho: -k * t * df_r * nmd2 / 100.0,
            }
        }
    };
    Ok(v)
}

/// Solve for the volatility that reproduces `market_price`.
///
/// Newton steps from 30% vol, falling back to bisection on [0.1%, 500%]
/// whenever a step leaves the bracket.
pub fn implied_volatility(
    market_price: f64,
    inputs: &OptionInputs,
) -> Result<f64, PricingError> {
    if inputs.time_to_expiry < EXPIRY_EPSILON {
        return Err(PricingError::InvalidInput("option has expired".into()));
    }
    let lo_price = price(&inputs.with_volatility(IV_LOWER))?.price;
    let hi_price = price(&inputs.with_volatility(IV_UPPER))?.price;
    if !(lo_price..=hi_price).contains(&market_price) {
        return Err(PricingError::FitDidNotConverge {
            iterations: 0,
            residual: if market_price < lo_price {
                lo_price - market_price
            } else {
                market_price - hi_price
            },
        });
    }

    let (mut lo, mut hi) = (IV_LOWER, IV_UPPER);
    let mut sigma = 0.3;
    let mut diff = f64::INFINITY;
    for i in 0..100 {
        let v = price(&inputs.with_volatility(sigma))?;
        diff = v.price - market_price;
        if diff.abs() < 1e-8 {
            return Ok(sigma);
        }
        if diff > 0.0 {
            hi = sigma;
        } else {
            lo = sigma;
        }
        let vega_raw = v.vega * 100.0;
        let newton = if vega_raw > 1e-12 { sigma - diff / vega_raw } else { f64::NAN };
        sigma = if newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if hi - lo < 1e-12 {
            tracing::trace!(iterations = i, "implied vol bracket collapsed");
            return Ok(sigma);
        }
    }
    Err(PricingError::FitDidNotConverge {
        iterations: 100,
        residual: diff.abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(s: f64, k: f64, t: f64, r: f64, v: f64) -> OptionInputs {
        OptionInputs::new(s, k, t, r, v, OptionRight::Call)
    }

    #[test]
    fn textbook_call_value() {
        // Hull: S=42, K=40, r=10%, sigma=20%, T=0.5 -> c = 4.76
        let v = price(&call(42.0, 40.0, 0.5, 0.10, 0.20)).unwrap();
        assert!((v.price - 4.759).abs() < 1e-3, "got {}", v.price);
        assert!(v.delta > 0.0 && v.delta < 1.0);
        assert!(v.theta < 0.0);
    }

    #[test]
    fn put_call_parity_across_grid() {
        for &s in &[50.0, 100.0, 180.0] {
            for &k in &[60.0, 100.0, 150.0] {
                for &t in &[0.01, 0.25, 2.0] {
                    for &r in &[0.0, 0.03, 0.08] {
                        for &vol in &[0.05, 0.3, 1.2] {
                            let c = price(&call(s, k, t, r, vol)).unwrap().price;
                            let p = price(&OptionInputs::new(s, k, t, r, vol, OptionRight::Put))
                                .unwrap()
                                .price;
                            let parity = s - k * (-r * t).exp();
                            assert!(
                                (c - p - parity).abs() < 1e-8,
                                "parity broken s={s} k={k} t={t} r={r} vol={vol}: {}",
                                c - p - parity
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn at_expiry_returns_intrinsic_with_zero_theta() {
        for &(s, k) in &[(110.0, 100.0), (90.0, 100.0), (100.0, 100.0)] {
            for right in [OptionRight::Call, OptionRight::Put] {
                let inputs = OptionInputs::new(s, k, 0.0, 0.05, 0.4, right);
                let v = price(&inputs).unwrap();
                assert_eq!(v.price, inputs.intrinsic());
                assert_eq!(v.theta, 0.0);
                assert_eq!(v.gamma, 0.0);
                assert_eq!(v.vega, 0.0);
            }
        }
    }

    #[test]
    fn price_converges_to_intrinsic_as_expiry_approaches() {
        let mut last_gap = f64::INFINITY;
        for &t in &[0.1, 0.01, 0.001, 1e-4] {
            let inputs = call(105.0, 100.0, t, 0.05, 0.3);
            let gap = (price(&inputs).unwrap().price - inputs.intrinsic()).abs();
            assert!(gap <= last_gap + 1e-12);
            last_gap = gap;
        }
        assert!(last_gap < 0.01);

        let far_otm = call(80.0, 100.0, 1e-4, 0.05, 0.3);
        assert!(price(&far_otm).unwrap().theta.abs() < 1e-9);
    }

    #[test]
    fn vega_and_rho_are_per_point() {
        let base = call(100.0, 100.0, 1.0, 0.05, 0.2);
        let v = price(&base).unwrap();
        let bumped = price(&base.with_volatility(0.21)).unwrap().price;
        assert!((bumped - v.price - v.vega).abs() < 0.01);
    }

    #[test]
    fn rejects_non_positive_spot() {
        assert!(matches!(
            price(&call(0.0, 100.0, 1.0, 0.05, 0.2)),
            Err(PricingError::InvalidInput(_))
        ));
    }

    #[test]
    fn implied_vol_recovers_input_sigma() {
        let inputs = OptionInputs::new(100.0, 110.0, 0.5, 0.03, 0.35, OptionRight::Put)
            .with_dividend(0.01);
        let p = price(&inputs).unwrap().price;
        let iv = implied_volatility(p, &inputs.with_volatility(0.9)).unwrap();
        assert!((iv - 0.35).abs() < 1e-6, "iv {iv}");
    }

    #[test]
    fn implied_vol_rejects_price_below_bound() {
        let inputs = call(100.0, 50.0, 0.5, 0.0, 0.3);
        assert!(matches!(
            implied_volatility(1.0, &inputs),
            Err(PricingError::FitDidNotConverge { .. })
        ));
    }
}
