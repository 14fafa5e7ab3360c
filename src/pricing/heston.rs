// =============================================================================
// Heston-style implied-vol surface fit
// =============================================================================
//
// Fits (v0, kappa, theta, xi, rho) to observed (log-moneyness, T, IV) points
// using the short-maturity asymptotic smile of the Heston model:
//
//   atm_var(T) = theta + (v0 - theta) * (1 - e^{-kT}) / (kT)
//   skew(T)    = rho*xi / (4*s0) * g(k'T),  k' = k - rho*xi/2
//   curv(T)    = xi^2 * (2 - 3 rho^2) / (48 * s0^3) * g(k'T)
//   iv(k, T)   = s0 + skew*k + curv*k^2,  s0 = sqrt(atm_var)
//
// with g(x) = 2/x * (1 - (1 - e^{-x}) / x).  The objective is the sum of
// squared IV errors, minimised by Nelder-Mead over an unconstrained
// re-parameterisation (log for positive parameters, atanh for rho).
//
// Convergence: simplex objective spread <= abs_tol + rel_tol * |f_best| within
// `max_iterations`, AND final RMSE <= `max_rmse`.  Anything else is reported
// as `FitDidNotConverge`.  The cancel token is polled once per simplex step.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::PricingError;
use crate::types::SurfacePoint;

const MIN_POINTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HestonParams {
    pub v0: f64,
    pub kappa: f64,
    pub theta: f64,
    pub xi: f64,
    pub rho: f64,
}

impl HestonParams {
    fn to_unconstrained(self) -> [f64; 5] {
        [
            self.v0.ln(),
            self.kappa.ln(),
            self.theta.ln(),
            self.xi.ln(),
            self.rho.clamp(-0.999, 0.999).atanh(),
        ]
    }

    fn from_unconstrained(x: &[f64; 5]) -> Self {
        Self {
            v0: x[0].clamp(-20.0, 5.0).exp(),
            kappa: x[1].clamp(-10.0, 5.0).exp(),
            theta: x[2].clamp(-20.0, 5.0).exp(),
            xi: x[3].clamp(-10.0, 3.0).exp(),
            rho: x[4].tanh(),
        }
    }

    /// Model implied vol at log-moneyness `k` and maturity `t` (years).
    pub fn implied_vol(&self, k: f64, t: f64) -> f64 {
        let t = t.max(1e-6);
        let kt = self.kappa * t;
        let mean_rev = if kt > 1e-8 { (1.0 - (-kt).exp()) / kt } else { 1.0 };
        let atm_var = (self.theta + (self.v0 - self.theta) * mean_rev).max(1e-10);
        let s0 = atm_var.sqrt();

        let kp_t = (self.kappa - 0.5 * self.rho * self.xi) * t;
        let g = if kp_t.abs() > 1e-6 {
            2.0 / kp_t * (1.0 - (1.0 - (-kp_t).exp()) / kp_t)
        } else {
            1.0
        };

        let skew = self.rho * self.xi / (4.0 * s0) * g;
        let curv = self.xi * self.xi * (2.0 - 3.0 * self.rho * self.rho) / (48.0 * s0.powi(3)) * g;
        (s0 + skew * k + curv * k * k).max(1e-4)
    }

    pub fn long_run_vol(&self) -> f64 {
        self.theta.sqrt()
    }
}

/// One calibration target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitPoint {
    /// ln(K / S).
    pub log_moneyness: f64,
    /// Years.
    pub t: f64,
    pub iv: f64,
}

impl FitPoint {
    /// Convert listed surface points, skipping expired or non-positive ones.
    pub fn from_surface(surface: &[SurfacePoint], spot: f64, today: NaiveDate) -> Vec<FitPoint> {
        surface
            .iter()
            .filter_map(|p| {
                let days = (p.expiration - today).num_days();
                (days > 0 && p.strike > 0.0 && p.implied_vol > 0.0 && spot > 0.0).then(|| FitPoint {
                    log_moneyness: (p.strike / spot).ln(),
                    t: days as f64 / 365.0,
                    iv: p.implied_vol,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    pub max_iterations: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub max_rmse: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 5_000,
            abs_tol: 1e-12,
            rel_tol: 1e-8,
            max_rmse: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HestonFit {
    pub params: HestonParams,
    pub rmse: f64,
    pub iterations: usize,
}

/// Calibrate to `points`.  Deterministic: identical inputs give identical
/// fits.  Returns `Cancelled` as soon as `cancel` fires.
pub fn fit(points: &[FitPoint], opts: &FitOptions, cancel: &CancellationToken) -> Result<HestonFit, PricingError> {
    if points.len() < MIN_POINTS {
        return Err(PricingError::InsufficientData {
            required: MIN_POINTS,
            actual: points.len(),
        });
    }
    if points.iter().any(|p| !(p.iv.is_finite() && p.t.is_finite() && p.log_moneyness.is_finite())) {
        return Err(PricingError::InvalidInput("non-finite surface point".into()));
    }

    let objective = |x: &[f64; 5]| -> f64 {
        let params = HestonParams::from_unconstrained(x);
        points
            .iter()
            .map(|p| (params.implied_vol(p.log_moneyness, p.t) - p.iv).powi(2))
            .sum()
    };

    let atm = points
        .iter()
        .min_by(|a, b| {
            (a.log_moneyness.abs(), a.t)
                .partial_cmp(&(b.log_moneyness.abs(), b.t))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|p| p.iv)
        .unwrap_or(0.2);
    let start = HestonParams {
        v0: atm * atm,
        kappa: 2.0,
        theta: atm * atm,
        xi: 0.5,
        rho: -0.5,
    };

    // Restart from the incumbent until a fresh simplex stops improving; a
    // collapsed simplex can otherwise report convergence away from the minimum.
    let mut best = start.to_unconstrained();
    let mut f_best = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;
    for _ in 0..4 {
        let budget = FitOptions {
            max_iterations: opts.max_iterations.saturating_sub(iterations),
            ..*opts
        };
        let (x, fx, used, ok) = nelder_mead(&objective, best, &budget, cancel);
        iterations += used;
        if cancel.is_cancelled() {
            debug!(iterations, "heston fit cancelled");
            return Err(PricingError::Cancelled);
        }
        if !ok {
            break;
        }
        let improvement = f_best - fx;
        if fx <= f_best {
            best = x;
            f_best = fx;
        }
        converged = true;
        if improvement <= opts.abs_tol + opts.rel_tol * fx.abs() {
            break;
        }
    }
    let rmse = (f_best / points.len() as f64).sqrt();

    if !converged || !rmse.is_finite() || rmse > opts.max_rmse {
        debug!(iterations, rmse, converged, "heston fit rejected");
        return Err(PricingError::FitDidNotConverge {
            iterations,
            residual: rmse,
        });
    }

    Ok(HestonFit {
        params: HestonParams::from_unconstrained(&best),
        rmse,
        iterations,
    })
}

// ── Nelder-Mead ─────────────────────────────────────────────────────────────

fn nelder_mead<F>(f: &F, start: [f64; 5], opts: &FitOptions, cancel: &CancellationToken) -> ([f64; 5], f64, usize, bool)
where
    F: Fn(&[f64; 5]) -> f64,
{
    const N: usize = 5;
    let mut simplex: Vec<([f64; N], f64)> = Vec::with_capacity(N + 1);
    simplex.push((start, f(&start)));
    for i in 0..N {
        let mut x = start;
        x[i] += if x[i].abs() > 1e-3 { 0.1 * x[i].abs().max(0.5) } else { 0.25 };
        simplex.push((x, f(&x)));
    }

    let mut iterations = 0;
    while iterations < opts.max_iterations && !cancel.is_cancelled() {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let f_best = simplex[0].1;
        let f_worst = simplex[N].1;
        if f_worst - f_best <= opts.abs_tol + opts.rel_tol * f_best.abs() {
            return (simplex[0].0, f_best, iterations, true);
        }
        iterations += 1;

        let mut centroid = [0.0; N];
        for (x, _) in &simplex[..N] {
            for j in 0..N {
                centroid[j] += x[j] / N as f64;
            }
        }
        let along = |t: f64| -> [f64; N] {
            let mut p = [0.0; N];
            for j in 0..N {
                p[j] = centroid[j] + t * (simplex[N].0[j] - centroid[j]);
            }
            p
        };

        let xr = along(-1.0);
        let fr = f(&xr);
        if fr < f_best {
            let xe = along(-2.0);
            let fe = f(&xe);
            simplex[N] = if fe < fr { (xe, fe) } else { (xr, fr) };
        } else if fr < simplex[N - 1].1 {
            simplex[N] = (xr, fr);
        } else {
            let (xc, fc) = if fr < f_worst {
                let x = along(-0.5);
                (x, f(&x))
            } else {
                let x = along(0.5);
                (x, f(&x))
            };
            if fc < fr.min(f_worst) {
                simplex[N] = (xc, fc);
            } else {
                let best = simplex[0].0;
                for (x, fx) in simplex.iter_mut().skip(1) {
                    for j in 0..N {
                        x[j] = best[j] + 0.5 * (x[j] - best[j]);
                    }
                    *fx = f(&*x);
                }
            }
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    (simplex[0].0, simplex[0].1, iterations, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    fn synthetic(params: &HestonParams) -> Vec<FitPoint> {
        let mut pts = Vec::new();
        for &t in &[30.0 / 365.0, 60.0 / 365.0, 120.0 / 365.0] {
            for &k in &[-0.15, -0.05, 0.0, 0.05, 0.15] {
                pts.push(FitPoint { log_moneyness: k, t, iv: params.implied_vol(k, t) });
            }
        }
        pts
    }

    #[test]
    fn put_skew_for_negative_rho() {
        let p = HestonParams { v0: 0.04, kappa: 2.0, theta: 0.05, xi: 0.6, rho: -0.7 };
        assert!(p.implied_vol(-0.1, 0.25) > p.implied_vol(0.1, 0.25));
    }

    #[test]
    fn fit_recovers_synthetic_surface() {
        let truth = HestonParams { v0: 0.05, kappa: 1.5, theta: 0.07, xi: 0.5, rho: -0.6 };
        let pts = synthetic(&truth);
        let opts = FitOptions { max_iterations: 20_000, abs_tol: 1e-10, ..Default::default() };
        let fit = fit(&pts, &opts, &live()).unwrap();
        assert!(fit.rmse < 1e-3, "rmse {}", fit.rmse);
        for p in &pts {
            let model = fit.params.implied_vol(p.log_moneyness, p.t);
            assert!((model - p.iv).abs() < 5e-3);
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let truth = HestonParams { v0: 0.09, kappa: 3.0, theta: 0.06, xi: 0.8, rho: -0.3 };
        let pts = synthetic(&truth);
        let a = fit(&pts, &FitOptions::default(), &live());
        let b = fit(&pts, &FitOptions::default(), &live());
        match (a, b) {
            (Ok(a), Ok(b)) => assert_eq!(a.params, b.params),
            (Err(a), Err(b)) => assert_eq!(a, b),
            _ => panic!("same input produced different outcomes"),
        }
    }

    #[test]
    fn too_few_points_is_insufficient_data() {
        let pts = vec![FitPoint { log_moneyness: 0.0, t: 0.1, iv: 0.2 }; 4];
        assert!(matches!(fit(&pts, &FitOptions::default(), &live()), Err(PricingError::InsufficientData { .. })));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let truth = HestonParams { v0: 0.05, kappa: 1.5, theta: 0.07, xi: 0.5, rho: -0.6 };
        let opts = FitOptions { max_iterations: 2, ..Default::default() };
        assert!(matches!(
            fit(&synthetic(&truth), &opts, &live()),
            Err(PricingError::FitDidNotConverge { .. })
        ));
    }

    #[test]
    fn unfittable_noise_reports_non_convergence() {
        let pts: Vec<FitPoint> = (0..10)
            .map(|i| FitPoint {
                log_moneyness: 0.0,
                t: 0.1,
                iv: if i % 2 == 0 { 0.1 } else { 0.9 },
            })
            .collect();
        assert!(matches!(
            fit(&pts, &FitOptions::default(), &live()),
            Err(PricingError::FitDidNotConverge { .. })
        ));
    }

    #[test]
    fn cancelled_token_stops_the_fit() {
        let truth = HestonParams { v0: 0.05, kappa: 1.5, theta: 0.07, xi: 0.5, rho: -0.6 };
        let token = CancellationToken::new();
        token.cancel();
        let opts = FitOptions { max_iterations: 1_000_000, ..Default::default() };
        assert!(matches!(fit(&synthetic(&truth), &opts, &token), Err(PricingError::Cancelled)));
    }
}
