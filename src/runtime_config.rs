// =============================================================================
// Runtime Configuration — externally supplied limits and cadences
// =============================================================================
//
// Every tunable number the pipeline uses lives here: risk limits, sizing
// budget, cycle timeout, worker-pool width and watchdog cadence.  Nothing in
// the stages is hardcoded; the structs are passed down by reference.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_watchlist() -> Vec<String> {
    vec![
        "AAPL".to_string(),
        "MSFT".to_string(),
        "NVDA".to_string(),
        "SPY".to_string(),
        "QQQ".to_string(),
    ]
}

fn default_max_position_pct() -> f64 {
    0.20
}

fn default_max_delta_pct() -> f64 {
    0.50
}

fn default_max_vega_pct() -> f64 {
    0.02
}

fn default_max_drawdown_pct() -> f64 {
    0.10
}

fn default_spot_shock() -> f64 {
    0.10
}

fn default_vol_shock() -> f64 {
    0.50
}

fn default_account_value() -> f64 {
    100_000.0
}

fn default_risk_budget_pct() -> f64 {
    0.02
}

fn default_short_dte() -> u32 {
    35
}

fn default_long_dte() -> u32 {
    90
}

fn default_contract_multiplier() -> f64 {
    100.0
}

fn default_cycle_interval_secs() -> u64 {
    300
}

fn default_candidate_timeout_ms() -> u64 {
    20_000
}

fn default_max_workers() -> usize {
    4
}

fn default_cancel_grace_ms() -> u64 {
    2_000
}

fn default_risk_free_rate() -> f64 {
    0.045
}

fn default_lookback_bars() -> usize {
    60
}

fn default_vol_bands() -> [f64; 3] {
    [0.15, 0.25, 0.40]
}

fn default_tick_secs() -> u64 {
    30
}

fn default_soft_failure_threshold() -> u32 {
    3
}

fn default_degraded_timeout_secs() -> u64 {
    300
}

fn default_cooldown_secs() -> u64 {
    900
}

fn default_heartbeat_stale_secs() -> u64 {
    900
}

fn default_min_disk_free_gb() -> f64 {
    5.0
}

fn default_max_rss_mb() -> f64 {
    2_048.0
}

fn default_positions_path() -> String {
    "positions.json".to_string()
}

fn default_api_bind() -> String {
    "127.0.0.1:8090".to_string()
}

// =============================================================================
// RiskLimits
// =============================================================================

/// Hard portfolio limits enforced by the risk stage.  All fractions are of
/// account value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Max capital committed to one position.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,

    /// Max |portfolio delta| in dollar terms (delta x spot).
    #[serde(default = "default_max_delta_pct")]
    pub max_delta_pct: f64,

    /// Max |portfolio vega| per 1 vol point.
    #[serde(default = "default_max_vega_pct")]
    pub max_vega_pct: f64,

    /// Max stress-scenario loss.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Underlying move applied in both directions by the stress test.
    #[serde(default = "default_spot_shock")]
    pub stress_spot_shock: f64,

    /// Relative vol increase applied by the stress test (0.5 = +50%).
    #[serde(default = "default_vol_shock")]
    pub stress_vol_shock: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_pct: default_max_position_pct(),
            max_delta_pct: default_max_delta_pct(),
            max_vega_pct: default_max_vega_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            stress_spot_shock: default_spot_shock(),
            stress_vol_shock: default_vol_shock(),
        }
    }
}

// =============================================================================
// TraderParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderParams {
    /// Account value used for sizing and limit percentages.
    #[serde(default = "default_account_value")]
    pub account_value: f64,

    /// Fraction of account value at risk per trade at full conviction.
    #[serde(default = "default_risk_budget_pct")]
    pub risk_budget_pct: f64,

    /// Target days-to-expiry for front-month legs.
    #[serde(default = "default_short_dte")]
    pub short_dte: u32,

    /// Target days-to-expiry for back-month legs (calendars).
    #[serde(default = "default_long_dte")]
    pub long_dte: u32,

    #[serde(default = "default_contract_multiplier")]
    pub contract_multiplier: f64,

    /// Annualised vol boundaries low|normal|elevated|extreme.
    #[serde(default = "default_vol_bands")]
    pub vol_bands: [f64; 3],
}

impl TraderParams {
    /// Dollar risk budget at full conviction.
    pub fn risk_budget(&self) -> f64 {
        self.account_value * self.risk_budget_pct
    }
}

impl Default for TraderParams {
    fn default() -> Self {
        Self {
            account_value: default_account_value(),
            risk_budget_pct: default_risk_budget_pct(),
            short_dte: default_short_dte(),
            long_dte: default_long_dte(),
            contract_multiplier: default_contract_multiplier(),
            vol_bands: default_vol_bands(),
        }
    }
}

// =============================================================================
// PipelineParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineParams {
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// Deadline for one candidate's full COLLECT..VALIDATE run.
    #[serde(default = "default_candidate_timeout_ms")]
    pub candidate_timeout_ms: u64,

    /// Candidates processed in parallel.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long a cancelled cycle waits for in-flight candidates to drain.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    /// Bars of history the technical analyzer looks at.
    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: usize,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            candidate_timeout_ms: default_candidate_timeout_ms(),
            max_workers: default_max_workers(),
            cancel_grace_ms: default_cancel_grace_ms(),
            risk_free_rate: default_risk_free_rate(),
            lookback_bars: default_lookback_bars(),
        }
    }
}

// =============================================================================
// WatchdogParams
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogParams {
    /// Health-check cadence.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Consecutive soft failures before a component is marked degraded.
    #[serde(default = "default_soft_failure_threshold")]
    pub soft_failure_threshold: u32,

    /// Time spent degraded before the component is declared failed.
    #[serde(default = "default_degraded_timeout_secs")]
    pub degraded_timeout_secs: u64,

    /// Window in which two failed remediations escalate to an alert.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Orchestrator heartbeat older than this is a hard failure.
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: u64,

    #[serde(default = "default_min_disk_free_gb")]
    pub min_disk_free_gb: f64,

    #[serde(default = "default_max_rss_mb")]
    pub max_rss_mb: f64,

    /// Optional webhook that receives escalated alerts.
    #[serde(default)]
    pub alert_webhook: Option<String>,
}

impl Default for WatchdogParams {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            soft_failure_threshold: default_soft_failure_threshold(),
            degraded_timeout_secs: default_degraded_timeout_secs(),
            cooldown_secs: default_cooldown_secs(),
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            min_disk_free_gb: default_min_disk_free_gb(),
            max_rss_mb: default_max_rss_mb(),
            alert_webhook: None,
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,

    #[serde(default)]
    pub risk: RiskLimits,

    #[serde(default)]
    pub trader: TraderParams,

    #[serde(default)]
    pub pipeline: PipelineParams,

    #[serde(default)]
    pub watchdog: WatchdogParams,

    /// Base URL of the market data aggregator.  When absent the simulated
    /// feed is used.
    #[serde(default)]
    pub data_url: Option<String>,

    /// Webhook receiving published signals.
    #[serde(default)]
    pub publish_webhook: Option<String>,

    /// Export from the position tracker, read once at start.
    #[serde(default = "default_positions_path")]
    pub positions_path: String,

    #[serde(default = "default_api_bind")]
    pub api_bind: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            risk: RiskLimits::default(),
            trader: TraderParams::default(),
            pipeline: PipelineParams::default(),
            watchdog: WatchdogParams::default(),
            data_url: None,
            publish_webhook: None,
            positions_path: default_positions_path(),
            api_bind: default_api_bind(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            watchlist = ?config.watchlist,
            max_workers = config.pipeline.max_workers,
            "runtime config loaded"
        );
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `OPTIONS_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(list) = std::env::var("OPTIONS_WATCHLIST") {
            let parsed: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.watchlist = parsed;
            }
        }
        if let Ok(url) = std::env::var("OPTIONS_DATA_URL") {
            if !url.trim().is_empty() {
                self.data_url = Some(url.trim().to_string());
            }
        }
        if let Ok(bind) = std::env::var("OPTIONS_API_BIND") {
            if !bind.trim().is_empty() {
                self.api_bind = bind.trim().to_string();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
