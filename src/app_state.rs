// =============================================================================
// Central Application State
// =============================================================================
//
// Shared by the orchestrator loop, the watchdog and the REST API via
// `Arc<AppState>`.  Each subsystem owns its own engine; AppState keeps the
// read models the API serves.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the bounded ring buffers.
//   - The risk stage guards its own book.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::decision_envelope::DecisionEnvelope;
use crate::orchestrator::{CycleReport, CycleSummary, Heartbeat};
use crate::publish::PublishedSignal;
use crate::risk::RiskStage;
use crate::runtime_config::RuntimeConfig;
use crate::watchdog::WatchdogSnapshot;

const MAX_RECENT_SIGNALS: usize = 200;
const MAX_RECENT_CYCLES: usize = 50;
/// Maximum number of recent decision envelopes to retain.
const MAX_RECENT_DECISIONS: usize = 500;

pub struct AppState {
    /// Incremented on every recorded cycle.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub risk: Arc<RiskStage>,
    pub heartbeat: Arc<Heartbeat>,

    pub recent_signals: RwLock<VecDeque<PublishedSignal>>,
    pub recent_cycles: RwLock<VecDeque<CycleSummary>>,
    pub recent_decisions: RwLock<VecDeque<DecisionEnvelope>>,

    /// Token of the cycle currently running, if any.
    pub current_cycle: RwLock<Option<CancellationToken>>,

    pub watchdog: Arc<RwLock<WatchdogSnapshot>>,

    pub start_time: std::time::Instant,
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    buf.push_back(item);
    while buf.len() > cap {
        buf.pop_front();
    }
}

impl AppState {
    pub fn new(config: RuntimeConfig, risk: Arc<RiskStage>, heartbeat: Arc<Heartbeat>) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            risk,
            heartbeat,
            recent_signals: RwLock::new(VecDeque::new()),
            recent_cycles: RwLock::new(VecDeque::new()),
            recent_decisions: RwLock::new(VecDeque::new()),
            current_cycle: RwLock::new(None),
            watchdog: Arc::new(RwLock::new(WatchdogSnapshot::default())),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Fold a finished cycle into the ring buffers.
    pub fn record_cycle(&self, report: CycleReport) {
        {
            let mut signals = self.recent_signals.write();
            for s in report.signals {
                push_bounded(&mut *signals, s, MAX_RECENT_SIGNALS);
            }
        }
        {
            let mut decisions = self.recent_decisions.write();
            for e in report.envelopes {
                push_bounded(&mut *decisions, e, MAX_RECENT_DECISIONS);
            }
        }
        push_bounded(&mut *self.recent_cycles.write(), report.summary, MAX_RECENT_CYCLES);
        self.increment_version();
    }

    /// Cancel the running cycle.  Returns false when nothing was running.
    pub fn cancel_current_cycle(&self) -> bool {
        match self.current_cycle.read().as_ref() {
            Some(token) => {
                info!("cancelling current cycle on request");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state() -> AppState {
        let config = RuntimeConfig::default();
        let risk = Arc::new(RiskStage::new(
            config.risk.clone(),
            config.trader.account_value,
            config.trader.contract_multiplier,
            config.pipeline.risk_free_rate,
            Vec::new(),
        ));
        AppState::new(config, risk, Arc::new(Heartbeat::new()))
    }

    fn report(n: usize) -> CycleReport {
        CycleReport {
            summary: CycleSummary {
                cycle_id: format!("c{n}"),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                candidates: 1,
                published: 0,
                aborted: 1,
                cancelled: false,
                in_flight_at_end: 0,
            },
            envelopes: vec![DecisionEnvelope::open(format!("c{n}"), "AAPL")],
            signals: Vec::new(),
        }
    }

    #[test]
    fn ring_buffers_stay_bounded() {
        let s = state();
        for n in 0..(MAX_RECENT_CYCLES + 10) {
            s.record_cycle(report(n));
        }
        let cycles = s.recent_cycles.read();
        assert_eq!(cycles.len(), MAX_RECENT_CYCLES);
        assert_eq!(cycles.front().unwrap().cycle_id, "c10");
        assert_eq!(s.current_state_version(), 1 + (MAX_RECENT_CYCLES + 10) as u64);
    }

    #[test]
    fn cancel_without_running_cycle_is_noop() {
        let s = state();
        assert!(!s.cancel_current_cycle());

        let token = CancellationToken::new();
        *s.current_cycle.write() = Some(token.clone());
        assert!(s.cancel_current_cycle());
        assert!(token.is_cancelled());
    }
}
