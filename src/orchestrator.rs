// =============================================================================
// Orchestrator — per-cycle candidate state machine over a bounded worker pool
// =============================================================================
//
// One cycle:
//   1. Every watchlist symbol becomes a task in a JoinSet.
//   2. A task waits for a worker permit (Semaphore, max_workers), then runs
//      COLLECT -> ANALYZE -> DEBATE -> PROPOSE -> VALIDATE under the
//      per-candidate timeout.
//   3. Finished signals are published as tasks complete; an aborted
//      candidate simply does not appear in the output.
//
// Cancellation: the cycle token is watched by every task.  After it fires
// the collector waits `cancel_grace_ms` for tasks to wind down, then aborts
// whatever is left.  Candidate futures and the blocking jobs they spawn each
// hold an in-flight guard; a blocking job cannot be aborted, so each candidate
// gets a stop token that fires when its future ends and the Heston fit polls
// it.  The cycle reports only after the in-flight count drains or the grace
// runs out.
//
// VALIDATE runs synchronously between await points: a timeout or cancel can
// drop the pipeline before or after a risk commit, never halfway through.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyst::{findings_with_abstentions, AnalysisContext, AnalystStage};
use crate::app_state::AppState;
use crate::decision_envelope::{CycleState, DecisionEnvelope};
use crate::errors::{MarketDataError, WatchdogError};
use crate::in_flight::InFlight;
use crate::market_data::MarketDataProvider;
use crate::pricing::VolContext;
use crate::publish::{publish_all, PublishedSignal, Publisher};
use crate::research;
use crate::risk::RiskStage;
use crate::runtime_config::PipelineParams;
use crate::trader::TraderStage;
use crate::types::Candidate;
use crate::watchdog::Remediator;

// =============================================================================
// Heartbeat
// =============================================================================

/// Liveness timestamp written by the orchestrator and read by the watchdog.
pub struct Heartbeat {
    last: RwLock<DateTime<Utc>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self { last: RwLock::new(Utc::now()) }
    }

    pub fn beat(&self) {
        *self.last.write() = Utc::now();
    }

    pub fn last(&self) -> DateTime<Utc> {
        *self.last.read()
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Cycle report
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub published: usize,
    pub aborted: usize,
    pub cancelled: bool,
    /// Candidate tasks and blocking jobs still alive when the cycle returned.
    pub in_flight_at_end: usize,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub summary: CycleSummary,
    pub envelopes: Vec<DecisionEnvelope>,
    pub signals: Vec<PublishedSignal>,
}

type SharedEnvelope = Arc<Mutex<DecisionEnvelope>>;

// =============================================================================
// Orchestrator
// =============================================================================

pub struct Orchestrator {
    provider: Arc<dyn MarketDataProvider>,
    analysts: AnalystStage,
    trader: TraderStage,
    risk: Arc<RiskStage>,
    publishers: Vec<Arc<dyn Publisher>>,
    params: PipelineParams,
    work: Arc<InFlight>,
    heartbeat: Arc<Heartbeat>,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        analysts: AnalystStage,
        trader: TraderStage,
        risk: Arc<RiskStage>,
        publishers: Vec<Arc<dyn Publisher>>,
        params: PipelineParams,
        heartbeat: Arc<Heartbeat>,
    ) -> Self {
        Self {
            provider,
            analysts,
            trader,
            risk,
            publishers,
            params,
            work: InFlight::new(),
            heartbeat,
        }
    }

    /// Candidate tasks (queued or running) plus blocking jobs still executing.
    pub fn in_flight(&self) -> usize {
        self.work.count()
    }

    // -------------------------------------------------------------------------
    // COLLECT
    // -------------------------------------------------------------------------

    /// The quote is mandatory; every other feed degrades to `None`/empty and
    /// surfaces later as an analyst abstention.
    async fn collect(&self, symbol: &str) -> Result<Candidate, MarketDataError> {
        let quote = self.provider.get_quote(symbol).await?;
        let p = &self.provider;
        let (surface, flow, history, fundamentals, catalysts) = tokio::join!(
            p.get_greeks_surface(symbol),
            p.get_order_flow_tags(symbol),
            p.get_price_history(symbol),
            p.get_fundamentals(symbol),
            p.get_catalysts(symbol),
        );

        fn soft<T>(symbol: &str, feed: &str, r: Result<T, MarketDataError>) -> Option<T> {
            match r {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(%symbol, feed, error = %e, "feed unavailable, continuing without it");
                    None
                }
            }
        }

        Ok(Candidate {
            symbol: symbol.to_string(),
            last_price: quote.price,
            timestamp: quote.timestamp,
            surface: soft(symbol, "surface", surface).unwrap_or_default(),
            order_flow: soft(symbol, "order_flow", flow),
            history: soft(symbol, "history", history),
            fundamentals: soft(symbol, "fundamentals", fundamentals),
            catalysts: soft(symbol, "catalysts", catalysts),
        })
    }

    // -------------------------------------------------------------------------
    // One candidate, COLLECT through VALIDATE
    // -------------------------------------------------------------------------

    async fn process(
        self: Arc<Self>,
        symbol: String,
        today: NaiveDate,
        env: SharedEnvelope,
        stop: CancellationToken,
    ) -> Option<PublishedSignal> {
        let candidate = match self.collect(&symbol).await {
            Ok(c) => Arc::new(c),
            Err(e) => {
                warn!(%symbol, error = %e, "candidate aborted in COLLECT");
                env.lock().abort(e.to_string());
                return None;
            }
        };

        env.lock().advance(CycleState::Analyze);
        let ctx = AnalysisContext {
            today,
            risk_free_rate: self.params.risk_free_rate,
            lookback_bars: self.params.lookback_bars,
        };
        let outcomes = self.analysts.run(Arc::clone(&candidate), &ctx, &self.work).await;
        {
            let mut e = env.lock();
            for (kind, result) in &outcomes {
                if let Err(err) = result {
                    info!(%symbol, analyst = %kind, reason = %err, "analyst abstained");
                    e.abstained(*kind, err.to_string());
                }
            }
        }
        let findings = findings_with_abstentions(&outcomes);

        env.lock().advance(CycleState::Debate);
        let verdict = research::debate(&findings);
        {
            let mut e = env.lock();
            e.direction = Some(verdict.direction);
            e.conviction = Some(verdict.conviction);
        }
        debug!(%symbol, direction = %verdict.direction, conviction = verdict.conviction, "debate complete");

        env.lock().advance(CycleState::Propose);
        let this = Arc::clone(&self);
        let for_trader = Arc::clone(&candidate);
        let v = verdict.clone();
        let guard = self.work.enter();
        let proposed = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let vol = VolContext::build(&for_trader, today, &this.trader.params().vol_bands, &stop);
            this.trader.propose(&for_trader, &v, vol.as_ref(), today)
        })
        .await;
        let proposal = match proposed {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => {
                info!(%symbol, reason = %e, "no proposal this cycle");
                env.lock().abort(e.to_string());
                return None;
            }
            Err(e) => {
                error!(%symbol, error = %e, "proposal task failed");
                env.lock().abort("proposal task failed");
                return None;
            }
        };
        env.lock().strategy = Some(proposal.strategy);

        env.lock().advance(CycleState::Validate);
        let decision = self.risk.validate(&proposal, today);
        {
            let mut e = env.lock();
            e.risk_outcome = Some(decision.outcome);
            e.advance(CycleState::Publish);
        }

        Some(PublishedSignal {
            candidate: symbol,
            direction: verdict.direction,
            conviction_score: verdict.conviction,
            proposal: decision.proposal.clone(),
            risk_decision: decision,
            timestamp: Utc::now(),
        })
    }

    // -------------------------------------------------------------------------
    // Cycle
    // -------------------------------------------------------------------------

    pub async fn run_cycle(self: &Arc<Self>, watchlist: &[String], cancel: &CancellationToken, today: NaiveDate) -> CycleReport {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        self.heartbeat.beat();
        info!(%cycle_id, candidates = watchlist.len(), "cycle started");

        let pool = Arc::new(Semaphore::new(self.params.max_workers.max(1)));
        let limit = Duration::from_millis(self.params.candidate_timeout_ms);
        let mut envelopes: Vec<SharedEnvelope> = Vec::with_capacity(watchlist.len());
        let mut set = JoinSet::new();

        for symbol in watchlist {
            let env = Arc::new(Mutex::new(DecisionEnvelope::open(&cycle_id, symbol)));
            envelopes.push(Arc::clone(&env));

            let guard = self.work.enter();
            let this = Arc::clone(self);
            let pool = Arc::clone(&pool);
            let token = cancel.clone();
            let symbol = symbol.clone();

            set.spawn(async move {
                let _guard = guard;
                let stop = token.child_token();
                let _stop_on_exit = stop.clone().drop_guard();
                let permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        env.lock().abort("cycle cancelled before start");
                        return None;
                    }
                    p = pool.acquire_owned() => p,
                };
                let Ok(_permit) = permit else {
                    env.lock().abort("worker pool closed");
                    return None;
                };

                let pipeline = this.process(symbol.clone(), today, Arc::clone(&env), stop);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!(%symbol, "candidate cancelled");
                        env.lock().abort("cycle cancelled");
                        None
                    }
                    r = tokio::time::timeout(limit, pipeline) => match r {
                        Ok(signal) => signal,
                        Err(_) => {
                            warn!(%symbol, timeout_ms = limit.as_millis() as u64, "candidate timed out");
                            env.lock().abort(format!("timed out after {}ms", limit.as_millis()));
                            None
                        }
                    },
                }
            });
        }

        let grace = Duration::from_millis(self.params.cancel_grace_ms);
        let mut deadline: Option<Instant> = None;
        let mut signals = Vec::new();
        loop {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, set.join_next()).await {
                    Ok(j) => j,
                    Err(_) => {
                        warn!(%cycle_id, remaining = set.len(), "cancel grace elapsed, aborting candidate tasks");
                        set.abort_all();
                        while set.join_next().await.is_some() {}
                        break;
                    }
                },
                None => tokio::select! {
                    j = set.join_next() => j,
                    _ = cancel.cancelled() => {
                        info!(%cycle_id, in_flight = self.in_flight(), "cycle cancellation requested");
                        deadline = Some(Instant::now() + grace);
                        continue;
                    }
                },
            };
            let Some(joined) = joined else { break };
            self.heartbeat.beat();
            match joined {
                Ok(Some(signal)) => {
                    publish_all(&self.publishers, &signal).await;
                    signals.push(signal);
                }
                Ok(None) => {}
                Err(e) => warn!(%cycle_id, error = %e, "candidate task ended abnormally"),
            }
        }

        // Blocking jobs of cancelled or timed-out candidates may still be running.
        if self.in_flight() > 0 {
            debug!(%cycle_id, in_flight = self.in_flight(), "waiting for blocking work to finish");
            if tokio::time::timeout(grace, self.work.drained()).await.is_err() {
                warn!(%cycle_id, in_flight = self.in_flight(), "blocking work still running after grace");
            }
        }

        let envelopes: Vec<DecisionEnvelope> = envelopes
            .iter()
            .map(|env| {
                let mut e = env.lock();
                e.abort("candidate task aborted");
                e.clone()
            })
            .collect();

        let aborted = envelopes.iter().filter(|e| e.state() == CycleState::Aborted).count();
        let summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            candidates: watchlist.len(),
            published: signals.len(),
            aborted,
            cancelled: cancel.is_cancelled(),
            in_flight_at_end: self.in_flight(),
        };
        self.heartbeat.beat();
        info!(
            cycle_id = %summary.cycle_id,
            published = summary.published,
            aborted = summary.aborted,
            cancelled = summary.cancelled,
            "cycle finished"
        );

        CycleReport { summary, envelopes, signals }
    }

    /// Periodic cycle loop until `shutdown` fires.
    pub async fn run_loop(self: Arc<Self>, state: Arc<AppState>, shutdown: CancellationToken) {
        let secs = self.params.cycle_interval_secs.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = secs, "orchestrator loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.heartbeat.beat();

            let token = shutdown.child_token();
            *state.current_cycle.write() = Some(token.clone());
            let watchlist = state.runtime_config.read().watchlist.clone();
            let report = self.run_cycle(&watchlist, &token, Utc::now().date_naive()).await;
            *state.current_cycle.write() = None;
            state.record_cycle(report);
        }
        info!("orchestrator loop stopped");
    }
}

// =============================================================================
// Supervisor — restart handle used by the watchdog
// =============================================================================

pub struct OrchestratorSupervisor {
    orchestrator: Arc<Orchestrator>,
    state: Arc<AppState>,
    shutdown: CancellationToken,
    grace: Duration,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl OrchestratorSupervisor {
    pub fn new(orchestrator: Arc<Orchestrator>, state: Arc<AppState>, shutdown: CancellationToken) -> Self {
        let grace = Duration::from_millis(orchestrator.params.cancel_grace_ms);
        Self {
            orchestrator,
            state,
            shutdown,
            grace,
            running: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(Arc::clone(&self.orchestrator).run_loop(Arc::clone(&self.state), token.clone()));
        *self.running.lock() = Some((token, handle));
    }

    /// Stop the current loop (cancelling its cycle) and start a fresh one.
    pub async fn restart(&self) -> Result<(), WatchdogError> {
        if self.shutdown.is_cancelled() {
            return Err(WatchdogError::ComponentFailed {
                component: "orchestrator".into(),
                reason: "shutdown in progress".into(),
            });
        }
        let previous = self.running.lock().take();
        if let Some((token, mut handle)) = previous {
            token.cancel();
            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "orchestrator loop had already failed"),
                Err(_) => {
                    warn!("orchestrator loop did not stop within grace, aborting");
                    handle.abort();
                }
            }
        }
        self.start();
        info!("orchestrator loop restarted");
        Ok(())
    }

    pub async fn stop(&self) {
        let previous = self.running.lock().take();
        if let Some((token, handle)) = previous {
            token.cancel();
            if tokio::time::timeout(self.grace, handle).await.is_err() {
                warn!("orchestrator loop did not stop within grace");
            }
        }
    }
}

#[async_trait]
impl Remediator for OrchestratorSupervisor {
    async fn remediate(&self, component: &str) -> Result<(), WatchdogError> {
        info!(component, "restarting orchestrator loop");
        self.restart().await
    }
}

// =============================================================================
// Tests
// =============================================================================
