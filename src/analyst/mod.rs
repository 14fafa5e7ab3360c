// =============================================================================
// Analyst Stage — four independent scorers per candidate
// =============================================================================
//
// Fundamental, technical, sentiment and news analyzers each read the same
// immutable `Candidate` and return exactly one finding or a typed error.
// They never see each other's output and never touch shared state, so the
// stage runs them as parallel blocking tasks and simply collects results.
//
// Results come back sorted by analyst kind regardless of completion order,
// which keeps the downstream debate reproducible.
// =============================================================================

pub mod fundamental;
pub mod news;
pub mod patterns;
pub mod sentiment;
pub mod technical;

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::errors::AnalystError;
use crate::in_flight::InFlight;
use crate::types::{AnalystFinding, AnalystKind, Candidate};

/// Read-only inputs shared by all analyzers for one cycle.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub today: NaiveDate,
    pub risk_free_rate: f64,
    pub lookback_bars: usize,
}

pub trait Analyst: Send + Sync + 'static {
    fn kind(&self) -> AnalystKind;

    fn analyze(&self, candidate: &Candidate, ctx: &AnalysisContext) -> Result<AnalystFinding, AnalystError>;
}

/// Outcome of one analyzer: a finding or the reason it abstained.
pub type AnalystOutcome = (AnalystKind, Result<AnalystFinding, AnalystError>);

pub struct AnalystStage {
    analysts: Vec<Arc<dyn Analyst>>,
}

impl AnalystStage {
    /// The standard four-analyzer stage.
    pub fn standard() -> Self {
        Self::with_analysts(vec![
            Arc::new(fundamental::FundamentalAnalyst::default()),
            Arc::new(technical::TechnicalAnalyst),
            Arc::new(sentiment::SentimentAnalyst),
            Arc::new(news::NewsAnalyst::default()),
        ])
    }

    pub fn with_analysts(analysts: Vec<Arc<dyn Analyst>>) -> Self {
        Self { analysts }
    }

    /// Run every analyzer concurrently.  Dropping the returned future aborts
    /// whatever has not started yet; a job already running keeps its `work`
    /// guard until it returns.
    pub async fn run(&self, candidate: Arc<Candidate>, ctx: &AnalysisContext, work: &Arc<InFlight>) -> Vec<AnalystOutcome> {
        let mut set = JoinSet::new();
        for analyst in &self.analysts {
            let analyst = Arc::clone(analyst);
            let candidate = Arc::clone(&candidate);
            let ctx = ctx.clone();
            let guard = work.enter();
            set.spawn_blocking(move || {
                let _guard = guard;
                (analyst.kind(), analyst.analyze(&candidate, &ctx))
            });
        }

        let mut outcomes = Vec::with_capacity(self.analysts.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(symbol = %candidate.symbol, error = %e, "analyst task panicked"),
            }
        }

        // A panicked analyzer still gets a slot so every kind is represented.
        for analyst in &self.analysts {
            let kind = analyst.kind();
            if !outcomes.iter().any(|(k, _)| *k == kind) {
                outcomes.push((kind, Err(AnalystError::ComputationError("analyzer task failed".into()))));
            }
        }

        outcomes.sort_by_key(|(kind, _)| AnalystKind::ALL.iter().position(|k| k == kind));
        debug!(symbol = %candidate.symbol, count = outcomes.len(), "analyst stage complete");
        outcomes
    }
}

/// Turn stage outcomes into findings, substituting zero-confidence
/// abstentions for failures.
pub fn findings_with_abstentions(outcomes: &[AnalystOutcome]) -> Vec<AnalystFinding> {
    outcomes
        .iter()
        .map(|(kind, result)| match result {
            Ok(f) => f.clone(),
            Err(e) => AnalystFinding::abstain(*kind, format!("abstained: {e}")),
        })
        .collect()
}
