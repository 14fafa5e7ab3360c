// =============================================================================
// Decision Envelope — auditable record of one candidate's pass through a cycle
// =============================================================================
//
// Every candidate walks the same one-way state machine:
//
//   COLLECT -> ANALYZE -> DEBATE -> PROPOSE -> VALIDATE -> PUBLISH
//        \________\_________\_________\__________\______-> ABORTED
//
// The envelope records each state entered, the analyzers that abstained and
// why, and where (and why) the candidate stopped.  It is shared behind a
// mutex with the running pipeline so the trail survives a timeout or a
// cancellation that drops the pipeline future mid-stage.
// =============================================================================

use serde::Serialize;
use tracing::warn;

use crate::types::{AnalystKind, Direction, RiskOutcome, StrategyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Collect,
    Analyze,
    Debate,
    Propose,
    Validate,
    Publish,
    Aborted,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Publish | Self::Aborted)
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Collect => "COLLECT",
            Self::Analyze => "ANALYZE",
            Self::Debate => "DEBATE",
            Self::Propose => "PROPOSE",
            Self::Validate => "VALIDATE",
            Self::Publish => "PUBLISH",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Abstention {
    pub analyst: AnalystKind,
    pub reason: String,
}

/// Complete auditable record of one candidate in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    pub id: String,
    pub cycle_id: String,
    pub symbol: String,

    /// States entered, in order.
    pub states: Vec<CycleState>,

    pub abstentions: Vec<Abstention>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub conviction: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_outcome: Option<RiskOutcome>,

    /// Stage that was running when the candidate aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_in: Option<CycleState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// ISO 8601 timestamp of when this envelope was opened.
    pub created_at: String,
}

impl DecisionEnvelope {
    /// Open an envelope in the COLLECT state.
    pub fn open(cycle_id: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cycle_id: cycle_id.into(),
            symbol: symbol.into(),
            states: vec![CycleState::Collect],
            abstentions: Vec::new(),
            direction: None,
            conviction: None,
            strategy: None,
            risk_outcome: None,
            aborted_in: None,
            reason: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn state(&self) -> CycleState {
        self.states.last().copied().unwrap_or(CycleState::Collect)
    }

    /// Move forward to `next`.  Returns false (and leaves the trail
    /// untouched) for any backwards or post-terminal transition.
    pub fn advance(&mut self, next: CycleState) -> bool {
        let current = self.state();
        if current.is_terminal() || next <= current || next == CycleState::Aborted {
            warn!(symbol = %self.symbol, from = %current, to = %next, "illegal state transition refused");
            return false;
        }
        self.states.push(next);
        true
    }

    /// Terminate in ABORTED.  No-op if already terminal.
    pub fn abort(&mut self, reason: impl Into<String>) {
        let current = self.state();
        if current.is_terminal() {
            return;
        }
        self.aborted_in = Some(current);
        self.reason = Some(reason.into());
        self.states.push(CycleState::Aborted);
    }

    pub fn abstained(&mut self, analyst: AnalystKind, reason: impl Into<String>) {
        self.abstentions.push(Abstention { analyst, reason: reason.into() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_reaches_publish() {
        let mut e = DecisionEnvelope::open("c1", "AAPL");
        for s in [
            CycleState::Analyze,
            CycleState::Debate,
            CycleState::Propose,
            CycleState::Validate,
            CycleState::Publish,
        ] {
            assert!(e.advance(s));
        }
        assert_eq!(e.state(), CycleState::Publish);
        assert_eq!(e.states.len(), 6);
    }

    #[test]
    fn transitions_never_go_backwards() {
        let mut e = DecisionEnvelope::open("c1", "MSFT");
        assert!(e.advance(CycleState::Debate));
        assert!(!e.advance(CycleState::Analyze));
        assert!(!e.advance(CycleState::Debate));
        assert_eq!(e.state(), CycleState::Debate);
    }

    #[test]
    fn abort_is_terminal_and_records_stage() {
        let mut e = DecisionEnvelope::open("c1", "NVDA");
        e.advance(CycleState::Analyze);
        e.abort("timeout");
        assert_eq!(e.state(), CycleState::Aborted);
        assert_eq!(e.aborted_in, Some(CycleState::Analyze));
        assert!(!e.advance(CycleState::Publish));
        e.abort("again");
        assert_eq!(e.reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn serialises_states_upper_case() {
        let e = DecisionEnvelope::open("c1", "SPY");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["states"][0], "COLLECT");
        assert!(json.get("reason").is_none());
    }
}
