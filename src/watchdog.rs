// =============================================================================
// Watchdog — per-component health state machine with bounded remediation
// =============================================================================
//
// Runs on its own interval, never on the orchestrator's worker pool.
//
// Per component:
//
//   healthy --(N consecutive soft failures)--> degraded
//   degraded --(still failing after degraded_timeout)--> failed
//   any --(hard failure)--> failed
//   failed --(remediator, no restart inside cooldown)--> restarting
//   restarting --(ok)--> healthy
//   restarting --(failure)--> failed
//
// One restart per cooldown window.  If the component keeps failing after
// that restart (two failed checks in a row) an alert is raised, at most once
// per cooldown.  Components without a remediator alert as soon as they fail.
// =============================================================================

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::WatchdogError;
use crate::market_data::MarketDataProvider;
use crate::orchestrator::Heartbeat;
use crate::runtime_config::WatchdogParams;

const MAX_INCIDENTS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Failed,
    Restarting,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Restarting => "restarting",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a single health check.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    Ok,
    /// Counts toward the degraded threshold.
    Soft(String),
    /// Fails the component immediately.
    Hard(String),
}

#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    fn component(&self) -> &str;

    async fn check(&self) -> ProbeResult;
}

#[async_trait]
pub trait Remediator: Send + Sync + 'static {
    async fn remediate(&self, component: &str) -> Result<(), WatchdogError>;
}

#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn alert(&self, incident: &Incident) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub component: String,
    pub status: ComponentStatus,
    pub last_healthy: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub degraded_since: Option<DateTime<Utc>>,
    pub restart_attempts: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    /// Failed checks since the last restart.
    pub failures_since_restart: u32,
    pub alerted_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl HealthRecord {
    fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            status: ComponentStatus::Healthy,
            last_healthy: None,
            consecutive_failures: 0,
            degraded_since: None,
            restart_attempts: 0,
            last_restart_at: None,
            failures_since_restart: 0,
            alerted_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Transition,
    Restart,
    Alert,
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub at: DateTime<Utc>,
    pub component: String,
    pub kind: IncidentKind,
    pub status: ComponentStatus,
    pub detail: String,
}

/// Read model published after every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatchdogSnapshot {
    pub records: Vec<HealthRecord>,
    pub incidents: Vec<Incident>,
    pub last_tick: Option<DateTime<Utc>>,
}

// =============================================================================
// Watchdog
// =============================================================================

pub struct Watchdog {
    params: WatchdogParams,
    probes: Vec<Arc<dyn HealthProbe>>,
    remediators: HashMap<String, Arc<dyn Remediator>>,
    alerts: Vec<Arc<dyn AlertSink>>,
    records: BTreeMap<String, HealthRecord>,
    incidents: VecDeque<Incident>,
    snapshot: Arc<RwLock<WatchdogSnapshot>>,
}

impl Watchdog {
    pub fn new(params: WatchdogParams, snapshot: Arc<RwLock<WatchdogSnapshot>>) -> Self {
        Self {
            params,
            probes: Vec::new(),
            remediators: HashMap::new(),
            alerts: Vec::new(),
            records: BTreeMap::new(),
            incidents: VecDeque::new(),
            snapshot,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.records
            .entry(probe.component().to_string())
            .or_insert_with(|| HealthRecord::new(probe.component()));
        self.probes.push(probe);
        self
    }

    pub fn with_remediator(mut self, component: &str, remediator: Arc<dyn Remediator>) -> Self {
        self.remediators.insert(component.to_string(), remediator);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts.push(sink);
        self
    }

    /// Tick loop until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let secs = self.params.tick_secs.max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_secs = secs, probes = self.probes.len(), "watchdog started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick_at(Utc::now()).await;
        }
        info!("watchdog stopped");
    }

    /// Run every probe once and advance each component's state as of `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) {
        let limit = Duration::from_secs(self.params.tick_secs.max(1));
        let checks = self.probes.iter().map(|p| {
            let p = Arc::clone(p);
            async move {
                let result = match tokio::time::timeout(limit, p.check()).await {
                    Ok(r) => r,
                    Err(_) => ProbeResult::Soft("probe timed out".into()),
                };
                (p.component().to_string(), result)
            }
        });
        let results = join_all(checks).await;

        for (component, result) in results {
            self.observe(&component, result, now).await;
        }
        self.publish_snapshot(now);
    }

    async fn observe(&mut self, component: &str, result: ProbeResult, now: DateTime<Utc>) {
        let threshold = self.params.soft_failure_threshold.max(1);
        let degraded_timeout = chrono::Duration::seconds(self.params.degraded_timeout_secs as i64);
        let cooldown = chrono::Duration::seconds(self.params.cooldown_secs as i64);

        let mut transitions = Vec::new();
        {
            let rec = self
                .records
                .entry(component.to_string())
                .or_insert_with(|| HealthRecord::new(component));

            // A restart older than the cooldown no longer counts.
            if rec.last_restart_at.is_some_and(|t| now - t >= cooldown) {
                rec.failures_since_restart = 0;
            }

            match &result {
                ProbeResult::Ok => {
                    if rec.status != ComponentStatus::Healthy {
                        transitions.push((ComponentStatus::Healthy, "check passed".to_string()));
                    }
                    rec.status = ComponentStatus::Healthy;
                    rec.consecutive_failures = 0;
                    rec.degraded_since = None;
                    rec.failures_since_restart = 0;
                    rec.last_healthy = Some(now);
                    rec.last_error = None;
                }
                ProbeResult::Soft(msg) | ProbeResult::Hard(msg) => {
                    rec.consecutive_failures += 1;
                    rec.last_error = Some(msg.clone());
                    if rec.last_restart_at.is_some_and(|t| now - t < cooldown) {
                        rec.failures_since_restart += 1;
                    }

                    let hard = matches!(result, ProbeResult::Hard(_));
                    let next = match rec.status {
                        ComponentStatus::Failed => None,
                        ComponentStatus::Restarting => Some(ComponentStatus::Failed),
                        _ if hard => Some(ComponentStatus::Failed),
                        ComponentStatus::Healthy if rec.consecutive_failures >= threshold => {
                            Some(ComponentStatus::Degraded)
                        }
                        ComponentStatus::Degraded
                            if rec.degraded_since.is_some_and(|t| now - t >= degraded_timeout) =>
                        {
                            Some(ComponentStatus::Failed)
                        }
                        _ => None,
                    };
                    if let Some(next) = next {
                        if next == ComponentStatus::Degraded {
                            rec.degraded_since = Some(now);
                        }
                        rec.status = next;
                        transitions.push((next, msg.clone()));
                    }
                }
            }
        }

        for (status, detail) in transitions {
            match status {
                ComponentStatus::Healthy => info!(component, "component recovered"),
                ComponentStatus::Degraded => warn!(component, reason = %detail, "component degraded"),
                ComponentStatus::Failed => error!(component, reason = %detail, "component failed"),
                ComponentStatus::Restarting => {}
            }
            self.push_incident(now, component, IncidentKind::Transition, status, detail);
        }

        if self.records.get(component).map(|r| r.status) == Some(ComponentStatus::Failed) {
            self.remediate_or_alert(component, now, cooldown).await;
        }
    }

    async fn remediate_or_alert(&mut self, component: &str, now: DateTime<Utc>, cooldown: chrono::Duration) {
        let Some(rec) = self.records.get(component).cloned() else { return };
        let remediator = self.remediators.get(component).cloned();
        let restart_in_window = rec.last_restart_at.is_some_and(|t| now - t < cooldown);

        if let Some(remediator) = remediator.filter(|_| !restart_in_window) {
            if let Some(r) = self.records.get_mut(component) {
                r.status = ComponentStatus::Restarting;
                r.restart_attempts += 1;
                r.last_restart_at = Some(now);
                r.failures_since_restart = 0;
            }
            info!(component, attempt = rec.restart_attempts + 1, "restarting component");
            self.push_incident(
                now,
                component,
                IncidentKind::Restart,
                ComponentStatus::Restarting,
                rec.last_error.clone().unwrap_or_default(),
            );

            if let Err(e) = remediator.remediate(component).await {
                warn!(component, error = %e, "remediation failed");
                if let Some(r) = self.records.get_mut(component) {
                    r.status = ComponentStatus::Failed;
                    r.failures_since_restart += 1;
                    r.last_error = Some(e.to_string());
                }
                self.push_incident(now, component, IncidentKind::Transition, ComponentStatus::Failed, e.to_string());
            }
            return;
        }

        let escalate = if self.remediators.contains_key(component) {
            rec.failures_since_restart >= 2
        } else {
            true
        };
        let alerted_recently = rec.alerted_at.is_some_and(|t| now - t < cooldown);
        if !escalate || alerted_recently {
            return;
        }

        if let Some(r) = self.records.get_mut(component) {
            r.alerted_at = Some(now);
        }
        let detail = format!(
            "{component} failed: {} (restarts: {})",
            rec.last_error.clone().unwrap_or_else(|| "unknown".into()),
            rec.restart_attempts
        );
        error!(component, restarts = rec.restart_attempts, "escalating alert");
        let incident = self.push_incident(now, component, IncidentKind::Alert, ComponentStatus::Failed, detail);
        for sink in &self.alerts {
            if let Err(e) = sink.alert(&incident).await {
                warn!(component, error = %e, "alert delivery failed");
            }
        }
    }

    fn push_incident(
        &mut self,
        at: DateTime<Utc>,
        component: &str,
        kind: IncidentKind,
        status: ComponentStatus,
        detail: String,
    ) -> Incident {
        let incident = Incident {
            at,
            component: component.to_string(),
            kind,
            status,
            detail,
        };
        self.incidents.push_back(incident.clone());
        while self.incidents.len() > MAX_INCIDENTS {
            self.incidents.pop_front();
        }
        incident
    }

    fn publish_snapshot(&self, now: DateTime<Utc>) {
        let mut snap = self.snapshot.write();
        snap.records = self.records.values().cloned().collect();
        snap.incidents = self.incidents.iter().cloned().collect();
        snap.last_tick = Some(now);
    }
}

// =============================================================================
// Probes
// =============================================================================

/// Orchestrator liveness from its heartbeat.  Stale is soft; twice stale is hard.
pub struct HeartbeatProbe {
    heartbeat: Arc<Heartbeat>,
    stale_after: chrono::Duration,
}

impl HeartbeatProbe {
    pub fn new(heartbeat: Arc<Heartbeat>, stale_secs: u64) -> Self {
        Self {
            heartbeat,
            stale_after: chrono::Duration::seconds(stale_secs as i64),
        }
    }
}

#[async_trait]
impl HealthProbe for HeartbeatProbe {
    fn component(&self) -> &str {
        "orchestrator"
    }

    async fn check(&self) -> ProbeResult {
        let age = Utc::now() - self.heartbeat.last();
        if age >= self.stale_after * 2 {
            ProbeResult::Hard(format!("no heartbeat for {}s", age.num_seconds()))
        } else if age >= self.stale_after {
            ProbeResult::Soft(format!("heartbeat stale ({}s)", age.num_seconds()))
        } else {
            ProbeResult::Ok
        }
    }
}

pub struct DataFeedProbe {
    provider: Arc<dyn MarketDataProvider>,
}

impl DataFeedProbe {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl HealthProbe for DataFeedProbe {
    fn component(&self) -> &str {
        "data_feed"
    }

    async fn check(&self) -> ProbeResult {
        match self.provider.ping().await {
            Ok(()) => ProbeResult::Ok,
            Err(e) => ProbeResult::Soft(e.to_string()),
        }
    }
}

/// Free space on the filesystem holding `path`, via `df -Pk`.
pub struct DiskProbe {
    path: PathBuf,
    min_free_gb: f64,
}

impl DiskProbe {
    pub fn new(path: impl Into<PathBuf>, min_free_gb: f64) -> Self {
        Self {
            path: path.into(),
            min_free_gb,
        }
    }
}

/// Available KiB from POSIX `df -Pk` output.
pub fn parse_df_available(output: &str) -> Option<u64> {
    output.lines().nth(1)?.split_whitespace().nth(3)?.parse().ok()
}

#[async_trait]
impl HealthProbe for DiskProbe {
    fn component(&self) -> &str {
        "disk"
    }

    async fn check(&self) -> ProbeResult {
        let output = match tokio::process::Command::new("df").arg("-Pk").arg(&self.path).output().await {
            Ok(o) if o.status.success() => o,
            Ok(o) => return ProbeResult::Soft(format!("df exited with {}", o.status)),
            Err(e) => return ProbeResult::Soft(format!("df failed: {e}")),
        };
        let text = String::from_utf8_lossy(&output.stdout);
        match parse_df_available(&text) {
            Some(kib) => {
                let free_gb = kib as f64 / (1024.0 * 1024.0);
                if free_gb < self.min_free_gb {
                    ProbeResult::Soft(format!("{free_gb:.1} GB free, below {:.1} GB", self.min_free_gb))
                } else {
                    ProbeResult::Ok
                }
            }
            None => ProbeResult::Soft("could not parse df output".into()),
        }
    }
}

/// Resident memory of this process from `/proc/self/status`.
pub struct MemoryProbe {
    max_rss_mb: f64,
}

impl MemoryProbe {
    pub fn new(max_rss_mb: f64) -> Self {
        Self { max_rss_mb }
    }
}

/// VmRSS in KiB.
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[async_trait]
impl HealthProbe for MemoryProbe {
    fn component(&self) -> &str {
        "memory"
    }

    async fn check(&self) -> ProbeResult {
        let status = match tokio::fs::read_to_string("/proc/self/status").await {
            Ok(s) => s,
            // Not on procfs; nothing to measure.
            Err(_) => return ProbeResult::Ok,
        };
        match parse_vm_rss(&status) {
            Some(kib) => {
                let mb = kib as f64 / 1024.0;
                if mb > self.max_rss_mb {
                    ProbeResult::Soft(format!("rss {mb:.0} MB above {:.0} MB", self.max_rss_mb))
                } else {
                    ProbeResult::Ok
                }
            }
            None => ProbeResult::Soft("VmRSS missing from /proc/self/status".into()),
        }
    }
}

// =============================================================================
// Alert sinks
// =============================================================================

pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, incident: &Incident) -> anyhow::Result<()> {
        error!(component = %incident.component, detail = %incident.detail, "WATCHDOG ALERT");
        Ok(())
    }
}

pub struct WebhookAlertSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { url: url.into(), client })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn alert(&self, incident: &Incident) -> anyhow::Result<()> {
        let resp = self.client.post(&self.url).json(incident).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("alert webhook returned {}", resp.status());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a scripted sequence of results, repeating the last one.
    struct Scripted {
        name: String,
        script: Mutex<VecDeque<ProbeResult>>,
        last: Mutex<ProbeResult>,
    }

    impl Scripted {
        fn new(name: &str, script: Vec<ProbeResult>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script.into()),
                last: Mutex::new(ProbeResult::Ok),
            })
        }

        fn always(name: &str, result: ProbeResult) -> Arc<Self> {
            let s = Self::new(name, Vec::new());
            *s.last.lock() = result;
            s
        }
    }

    #[async_trait]
    impl HealthProbe for Scripted {
        fn component(&self) -> &str {
            &self.name
        }
        async fn check(&self) -> ProbeResult {
            match self.script.lock().pop_front() {
                Some(r) => {
                    *self.last.lock() = r.clone();
                    r
                }
                None => self.last.lock().clone(),
            }
        }
    }

    #[derive(Default)]
    struct CountingRemediator {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Remediator for CountingRemediator {
        async fn remediate(&self, component: &str) -> Result<(), WatchdogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WatchdogError::ComponentFailed {
                    component: component.to_string(),
                    reason: "restart refused".into(),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingAlerts(AtomicU32);

    #[async_trait]
    impl AlertSink for CountingAlerts {
        async fn alert(&self, _: &Incident) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn params() -> WatchdogParams {
        WatchdogParams {
            tick_secs: 30,
            soft_failure_threshold: 3,
            degraded_timeout_secs: 60,
            cooldown_secs: 600,
            ..WatchdogParams::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T14:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn failed_transitions(w: &Watchdog) -> usize {
        w.incidents
            .iter()
            .filter(|i| i.kind == IncidentKind::Transition && i.status == ComponentStatus::Failed)
            .count()
    }

    #[tokio::test]
    async fn soft_failures_degrade_then_fail_once_then_restart_once_before_alert() {
        let probe = Scripted::always("orchestrator", ProbeResult::Soft("stale".into()));
        let remediator = Arc::new(CountingRemediator::default());
        let alerts = Arc::new(CountingAlerts::default());
        let mut w = Watchdog::new(params(), Arc::new(RwLock::new(WatchdogSnapshot::default())))
            .with_probe(probe)
            .with_remediator("orchestrator", remediator.clone())
            .with_alert_sink(alerts.clone());

        let at = |n: i64| t0() + chrono::Duration::seconds(30 * n);

        w.tick_at(at(0)).await;
        w.tick_at(at(1)).await;
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Healthy);
        w.tick_at(at(2)).await;
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Degraded);
        w.tick_at(at(3)).await;
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Degraded);

        // 60s degraded -> failed -> one restart
        w.tick_at(at(4)).await;
        assert_eq!(failed_transitions(&w), 1);
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Restarting);
        assert_eq!(alerts.0.load(Ordering::SeqCst), 0);

        // still failing after the restart: back to failed, no second restart
        w.tick_at(at(5)).await;
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Failed);
        assert_eq!(alerts.0.load(Ordering::SeqCst), 0);

        // second failure in a row after the restart escalates
        w.tick_at(at(6)).await;
        assert_eq!(alerts.0.load(Ordering::SeqCst), 1);
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);

        // inside the cooldown nothing repeats
        for n in 7..15 {
            w.tick_at(at(n)).await;
        }
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(alerts.0.load(Ordering::SeqCst), 1);

        let alert_pos = w.incidents.iter().position(|i| i.kind == IncidentKind::Alert).unwrap();
        let restarts_before: usize = w
            .incidents
            .iter()
            .take(alert_pos)
            .filter(|i| i.kind == IncidentKind::Restart)
            .count();
        assert_eq!(restarts_before, 1);
    }

    #[tokio::test]
    async fn hard_failure_fails_immediately_and_recovers_after_restart() {
        let probe = Scripted::new(
            "orchestrator",
            vec![ProbeResult::Hard("no heartbeat".into()), ProbeResult::Ok],
        );
        let remediator = Arc::new(CountingRemediator::default());
        let mut w = Watchdog::new(params(), Arc::new(RwLock::new(WatchdogSnapshot::default())))
            .with_probe(probe)
            .with_remediator("orchestrator", remediator.clone());

        w.tick_at(t0()).await;
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Restarting);
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);

        w.tick_at(t0() + chrono::Duration::seconds(30)).await;
        let rec = w.records.get("orchestrator").unwrap();
        assert_eq!(rec.status, ComponentStatus::Healthy);
        assert_eq!(rec.consecutive_failures, 0);
        assert_eq!(rec.restart_attempts, 1);
    }

    #[tokio::test]
    async fn failing_remediation_counts_toward_escalation() {
        let probe = Scripted::always("orchestrator", ProbeResult::Hard("down".into()));
        let remediator = Arc::new(CountingRemediator { fail: true, ..Default::default() });
        let alerts = Arc::new(CountingAlerts::default());
        let mut w = Watchdog::new(params(), Arc::new(RwLock::new(WatchdogSnapshot::default())))
            .with_probe(probe)
            .with_remediator("orchestrator", remediator.clone())
            .with_alert_sink(alerts.clone());

        w.tick_at(t0()).await;
        assert_eq!(w.records.get("orchestrator").unwrap().status, ComponentStatus::Failed);
        assert_eq!(alerts.0.load(Ordering::SeqCst), 0);

        w.tick_at(t0() + chrono::Duration::seconds(30)).await;
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(alerts.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restart_allowed_again_after_cooldown() {
        let probe = Scripted::always("orchestrator", ProbeResult::Hard("down".into()));
        let remediator = Arc::new(CountingRemediator::default());
        let mut w = Watchdog::new(params(), Arc::new(RwLock::new(WatchdogSnapshot::default())))
            .with_probe(probe)
            .with_remediator("orchestrator", remediator.clone());

        w.tick_at(t0()).await;
        w.tick_at(t0() + chrono::Duration::seconds(300)).await;
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 1);
        w.tick_at(t0() + chrono::Duration::seconds(600)).await;
        assert_eq!(remediator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn components_without_remediator_alert_on_failure() {
        let probe = Scripted::always("disk", ProbeResult::Hard("full".into()));
        let alerts = Arc::new(CountingAlerts::default());
        let snapshot = Arc::new(RwLock::new(WatchdogSnapshot::default()));
        let mut w = Watchdog::new(params(), Arc::clone(&snapshot))
            .with_probe(probe)
            .with_alert_sink(alerts.clone());

        w.tick_at(t0()).await;
        w.tick_at(t0() + chrono::Duration::seconds(30)).await;
        assert_eq!(alerts.0.load(Ordering::SeqCst), 1);

        let snap = snapshot.read();
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].status, ComponentStatus::Failed);
        assert!(snap.last_tick.is_some());
    }

    #[test]
    fn parses_df_and_proc_status() {
        let df = "Filesystem     1024-blocks      Used Available Capacity Mounted on\n\
                  /dev/sda1        102400000  51200000  51200000      50% /\n";
        assert_eq!(parse_df_available(df), Some(51_200_000));
        assert_eq!(parse_df_available("garbage"), None);

        let status = "Name:\tpipeline\nVmPeak:\t  300000 kB\nVmRSS:\t  123456 kB\n";
        assert_eq!(parse_vm_rss(status), Some(123_456));
        assert_eq!(parse_vm_rss("Name:\tx\n"), None);
    }

    #[tokio::test]
    async fn heartbeat_probe_grades_staleness() {
        let hb = Arc::new(Heartbeat::new());
        assert_eq!(HeartbeatProbe::new(Arc::clone(&hb), 60).check().await, ProbeResult::Ok);
        assert!(matches!(HeartbeatProbe::new(hb, 0).check().await, ProbeResult::Hard(_)));
    }
}
