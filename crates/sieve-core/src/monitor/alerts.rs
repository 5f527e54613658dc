//! Threshold alerts with cooldown and pluggable delivery.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_common::{Error, Result, Timestamp};
use sieve_config::settings::{AlertSettings, Comparison, TransportSettings};
use tracing::{info, warn};

use super::collector::SystemSnapshot;
use crate::logging::event_names;

const MAX_ACTIVE: usize = 256;
const MAX_HISTORY: usize = 1_000;

/// Rule name installed when no configured rule watches `failed_sinks`.
pub const SINK_FAILURE_ALERT: &str = "sink_failure";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub name: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub comparison: Comparison,
    pub fired_at: Timestamp,
    pub delivered: bool,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<Timestamp>,
}

impl Alert {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} = {:.2} ({:?} {:.2})",
            self.name, self.metric, self.value, self.comparison, self.threshold
        )
    }
}

pub trait AlertTransport: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Emits the alert as a structured log line.
#[derive(Debug, Default)]
pub struct LogTransport;

impl AlertTransport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        warn!(
            target: event_names::ALERT_FIRED,
            alert_id = %alert.id,
            alert = %alert.name,
            metric = %alert.metric,
            value = alert.value,
            threshold = alert.threshold,
            "{}",
            alert.summary()
        );
        Ok(())
    }
}

/// POSTs the alert as JSON.
#[derive(Debug)]
pub struct WebhookTransport {
    url: String,
    agent: ureq::Agent,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl AlertTransport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        self.agent
            .post(&self.url)
            .send_json(alert)
            .map(|_| ())
            .map_err(|e| Error::SinkTransient {
                sink: "webhook".to_string(),
                message: e.to_string(),
            })
    }
}

/// Pipes a plain-text mail into a sendmail-compatible binary.
#[derive(Debug)]
pub struct EmailTransport {
    to: Vec<String>,
    from: String,
    sendmail_path: PathBuf,
}

impl EmailTransport {
    pub fn new(
        to: Vec<String>,
        from: impl Into<String>,
        sendmail_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            to,
            from: from.into(),
            sendmail_path: sendmail_path.into(),
        }
    }

    fn render(&self, alert: &Alert) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: [sieve] alert {}\r\n\r\n{}\r\nfired at {}\r\nid {}\r\n",
            self.from,
            self.to.join(", "),
            alert.name,
            alert.summary(),
            alert.fired_at,
            alert.id
        )
    }

    fn failure(message: impl Into<String>) -> Error {
        Error::SinkTransient {
            sink: "email".to_string(),
            message: message.into(),
        }
    }
}

impl AlertTransport for EmailTransport {
    fn name(&self) -> &str {
        "email"
    }

    fn deliver(&self, alert: &Alert) -> Result<()> {
        if self.to.is_empty() {
            return Err(Self::failure("no recipients"));
        }
        let mut child = Command::new(&self.sendmail_path)
            .arg("-f")
            .arg(&self.from)
            .args(&self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Self::failure(format!("{}: {}", self.sendmail_path.display(), e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.render(alert).as_bytes())
                .map_err(|e| Self::failure(e.to_string()))?;
        }
        let status = child.wait().map_err(|e| Self::failure(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(Self::failure(format!("sendmail exited with {}", status)))
        }
    }
}

pub fn transport_for(settings: &TransportSettings) -> Arc<dyn AlertTransport> {
    match settings {
        TransportSettings::Log => Arc::new(LogTransport),
        TransportSettings::Webhook { url, timeout_ms } => {
            Arc::new(WebhookTransport::new(url, Duration::from_millis(*timeout_ms)))
        }
        TransportSettings::Email {
            to,
            from,
            sendmail_path,
        } => Arc::new(EmailTransport::new(to.clone(), from, sendmail_path)),
    }
}

struct AlertRule {
    settings: AlertSettings,
    transport: Arc<dyn AlertTransport>,
    last_fired: Option<Timestamp>,
}

#[derive(Default)]
struct AlertState {
    rules: BTreeMap<String, AlertRule>,
    active: VecDeque<Alert>,
    history: VecDeque<Alert>,
    next_id: u64,
    delivered: u64,
    failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounts {
    pub rules: usize,
    pub active: usize,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Default)]
pub struct AlertManager {
    state: Mutex<AlertState>,
}

impl AlertManager {
    pub fn new(rules: &BTreeMap<String, AlertSettings>) -> Self {
        let manager = Self::default();
        manager.configure(rules);
        manager
    }

    /// Replace the rule set. Cooldowns carry over for rules that keep their
    /// name.
    pub fn configure(&self, rules: &BTreeMap<String, AlertSettings>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = BTreeMap::new();
        for (name, settings) in rules {
            let last_fired = state.rules.get(name).and_then(|r| r.last_fired);
            next.insert(
                name.clone(),
                AlertRule {
                    settings: settings.clone(),
                    transport: transport_for(&settings.transport),
                    last_fired,
                },
            );
        }
        if !next.values().any(|r| r.settings.metric == "failed_sinks") {
            let last_fired = state
                .rules
                .get(SINK_FAILURE_ALERT)
                .and_then(|r| r.last_fired);
            next.insert(
                SINK_FAILURE_ALERT.to_string(),
                AlertRule {
                    settings: AlertSettings {
                        metric: "failed_sinks".to_string(),
                        threshold: 0.0,
                        comparison: Comparison::Gt,
                        cooldown_seconds: 300,
                        transport: TransportSettings::Log,
                    },
                    transport: Arc::new(LogTransport),
                    last_fired,
                },
            );
        }
        state.rules = next;
    }

    /// Route one rule's deliveries through `transport` instead of the
    /// configured one.
    pub fn set_transport(&self, name: &str, transport: Arc<dyn AlertTransport>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let rule = state
            .rules
            .get_mut(name)
            .ok_or_else(|| Error::not_found("alert", name))?;
        rule.transport = transport;
        Ok(())
    }

    /// Fire every rule whose comparison holds and whose cooldown has
    /// elapsed. Deliveries happen after the state lock is released.
    pub fn evaluate(&self, snapshot: &SystemSnapshot, now: Timestamp) -> Vec<Alert> {
        let mut pending = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let mut fired = Vec::new();
            for (name, rule) in state.rules.iter_mut() {
                let Some(value) = snapshot.metric(&rule.settings.metric) else {
                    continue;
                };
                if !rule.settings.comparison.holds(value, rule.settings.threshold) {
                    continue;
                }
                let cooled = rule.last_fired.map_or(true, |last| {
                    last.millis_until(now) >= rule.settings.cooldown_seconds.saturating_mul(1_000)
                });
                if !cooled {
                    continue;
                }
                rule.last_fired = Some(now);
                fired.push((
                    name.clone(),
                    rule.settings.clone(),
                    Arc::clone(&rule.transport),
                    value,
                ));
            }
            for (name, settings, transport, value) in fired {
                state.next_id += 1;
                let alert = Alert {
                    id: format!("alert-{}", state.next_id),
                    name,
                    metric: settings.metric,
                    value,
                    threshold: settings.threshold,
                    comparison: settings.comparison,
                    fired_at: now,
                    delivered: false,
                    acknowledged: false,
                    acknowledged_at: None,
                };
                pending.push((alert, transport));
            }
        }

        let mut out = Vec::with_capacity(pending.len());
        for (mut alert, transport) in pending {
            match transport.deliver(&alert) {
                Ok(()) => alert.delivered = true,
                Err(e) => warn!(
                    target: event_names::ALERT_DELIVERY_FAILED,
                    alert_id = %alert.id,
                    transport = transport.name(),
                    error = %e,
                    "alert delivery failed"
                ),
            }
            out.push(alert);
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for alert in &out {
            if alert.delivered {
                state.delivered += 1;
            } else {
                state.failed += 1;
            }
            if state.active.len() == MAX_ACTIVE {
                state.active.pop_front();
            }
            state.active.push_back(alert.clone());
            if state.history.len() == MAX_HISTORY {
                state.history.pop_front();
            }
            state.history.push_back(alert.clone());
        }
        out
    }

    pub fn acknowledge(&self, id: &str, now: Timestamp) -> Result<Alert> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let position = state
            .active
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| Error::not_found("alert", id))?;
        let mut alert = state
            .active
            .remove(position)
            .ok_or_else(|| Error::invariant("active alert vanished"))?;
        alert.acknowledged = true;
        alert.acknowledged_at = Some(now);
        if let Some(h) = state.history.iter_mut().find(|a| a.id == id) {
            h.acknowledged = true;
            h.acknowledged_at = Some(now);
        }
        info!(
            target: event_names::ALERT_ACKNOWLEDGED,
            alert_id = %alert.id,
            alert = %alert.name,
            "alert acknowledged"
        );
        Ok(alert)
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
            .iter()
            .cloned()
            .collect()
    }

    pub fn history(&self, n: usize) -> Vec<Alert> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn counts(&self) -> AlertCounts {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        AlertCounts {
            rules: state.rules.len(),
            active: state.active.len(),
            delivered: state.delivered,
            failed: state.failed,
        }
    }
}
