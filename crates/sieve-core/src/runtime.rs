//! Runtime state handoff between a running host and the CLI.
//!
//! A host (`sieve run`) owns the [`Sieve`] and periodically writes files
//! into its data directory:
//!
//! - `state.json`: the latest [`StatusReport`], written atomically
//! - `metrics.jsonl`: every collected [`SystemSnapshot`], appended
//!
//! Operator commands travel the other way. The CLI appends a
//! [`ControlRequest`] line to `control.jsonl`; the host executes it and
//! appends a [`ControlResult`] with the same id to `control-results.jsonl`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sieve_common::{Error, Importance, MessageType, QueueKey, Result, Timestamp};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::drain::DrainReport;
use crate::exit_codes::ExitCode;
use crate::logging::event_names;
use crate::monitor::SystemSnapshot;
use crate::system::{Sieve, StatusReport};

pub const STATE_FILE: &str = "state.json";
pub const METRICS_FILE: &str = "metrics.jsonl";
pub const CONTROL_FILE: &str = "control.jsonl";
pub const RESULTS_FILE: &str = "control-results.jsonl";

const RESULT_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    Drain { queue: QueueKey, count: usize },
    SetThreshold { min: Importance },
    AcknowledgeAlert { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: Uuid,
    pub issued_at: DateTime<Utc>,
    #[serde(flatten)]
    pub command: ControlCommand,
}

impl ControlRequest {
    pub fn new(command: ControlCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            issued_at: Utc::now(),
            command,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResult {
    pub id: Uuid,
    pub ok: bool,
    pub exit_code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ControlResult {
    fn success(id: Uuid, message: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            ok: true,
            exit_code: ExitCode::Success.as_i32(),
            message: message.into(),
            data: Some(data),
        }
    }

    fn failure(id: Uuid, err: &Error) -> Self {
        Self {
            id,
            ok: false,
            exit_code: ExitCode::for_error(err).as_i32(),
            message: err.to_string(),
            data: None,
        }
    }
}

/// Contents of `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub pid: u32,
    pub running: bool,
    pub updated_at: DateTime<Utc>,
    pub status: StatusReport,
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// The handoff files under one data directory.
#[derive(Debug, Clone)]
pub struct RuntimeDir {
    root: PathBuf,
}

impl RuntimeDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.root.join(METRICS_FILE)
    }

    pub fn control_path(&self) -> PathBuf {
        self.root.join(CONTROL_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.root.join(RESULTS_FILE)
    }

    pub fn write_state(&self, state: &RuntimeState) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.state_path();
        let tmp = path.with_file_name(format!("{}.tmp.{}", STATE_FILE, std::process::id()));
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, state)?;
            file.write_all(b"\n")?;
            let _ = file.sync_all();
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read_state(&self) -> Result<RuntimeState> {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("runtime state", path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn append_metrics(&self, samples: &[SystemSnapshot]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut file = self.append_handle(&self.metrics_path())?;
        for s in samples {
            writeln!(file, "{}", serde_json::to_string(s)?)?;
        }
        Ok(())
    }

    /// Snapshots at or after `from`. Unparseable lines are skipped.
    pub fn read_metrics(&self, from: Timestamp) -> Result<Vec<SystemSnapshot>> {
        let file = match File::open(self.metrics_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match serde_json::from_str::<SystemSnapshot>(&line) {
                Ok(s) if s.timestamp >= from => out.push(s),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "skipping malformed metrics line"),
            }
        }
        Ok(out)
    }

    pub fn submit_command(&self, command: ControlCommand) -> Result<ControlRequest> {
        let request = ControlRequest::new(command);
        let mut file = self.append_handle(&self.control_path())?;
        writeln!(file, "{}", serde_json::to_string(&request)?)?;
        Ok(request)
    }

    /// Poll the results file for `id` until `timeout`.
    pub fn wait_for_result(&self, id: Uuid, timeout: Duration) -> Result<Option<ControlResult>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.find_result(id)? {
                return Ok(Some(found));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(RESULT_POLL);
        }
    }

    fn find_result(&self, id: Uuid) -> Result<Option<ControlResult>> {
        let file = match File::open(self.results_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for line in BufReader::new(file).lines() {
            if let Ok(result) = serde_json::from_str::<ControlResult>(&line?) {
                if result.id == id {
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }

    /// Complete command lines after `offset`. Advances `offset` past every
    /// line consumed; a trailing line without a newline is left for later.
    pub fn read_commands(&self, offset: &mut u64) -> Result<Vec<ControlRequest>> {
        let mut file = match File::open(self.control_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(*offset))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;

        let mut out = Vec::new();
        let mut consumed = 0usize;
        for line in buf.split_inclusive('\n') {
            if !line.ends_with('\n') {
                break;
            }
            consumed += line.len();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ControlRequest>(trimmed) {
                Ok(req) => out.push(req),
                Err(e) => warn!(error = %e, "ignoring malformed control command"),
            }
        }
        *offset += consumed as u64;
        Ok(out)
    }

    pub fn write_result(&self, result: &ControlResult) -> Result<()> {
        let mut file = self.append_handle(&self.results_path())?;
        writeln!(file, "{}", serde_json::to_string(result)?)?;
        Ok(())
    }

    fn control_len(&self) -> u64 {
        fs::metadata(self.control_path()).map_or(0, |m| m.len())
    }

    fn append_handle(&self, path: &Path) -> Result<File> {
        fs::create_dir_all(&self.root)?;
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

// ---------------------------------------------------------------------------
// Command execution
// ---------------------------------------------------------------------------

pub fn execute(sieve: &Sieve, request: &ControlRequest) -> ControlResult {
    let id = request.id;
    match &request.command {
        ControlCommand::Drain { queue, count } => match sieve.drain_queue(queue, *count) {
            Ok((entries, report)) => ControlResult::success(
                id,
                format!("drained {} from {}", report.drained, queue),
                json!({ "queue": queue.to_string(), "entries": entries, "report": report }),
            ),
            Err(e) => ControlResult::failure(id, &e),
        },
        ControlCommand::SetThreshold { min } => {
            let changed = sieve.set_threshold(*min);
            ControlResult::success(
                id,
                format!("threshold set to {}", min),
                json!({ "min_importance_threshold": min, "changed": changed }),
            )
        }
        ControlCommand::AcknowledgeAlert { id: alert_id } => {
            match sieve.acknowledge_alert(alert_id) {
                Ok(alert) => ControlResult::success(
                    id,
                    format!("acknowledged {}", alert_id),
                    json!({ "alert": alert }),
                ),
                Err(e) => ControlResult::failure(id, &e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input lines
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLine {
    pub message_type: MessageType,
    pub application: String,
    pub component: String,
    pub function: String,
    pub payload: String,
}

#[derive(Deserialize)]
struct JsonInput {
    #[serde(rename = "type", default)]
    message_type: Option<String>,
    #[serde(default)]
    application: Option<String>,
    #[serde(default)]
    component: String,
    #[serde(default)]
    function: String,
    message: String,
}

/// Parse one stdin line.
///
/// A JSON object uses keys `type`, `application`, `component`, `function`
/// and `message`. Anything else is read as `TYPE APPLICATION MESSAGE...`;
/// a line whose first word is not a message type becomes an INFO message
/// from `default_app`.
pub fn parse_input_line(line: &str, default_app: &str) -> Option<InputLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        let raw: JsonInput = serde_json::from_str(line).ok()?;
        let message_type = match raw.message_type {
            Some(t) => t.parse().ok()?,
            None => MessageType::Info,
        };
        return Some(InputLine {
            message_type,
            application: raw
                .application
                .unwrap_or_else(|| default_app.to_string()),
            component: raw.component,
            function: raw.function,
            payload: raw.message,
        });
    }

    let mut words = line.splitn(3, char::is_whitespace);
    let first = words.next().unwrap_or_default();
    match first.parse::<MessageType>() {
        Ok(message_type) => {
            let application = words.next().unwrap_or(default_app).to_string();
            let payload = words.next().unwrap_or_default().trim().to_string();
            Some(InputLine {
                message_type,
                application,
                component: String::new(),
                function: String::new(),
                payload,
            })
        }
        Err(_) => Some(InputLine {
            message_type: MessageType::Info,
            application: default_app.to_string(),
            component: String::new(),
            function: String::new(),
            payload: line.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Host loop
// ---------------------------------------------------------------------------

/// Publishes state and serves control commands for one [`Sieve`].
pub struct Host {
    sieve: Arc<Sieve>,
    dir: RuntimeDir,
    control_offset: u64,
    last_sample: Option<Timestamp>,
}

impl Host {
    /// Commands already in `control.jsonl` when the host starts are stale and
    /// skipped.
    pub fn new(sieve: Arc<Sieve>, dir: RuntimeDir) -> Self {
        let control_offset = dir.control_len();
        Self {
            sieve,
            dir,
            control_offset,
            last_sample: None,
        }
    }

    pub fn dir(&self) -> &RuntimeDir {
        &self.dir
    }

    /// Serve pending commands, append new samples, refresh `state.json`.
    pub fn step(&mut self, running: bool) -> Result<usize> {
        let requests = self.dir.read_commands(&mut self.control_offset)?;
        let served = requests.len();
        for request in &requests {
            let result = execute(&self.sieve, request);
            info!(
                request_id = %request.id,
                ok = result.ok,
                exit_code = result.exit_code,
                "control command served"
            );
            self.dir.write_result(&result)?;
        }

        let from = self
            .last_sample
            .map_or(Timestamp::from_millis(0), |t| Timestamp::from_micros(t.as_micros() + 1));
        let fresh = self.sieve.monitor().history().since(from);
        if let Some(last) = fresh.last() {
            self.last_sample = Some(last.timestamp);
        }
        self.dir.append_metrics(&fresh)?;

        self.dir.write_state(&RuntimeState {
            pid: std::process::id(),
            running,
            updated_at: Utc::now(),
            status: self.sieve.status(),
        })?;
        Ok(served)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HostSummary {
    pub ingested: u64,
    pub rejected: u64,
    pub unparsed: u64,
    pub commands: u64,
    pub shutdown: DrainReport,
}

/// Host `sieve` until `input` reaches EOF or `shutdown` is set.
pub fn run_host<R: BufRead + Send + 'static>(
    sieve: Arc<Sieve>,
    dir: RuntimeDir,
    input: R,
    default_app: &str,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<HostSummary> {
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("sieve-stdin".to_string())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    sieve.start()?;
    let mut host = Host::new(Arc::clone(&sieve), dir);
    let mut summary = HostSummary::default();
    host.step(true)?;
    let mut last_step = Instant::now();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let wait = interval.saturating_sub(last_step.elapsed());
        match rx.recv_timeout(wait) {
            Ok(line) => match parse_input_line(&line, default_app) {
                Some(input) => {
                    let submitted = sieve.log(
                        input.message_type,
                        &input.application,
                        &input.component,
                        &input.function,
                        &input.payload,
                    );
                    match submitted {
                        Ok(_) => summary.ingested += 1,
                        Err(e) => {
                            summary.rejected += 1;
                            debug!(
                                target: event_names::QUEUE_FULL,
                                error = %e,
                                "input line rejected"
                            );
                        }
                    }
                }
                None => summary.unparsed += 1,
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        if last_step.elapsed() >= interval {
            summary.commands += host.step(true)? as u64;
            last_step = Instant::now();
        }
    }

    summary.commands += host.step(true)? as u64;
    summary.shutdown = sieve.shutdown();
    host.step(false)?;
    Ok(summary)
}
