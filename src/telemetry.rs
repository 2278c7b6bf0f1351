//! Telemetry sinks. Fire-and-forget from the engine's perspective: a failing sink
//! never affects trading decisions.
//!
//! `JsonlTelemetry` appends one JSON object per line to `session_<timestamp>.jsonl`
//! from a writer task, and writes a session summary (exits per tier, PnL, win rate) on close.

use anyhow::Result;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Fill,
    ProfitLockPlaced,
    ProfitLockFilled,
    ProfitLockCancelled,
    TierTriggered,
    LiquidationAttempt,
    ExitDecision,
    Escalation,
    Exited,
    FillPrecision,
    StaleData,
    Resolution,
    WindowArchived,
    TaskAbandoned,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Fill => "FILL",
            EventKind::ProfitLockPlaced => "PROFIT_LOCK_PLACED",
            EventKind::ProfitLockFilled => "PROFIT_LOCK_FILLED",
            EventKind::ProfitLockCancelled => "PROFIT_LOCK_CANCELLED",
            EventKind::TierTriggered => "TIER_TRIGGERED",
            EventKind::LiquidationAttempt => "LIQUIDATION_ATTEMPT",
            EventKind::ExitDecision => "EXIT_DECISION",
            EventKind::Escalation => "ESCALATION",
            EventKind::Exited => "EXITED",
            EventKind::FillPrecision => "FILL_PRECISION",
            EventKind::StaleData => "STALE_DATA",
            EventKind::Resolution => "RESOLUTION",
            EventKind::WindowArchived => "WINDOW_ARCHIVED",
            EventKind::TaskAbandoned => "TASK_ABANDONED",
        }
    }
}

/// Per-tick state for audit and dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct TickSnapshot {
    pub window: String,
    pub timestamp_ms: u64,
    pub remaining_secs: u64,
    pub side: Option<String>,
    pub own_bid: Option<Decimal>,
    pub own_ask: Option<Decimal>,
    pub opposing_ask: Option<Decimal>,
    pub trusted_shares: Option<Decimal>,
    pub sold_shares: Option<Decimal>,
    pub danger_score: Option<Decimal>,
    pub exit_state: Option<String>,
    pub stale: bool,
}

pub trait TelemetrySink: Send + Sync {
    fn append_event(&self, kind: EventKind, payload: serde_json::Value);
    fn append_tick(&self, tick: &TickSnapshot);
}

pub type SharedTelemetry = Arc<dyn TelemetrySink>;

/// Logs events through `tracing` only.
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn append_event(&self, kind: EventKind, payload: serde_json::Value) {
        tracing::info!(event = kind.as_str(), %payload, "telemetry");
    }

    fn append_tick(&self, tick: &TickSnapshot) {
        tracing::debug!(
            window = %tick.window,
            remaining = tick.remaining_secs,
            own_bid = ?tick.own_bid,
            opposing_ask = ?tick.opposing_ask,
            danger = ?tick.danger_score,
            state = ?tick.exit_state,
            "tick"
        );
    }
}

/// Keeps everything in memory. Useful for embedding and tests.
#[derive(Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<(EventKind, serde_json::Value)>>,
    ticks: Mutex<Vec<TickSnapshot>>,
}

impl MemoryTelemetry {
    pub fn events(&self) -> Vec<(EventKind, serde_json::Value)> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn tick_count(&self) -> usize {
        self.ticks.lock().len()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn append_event(&self, kind: EventKind, payload: serde_json::Value) {
        self.events.lock().push((kind, payload));
    }

    fn append_tick(&self, tick: &TickSnapshot) {
        self.ticks.lock().push(tick.clone());
    }
}

enum LogLine {
    Event(EventKind, serde_json::Value),
    Tick(TickSnapshot),
    Summary,
}

/// Session counters, updated by the writer task.
#[derive(Debug, Default)]
struct SessionStats {
    exits_by_tier: HashMap<String, u32>,
    exited_positions: u32,
    total_pnl: Decimal,
    resolved_wins: u32,
    resolved_losses: u32,
}

impl SessionStats {
    fn observe(&mut self, kind: EventKind, payload: &serde_json::Value) {
        match kind {
            EventKind::ExitDecision => {
                if let Some(tier) = payload.get("tier").and_then(|t| t.as_str()) {
                    *self.exits_by_tier.entry(tier.to_string()).or_default() += 1;
                }
                self.total_pnl += decimal_field(payload, "pnl_delta");
            }
            EventKind::Exited => self.exited_positions += 1,
            EventKind::Resolution => {
                match payload.get("won").and_then(|w| w.as_bool()) {
                    Some(true) => self.resolved_wins += 1,
                    Some(false) => self.resolved_losses += 1,
                    None => {}
                }
                self.total_pnl += decimal_field(payload, "hold_pnl");
            }
            _ => {}
        }
    }
}

fn decimal_field(payload: &serde_json::Value, key: &str) -> Decimal {
    match payload.get(key) {
        Some(serde_json::Value::String(s)) => Decimal::from_str(s).unwrap_or_default(),
        Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

/// JSONL session log written by a background task.
pub struct JsonlTelemetry {
    tx: mpsc::UnboundedSender<LogLine>,
    path: PathBuf,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl JsonlTelemetry {
    /// Create `dir` if missing and open `session_YYYY-MM-DDTHH-MM-SS.jsonl`. Must run inside a tokio runtime.
    pub fn new(session_start_ms: u64, dir: &str) -> Result<Self> {
        let path = Path::new(dir);
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        let stamp = {
            let secs = (session_start_ms / 1000) as i64;
            let nanos = ((session_start_ms % 1000) * 1_000_000) as u32;
            chrono::DateTime::from_timestamp(secs, nanos)
                .map(|dt| dt.format("%Y-%m-%dT%H-%M-%S").to_string())
                .unwrap_or_else(|| session_start_ms.to_string())
        };
        let filename = path.join(format!("session_{}.jsonl", stamp));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&filename)?;
        tracing::info!(path = %filename.display(), "session log opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(writer_loop(file, rx, session_start_ms));
        Ok(Self {
            tx,
            path: filename,
            join: Some(join),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the session summary and wait for the writer to drain.
    pub async fn close(mut self) {
        let _ = self.tx.send(LogLine::Summary);
        let join = self.join.take();
        drop(self);
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

impl TelemetrySink for JsonlTelemetry {
    fn append_event(&self, kind: EventKind, payload: serde_json::Value) {
        if self.tx.send(LogLine::Event(kind, payload)).is_err() {
            tracing::debug!(event = kind.as_str(), "session log closed, event dropped");
        }
    }

    fn append_tick(&self, tick: &TickSnapshot) {
        let _ = self.tx.send(LogLine::Tick(tick.clone()));
    }
}

async fn writer_loop(
    mut file: File,
    mut rx: mpsc::UnboundedReceiver<LogLine>,
    session_start_ms: u64,
) {
    let mut stats = SessionStats::default();
    let mut summary_written = false;
    while let Some(line) = rx.recv().await {
        let obj = match line {
            LogLine::Event(kind, payload) => {
                stats.observe(kind, &payload);
                serde_json::json!({
                    "event": kind.as_str(),
                    "ts_ms": now_ms(),
                    "payload": payload,
                })
            }
            LogLine::Tick(tick) => serde_json::json!({
                "event": "TICK",
                "tick": tick,
            }),
            LogLine::Summary => {
                if summary_written {
                    continue;
                }
                summary_written = true;
                summary_json(&stats, session_start_ms)
            }
        };
        if let Err(e) = write_line(&mut file, &obj) {
            tracing::warn!(?e, "session log write failed");
        }
    }
}

fn summary_json(stats: &SessionStats, session_start_ms: u64) -> serde_json::Value {
    let end_ms = now_ms();
    let graded = stats.resolved_wins + stats.resolved_losses;
    let win_rate = if graded > 0 {
        serde_json::json!(stats.resolved_wins as f64 / graded as f64)
    } else {
        serde_json::Value::Null
    };
    serde_json::json!({
        "event": "SESSION_SUMMARY",
        "session_start_ms": session_start_ms,
        "session_end_ms": end_ms,
        "session_duration_sec": end_ms.saturating_sub(session_start_ms) / 1000,
        "exits_by_tier": stats.exits_by_tier,
        "exited_positions": stats.exited_positions,
        "resolved_wins": stats.resolved_wins,
        "resolved_losses": stats.resolved_losses,
        "win_rate": win_rate,
        "total_pnl_usd": stats.total_pnl.to_string(),
    })
}

fn write_line(file: &mut File, obj: &serde_json::Value) -> Result<()> {
    let line = serde_json::to_string(obj)?;
    writeln!(file, "{}", line)?;
    file.flush()?;
    Ok(())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
