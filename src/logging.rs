//! Structured JSON-lines logging for both sides of the bridge.
//!
//! Every record is a single JSON object on stdout and in the run directory
//! (`$LOG_DIR/$RUN_ID/events.jsonl`, trace/debug in `trace.jsonl`).
//! Records carry a process-wide sequence number so interleaved output from
//! the environment loop and the command listener can be re-ordered.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Wire,   // Datagrams in and out
    Env,    // Environment loop, predictions, commands
    Agent,  // Perception intake, derivations, effectors
    Babble, // Fallback action selection
    Feed,   // Bar fetching, cache, live stream
    System, // Startup, shutdown, summaries
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Wire => "wire",
            Domain::Env => "env",
            Domain::Agent => "agent",
            Domain::Babble => "babble",
            Domain::Feed => "feed",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        // A missing log file degrades to stdout-only logging.
        let open = |name: &str| match File::create(run_dir.join(name)) {
            Ok(f) => Some(Mutex::new(BufWriter::new(f))),
            Err(err) => {
                eprintln!("[log] failed to create {}: {}", name, err);
                None
            }
        };

        RunContext {
            events: open("events.jsonl"),
            trace: open("trace.jsonl"),
            run_id,
        }
    })
}

pub fn run_id() -> &'static str {
    &ensure_run_context().run_id
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in [
        "api_key",
        "secret_key",
        "APCA-API-KEY-ID",
        "APCA-API-SECRET-KEY",
        "key",
        "secret",
    ] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["side", "peer", "symbol", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_datagram(direction: &str, peer: &str, len: usize, payload: &str) {
    agg_increment(direction);
    log(
        Level::Trace,
        Domain::Wire,
        direction,
        obj(&[
            ("peer", v_str(peer)),
            ("len", json!(len)),
            ("payload", v_str(payload)),
        ]),
    );
}

pub fn log_command(token: &str, predicted: f64, augment: f64) {
    agg_increment("command");
    log(
        Level::Info,
        Domain::Env,
        "command_applied",
        obj(&[
            ("token", v_str(token)),
            ("predicted", v_num(predicted)),
            ("augment", v_num(augment)),
        ]),
    );
}

pub fn log_feedback(predicted: f64, observed: f64, intent: &str, frequency: f64) {
    log(
        Level::Debug,
        Domain::Env,
        "feedback",
        obj(&[
            ("predicted", v_num(predicted)),
            ("observed", v_num(observed)),
            ("intent", v_str(intent)),
            ("frequency", v_num(frequency)),
        ]),
    );
}

pub fn log_transition(from: &str, to: &str) {
    log(
        Level::Debug,
        Domain::Agent,
        "transition",
        obj(&[("from", v_str(from)), ("to", v_str(to))]),
    );
}

pub fn log_babble(token: Option<&str>, remaining: u32) {
    if token.is_some() {
        agg_increment("babble");
    }
    log(
        Level::Debug,
        Domain::Babble,
        "babble",
        obj(&[
            ("token", token.map(v_str).unwrap_or(Value::Null)),
            ("remaining", json!(remaining)),
        ]),
    );
}

pub fn log_decode_error(side: &str, text: &str, err: &str) {
    agg_increment("decode_error");
    log(
        Level::Warn,
        Domain::Wire,
        "decode_error",
        obj(&[
            ("side", v_str(side)),
            ("text", v_str(text)),
            ("error", v_str(err)),
        ]),
    );
}

/// Session summary on shutdown
pub fn log_session_summary(side: &str, duration_secs: f64, fields: &[(&str, Value)]) {
    let mut data = obj(fields);
    data.insert("side".to_string(), v_str(side));
    data.insert("duration_secs".to_string(), v_num(duration_secs));
    log(Level::Info, Domain::System, "session_summary", data);
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Counter Aggregator for Periodic Summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub sent: u64,
    pub received: u64,
    pub commands: u64,
    pub babbles: u64,
    pub decode_errors: u64,
}

struct LogAggregator {
    counters: Counters,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self {
            counters: Counters::default(),
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    fn increment(&mut self, event: &str) {
        let c = &mut self.counters;
        match event {
            "send" => c.sent += 1,
            "recv" => c.received += 1,
            "command" => c.commands += 1,
            "babble" => c.babbles += 1,
            "decode_error" => c.decode_errors += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<Counters> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            let result = std::mem::take(&mut self.counters);
            self.last_flush = Instant::now();
            Some(result)
        } else {
            None
        }
    }
}

/// Call periodically to emit aggregated stats
pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some(c) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "aggregated_stats",
                obj(&[
                    ("sent", json!(c.sent)),
                    ("received", json!(c.received)),
                    ("commands", json!(c.commands)),
                    ("babbles", json!(c.babbles)),
                    ("decode_errors", json!(c.decode_errors)),
                ]),
            );
        }
    }
}

/// Increment a counter in the aggregator
pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}
