//! Structured JSON-lines logging for the simulator.
//!
//! Every record carries a run id, a sequence number, a level, a domain and a
//! flat `data` object. Records always go to stdout; when `LOG_DIR` is set they
//! are also appended under `<LOG_DIR>/<run_id>/` so a round can be replayed
//! from its event log.
//!
//! Filtering:
//! - `LOG_LEVEL`   trace | debug | info | warn | error (default info)
//! - `LOG_DOMAINS` comma-separated domain list, or `all`

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// Severity, lowest first. `Trace` carries per-tick market records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

const LEVELS: [Level; 5] = [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error];

impl Level {
    /// Threshold from `LOG_LEVEL`; unknown or unset means `Info`.
    pub fn from_env() -> Self {
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|raw| Self::parse(&raw))
            .unwrap_or(Level::Info)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        LEVELS.into_iter().find(|l| l.as_str().eq_ignore_ascii_case(raw))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// Which part of the simulator a record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,
    Shock,
    Exec,
    Round,
    Feed,
    System,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Shock => "shock",
            Domain::Exec => "exec",
            Domain::Round => "round",
            Domain::Feed => "feed",
            Domain::System => "system",
        }
    }

    /// `filter` is a comma-separated domain list or `all`.
    pub fn enabled_in(&self, filter: &str) -> bool {
        let filter = filter.trim();
        filter == "all" || filter.split(',').any(|d| d.trim() == self.as_str())
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS") {
            Ok(filter) => self.enabled_in(&filter),
            Err(_) => true,
        }
    }
}

static SEQ: AtomicU64 = AtomicU64::new(0);
static SESSION: OnceLock<Session> = OnceLock::new();

/// Process-wide logging state, created on first use.
struct Session {
    run_id: String,
    sinks: Option<Sinks>,
}

/// Per-run files under `<LOG_DIR>/<run_id>/`. Per-tick records go to
/// `trace.jsonl` so `events.jsonl` stays readable.
struct Sinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

impl Sinks {
    fn open(run_id: &str) -> Option<Self> {
        let dir = PathBuf::from(std::env::var("LOG_DIR").ok()?).join(run_id);
        if let Err(err) = create_dir_all(&dir) {
            eprintln!("[log] cannot create {}: {}", dir.display(), err);
            return None;
        }
        let manifest = json!({
            "run_id": run_id,
            "started": timestamp(),
            "pid": process::id(),
        });
        let _ = std::fs::write(dir.join("manifest.json"), manifest.to_string());

        let create = |name: &str| {
            File::create(dir.join(name))
                .map(|f| Mutex::new(BufWriter::new(f)))
                .map_err(|err| eprintln!("[log] cannot create {}: {}", name, err))
                .ok()
        };
        Some(Self { events: create("events.jsonl")?, trace: create("trace.jsonl")? })
    }

    fn write(&self, level: Level, line: &str) {
        let sink = if level <= Level::Debug { &self.trace } else { &self.events };
        if let Ok(mut w) = sink.lock() {
            let _ = writeln!(w, "{}", line).and_then(|_| w.flush());
        }
    }
}

fn session() -> &'static Session {
    SESSION.get_or_init(|| {
        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| {
            format!("r-{}-{}", Utc::now().timestamp_millis(), process::id())
        });
        let sinks = Sinks::open(&run_id);
        Session { run_id, sinks }
    })
}

pub fn run_id() -> &'static str {
    &session().run_id
}

/// RFC3339 with milliseconds, UTC.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Fields promoted out of `data` to the top level of a record.
const TOP_LEVEL: [&str; 3] = ["round_id", "symbol", "msg"];

fn build_record(
    run_id: &str,
    seq: u64,
    level: Level,
    domain: Domain,
    event: &str,
    mut fields: Map<String, Value>,
) -> Value {
    let mut record = Map::new();
    record.insert("ts".into(), json!(timestamp()));
    record.insert("run_id".into(), json!(run_id));
    record.insert("seq".into(), json!(seq));
    record.insert("lvl".into(), json!(level.as_str().to_uppercase()));
    record.insert("domain".into(), json!(domain.as_str()));
    record.insert("event".into(), json!(event));
    for key in TOP_LEVEL {
        if let Some(value) = fields.remove(key) {
            record.insert(key.into(), value);
        }
    }
    record.insert("data".into(), Value::Object(fields));
    Value::Object(record)
}

/// Emit one record to stdout and, when configured, the run's sink files.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let session = session();
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    let line = build_record(&session.run_id, seq, level, domain, event, fields).to_string();
    if let Some(sinks) = &session.sinks {
        sinks.write(level, &line);
    }
    println!("{}", line);
}

pub fn log_shock(direction: i8, impact: f64, ts: f64, ledger_len: usize) {
    log(
        Level::Info,
        Domain::Shock,
        "shock_added",
        obj(&[
            ("direction", json!(direction)),
            ("impact", v_num(impact)),
            ("start_ts", v_num(ts)),
            ("ledger_len", json!(ledger_len)),
        ]),
    );
}

pub fn log_tick(now: f64, mid: f64, drift: f64, sigma: f64, impact: f64) {
    log(
        Level::Trace,
        Domain::Market,
        "tick",
        obj(&[
            ("now", v_num(now)),
            ("mid", v_num(mid)),
            ("drift", v_num(drift)),
            ("sigma", v_num(sigma)),
            ("impact", v_num(impact)),
        ]),
    );
}

pub fn log_fill(side: &str, qty: i64, price: f64, fee: f64, inventory: i64, cash: f64) {
    log(
        Level::Info,
        Domain::Exec,
        "fill",
        obj(&[
            ("side", v_str(side)),
            ("qty", json!(qty)),
            ("price", v_num(price)),
            ("fee", v_num(fee)),
            ("inventory", json!(inventory)),
            ("cash", v_num(cash)),
        ]),
    );
}

pub fn log_feed_error(kind: &str, detail: &str, cursor: i64) {
    log(
        Level::Warn,
        Domain::Feed,
        "feed_error",
        obj(&[
            ("kind", v_str(kind)),
            ("detail", v_str(detail)),
            ("cursor", json!(cursor)),
        ]),
    );
}

pub fn log_round_summary(
    round_id: &str,
    final_pnl: f64,
    risk_cost: f64,
    score: f64,
    injected: u32,
    ended_early: bool,
) {
    log(
        Level::Info,
        Domain::Round,
        "round_summary",
        obj(&[
            ("round_id", v_str(round_id)),
            ("final_pnl", v_num(final_pnl)),
            ("risk_cost", v_num(risk_cost)),
            ("score", v_num(score)),
            ("injected", json!(injected)),
            ("ended_early", json!(ended_early)),
        ]),
    );
}

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("warn"), Some(Level::Warn));
        assert_eq!(Level::parse(" TRACE "), Some(Level::Trace));
        assert_eq!(Level::parse("fatal"), None);
        assert!(Level::Trace < Level::Info && Level::Warn < Level::Error);
    }

    #[test]
    fn test_domain_filter() {
        assert!(Domain::Feed.enabled_in("all"));
        assert!(Domain::Feed.enabled_in("round, feed"));
        assert!(!Domain::Market.enabled_in("round,feed"));
    }

    #[test]
    fn test_record_lifts_round_id_out_of_data() {
        let fields = obj(&[
            ("round_id", v_str("r1")),
            ("symbol", v_str("AMZN")),
            ("mid", v_num(201.5)),
        ]);
        let record = build_record("run-a", 7, Level::Warn, Domain::Round, "status", fields);
        assert_eq!(record["round_id"], "r1");
        assert_eq!(record["symbol"], "AMZN");
        assert_eq!(record["lvl"], "WARN");
        assert_eq!(record["domain"], "round");
        assert_eq!(record["seq"], 7);
        assert_eq!(record["data"]["mid"], 201.5);
        assert!(record["data"].get("round_id").is_none());
    }
}
