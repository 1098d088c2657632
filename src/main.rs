//! Interactive loop: one simulated symbol, stdin commands, paced ticks.
//!
//! `GAME_MODE=round` (default) plays scored rounds; `GAME_MODE=stream` applies
//! news as it lands with no round clock. `q`, end of input and Ctrl-C all
//! flatten the player before exiting.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration, MissedTickBehavior};

use shockfx::candles::CandleBuilder;
use shockfx::logging::{self, log, obj, v_num, v_str, Domain, Level};
use shockfx::round::RoundSummary;
use shockfx::storage::RoundStore;
use shockfx::{
    Config, GameMode, MemoryFeed, NewsFeed, NewsItem, RoundController, RoundPhase, SeededNoise,
    SimError, SqliteFeed, StreamController,
};

const HELP: &str = "b=buy 1  B=buy 10  s=sell 1  S=sell 10  f=flatten  n=new round  q=quit";
const STREAM_HELP: &str = "b=buy 1  B=buy 10  s=sell 1  S=sell 10  f=flatten  q=quit";

type Controller = RoundController<Box<dyn NewsFeed + Send>>;
type Streamer = StreamController<Box<dyn NewsFeed + Send>>;

fn load_config() -> Result<Config> {
    let cfg = match std::env::var("SHOCK_CONFIG") {
        Ok(path) => Config::from_json_file(Path::new(&path))
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => Config::from_env(),
    };
    cfg.validate()?;
    Ok(cfg)
}

fn open_feed(cfg: &Config) -> Result<Box<dyn NewsFeed + Send>> {
    if let Some(path) = &cfg.news_db_path {
        let feed = SqliteFeed::open(path, &cfg.symbol)
            .with_context(|| format!("opening news store {}", path))?;
        log(
            Level::Info,
            Domain::Feed,
            "feed_open",
            obj(&[("kind", v_str("sqlite")), ("path", v_str(path)), ("symbol_id", json!(feed.symbol_id()))]),
        );
        return Ok(Box::new(feed));
    }
    if let Ok(path) = std::env::var("NEWS_JSONL") {
        let feed = MemoryFeed::from_jsonl(Path::new(&path))?;
        log(
            Level::Info,
            Domain::Feed,
            "feed_open",
            obj(&[("kind", v_str("jsonl")), ("path", v_str(&path)), ("items", json!(feed.len()))]),
        );
        return Ok(Box::new(feed));
    }
    log(Level::Warn, Domain::Feed, "feed_open", obj(&[("kind", v_str("empty"))]));
    Ok(Box::new(MemoryFeed::default()))
}

fn open_store(cfg: &Config) -> Result<Option<RoundStore>> {
    match &cfg.rounds_db_path {
        Some(path) => {
            let mut store = RoundStore::new(path)?;
            store.init()?;
            Ok(Some(store))
        }
        None => Ok(None),
    }
}

fn archive(store: &mut Option<RoundStore>, summary: &RoundSummary) {
    println!(
        "ROUND OVER  pnl={:+.2}  risk={:.2}  score={:+.2}  news={}{}",
        summary.final_pnl,
        summary.risk_cost,
        summary.score,
        summary.injected,
        if summary.ended_early { "  (aborted)" } else { "" }
    );
    if let Some(store) = store {
        if let Err(e) = store.persist_round(summary) {
            log(
                Level::Error,
                Domain::System,
                "archive_failed",
                obj(&[("round_id", v_str(&summary.round_id)), ("error", v_str(&e.to_string()))]),
            );
        }
    }
}

fn print_status(rc: &Controller, candles: &CandleBuilder, now: f64) {
    let q = rc.quotes(now);
    let mut fields = obj(&[
        ("round_id", v_str(&rc.round().round_id)),
        ("t_left", v_num(rc.time_left(now))),
        ("mid", v_num(rc.mid())),
        ("bid", v_num(q.bid)),
        ("ask", v_num(q.ask)),
        ("impact", v_num(q.impact)),
        ("inventory", json!(rc.inventory())),
        ("cash", v_num(rc.cash())),
        ("pnl", v_num(rc.pnl())),
        ("risk", v_num(rc.risk_cost())),
        ("score", v_num(rc.score())),
    ]);
    if let Some(c) = candles.last() {
        fields.insert("candle".to_string(), json!([c.o, c.h, c.l, c.c]));
    }
    log(Level::Info, Domain::Round, "status", fields);
}

/// Apply one stdin command. Returns false when the player quits.
fn handle_command(
    rc: &mut Controller,
    store: &mut Option<RoundStore>,
    cmd: &str,
    now: f64,
) -> Result<bool> {
    let result = match cmd {
        "b" => rc.buy(1, now).map(|_| ()),
        "B" => rc.buy(10, now).map(|_| ()),
        "s" => rc.sell(1, now).map(|_| ()),
        "S" => rc.sell(10, now).map(|_| ()),
        "f" => rc.flatten(now).map(|_| ()),
        "n" => rc.start(now),
        "q" => {
            if rc.phase() == RoundPhase::Running {
                let summary = rc.abort(now)?;
                archive(store, &summary);
            }
            return Ok(false);
        }
        "" => Ok(()),
        _ => {
            println!("{}", HELP);
            Ok(())
        }
    };
    match result {
        Ok(()) => {}
        Err(SimError::RoundFinished) => println!("round is over; n starts a new one"),
        Err(e) => log(
            Level::Warn,
            Domain::Exec,
            "command_rejected",
            obj(&[("cmd", v_str(cmd)), ("kind", v_str(e.kind())), ("error", v_str(&e.to_string()))]),
        ),
    }
    Ok(true)
}

fn print_news(item: &NewsItem) {
    let arrow = if item.direction > 0 { "UP" } else { "DOWN" };
    println!("NEWS [{} {:.2}] {}", arrow, item.impact, item.headline);
}

fn print_stream_status(stream: &Streamer, candles: &CandleBuilder, now: f64) {
    let q = stream.quotes(now);
    let mut fields = obj(&[
        ("mid", v_num(stream.mid())),
        ("bid", v_num(q.bid)),
        ("ask", v_num(q.ask)),
        ("impact", v_num(q.impact)),
        ("inventory", json!(stream.inventory())),
        ("cash", v_num(stream.cash())),
        ("pnl", v_num(stream.pnl())),
    ]);
    if let Some(c) = candles.last() {
        fields.insert("candle".to_string(), json!([c.o, c.h, c.l, c.c]));
    }
    log(Level::Info, Domain::Market, "status", fields);
}

/// Stream-mode command. Returns false when the player quits.
fn handle_stream_command(stream: &mut Streamer, cmd: &str, now: f64) -> Result<bool> {
    let result = match cmd {
        "b" => stream.buy(1, now).map(|_| ()),
        "B" => stream.buy(10, now).map(|_| ()),
        "s" => stream.sell(1, now).map(|_| ()),
        "S" => stream.sell(10, now).map(|_| ()),
        "f" => stream.flatten(now).map(|_| ()),
        "q" => {
            if !stream.is_closed() {
                stream.close(now)?;
                println!("SESSION OVER  pnl={:+.2}", stream.pnl());
            }
            return Ok(false);
        }
        "" => Ok(()),
        _ => {
            println!("{}", STREAM_HELP);
            Ok(())
        }
    };
    if let Err(e) = result {
        log(
            Level::Warn,
            Domain::Exec,
            "command_rejected",
            obj(&[("cmd", v_str(cmd)), ("kind", v_str(e.kind())), ("error", v_str(&e.to_string()))]),
        );
    }
    Ok(true)
}

async fn run_rounds(cfg: Config, feed: Box<dyn NewsFeed + Send>) -> Result<()> {
    let mut store = open_store(&cfg)?;
    let noise = Box::new(SeededNoise::from_config(&cfg));
    let mut rc: Controller = RoundController::new(cfg.clone(), feed, noise)?;
    let mut candles = CandleBuilder::new(cfg.candle_interval, cfg.candle_max_keep);

    let clock = Instant::now();
    let now = || clock.elapsed().as_secs_f64();

    println!("{}", HELP);
    rc.start(now())?;

    let mut ticker = interval(Duration::from_secs_f64(cfg.dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_print = f64::NEG_INFINITY;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if rc.phase() != RoundPhase::Running {
                    continue;
                }
                let t = now();
                match rc.advance(t) {
                    Ok(out) => {
                        if let Some(mid) = out.mid {
                            candles.update(t, mid);
                        }
                        if let Some(item) = &out.injected {
                            print_news(item);
                        }
                        if let Some(summary) = &out.summary {
                            archive(&mut store, summary);
                        }
                    }
                    Err(e) => log(
                        Level::Warn,
                        Domain::Market,
                        "advance_failed",
                        obj(&[("kind", v_str(e.kind())), ("error", v_str(&e.to_string()))]),
                    ),
                }
                if rc.phase() == RoundPhase::Running && t - last_print >= cfg.print_every_secs {
                    print_status(&rc, &candles, t);
                    last_print = t;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // stdin closed: treat as quit
                    handle_command(&mut rc, &mut store, "q", now())?;
                    break;
                };
                if !handle_command(&mut rc, &mut store, line.trim(), now())? {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                log(Level::Info, Domain::System, "interrupted", obj(&[]));
                handle_command(&mut rc, &mut store, "q", now())?;
                break;
            }
        }
    }

    if let Some(store) = &store {
        if let Ok(Some(best)) = store.best_score(&cfg.symbol) {
            println!("best score on record for {}: {:+.2}", cfg.symbol, best);
        }
    }
    Ok(())
}

async fn run_stream(cfg: Config, feed: Box<dyn NewsFeed + Send>) -> Result<()> {
    let noise = Box::new(SeededNoise::from_config(&cfg));
    let mut stream: Streamer = StreamController::new(cfg.clone(), feed, noise)?;
    let mut candles = CandleBuilder::new(cfg.candle_interval, cfg.candle_max_keep);

    let clock = Instant::now();
    let now = || clock.elapsed().as_secs_f64();

    println!("{}", STREAM_HELP);
    let mut ticker = interval(Duration::from_secs_f64(cfg.dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_print = f64::NEG_INFINITY;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let t = now();
                match stream.advance(t) {
                    Ok(out) => {
                        candles.update(t, out.mid);
                        out.injected.iter().for_each(print_news);
                    }
                    Err(e) => log(
                        Level::Warn,
                        Domain::Market,
                        "advance_failed",
                        obj(&[("kind", v_str(e.kind())), ("error", v_str(&e.to_string()))]),
                    ),
                }
                if t - last_print >= cfg.print_every_secs {
                    print_stream_status(&stream, &candles, t);
                    last_print = t;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    handle_stream_command(&mut stream, "q", now())?;
                    break;
                };
                if !handle_stream_command(&mut stream, line.trim(), now())? {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                log(Level::Info, Domain::System, "interrupted", obj(&[]));
                handle_stream_command(&mut stream, "q", now())?;
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = load_config()?;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("run_id", v_str(logging::run_id())),
            ("symbol", v_str(&cfg.symbol)),
            ("mode", json!(cfg.mode)),
            ("config", v_str(&cfg.fingerprint())),
            ("seed", json!(cfg.seed)),
        ]),
    );

    let feed = open_feed(&cfg)?;
    match cfg.mode {
        GameMode::Round => run_rounds(cfg, feed).await,
        GameMode::Stream => run_stream(cfg, feed).await,
    }
}
