//! Headless replay of one shock across many seeds.
//!
//! usage: shock_replay [direction] [impact] [ticks] [seeds]
//!
//! Prints a JSON report: spread right after the injection and at the end,
//! the half-lives elapsed, and the mean log return across seeds.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use shockfx::{Config, PricingEngine, SeededNoise};

#[derive(Debug, Serialize)]
struct Report {
    direction: i8,
    impact: f64,
    ticks: usize,
    seeds: u64,
    config: String,
    base_spread: f64,
    spread_at_injection: f64,
    spread_at_end: f64,
    half_lives_elapsed: f64,
    mean_log_return: f64,
    mean_final_mid: f64,
    down_paths: u64,
}

fn arg<T: std::str::FromStr>(args: &[String], idx: usize, default: T) -> Result<T> {
    match args.get(idx) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("bad argument {}: {}", idx, raw)),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let direction: i8 = arg(&args, 0, -1)?;
    let impact: f64 = arg(&args, 1, 0.35)?;
    let ticks: usize = arg(&args, 2, 400)?;
    let seeds: u64 = arg(&args, 3, 200)?;
    if seeds == 0 {
        bail!("need at least one seed");
    }

    let cfg = Config::from_env();
    cfg.validate().context("invalid config")?;
    let base_seed = cfg.seed.unwrap_or(7);

    let mut spread_at_injection = 0.0;
    let mut spread_at_end = 0.0;
    let mut sum_log_return = 0.0;
    let mut sum_final_mid = 0.0;
    let mut down_paths = 0;

    for k in 0..seeds {
        let noise = Box::new(SeededNoise::new(base_seed.wrapping_add(k)));
        let mut engine = PricingEngine::new(cfg.clone(), noise)?;
        engine.add_shock(direction, impact, 0.0)?;
        if k == 0 {
            spread_at_injection = engine.quotes(0.0).spread;
        }
        let mut now = 0.0;
        for i in 1..=ticks {
            now = i as f64 * cfg.dt;
            engine.tick(now)?;
        }
        if k == 0 {
            spread_at_end = engine.quotes(now).spread;
        }
        let log_return = (engine.mid() / cfg.initial_mid).ln();
        sum_log_return += log_return;
        sum_final_mid += engine.mid();
        if log_return < 0.0 {
            down_paths += 1;
        }
    }

    let report = Report {
        direction,
        impact,
        ticks,
        seeds,
        config: cfg.fingerprint(),
        base_spread: cfg.base_spread,
        spread_at_injection,
        spread_at_end,
        half_lives_elapsed: ticks as f64 * cfg.dt / cfg.half_life,
        mean_log_return: sum_log_return / seeds as f64,
        mean_final_mid: sum_final_mid / seeds as f64,
        down_paths,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
