use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::mpsc;

use narsbridge::config::{Config, FeedMode};
use narsbridge::data::alpaca::AlpacaBars;
use narsbridge::data::{CsvTickFile, Tick, TickQuery, TickSource};
use narsbridge::environment::{EnvironmentLoop, LoopConfig, RunSummary};
use narsbridge::feed::alpaca_live::{EventType, LiveBarStream};
use narsbridge::listener::{run_alongside, CommandListener};
use narsbridge::logging::{log, log_session_summary, obj, run_id, v_num, v_str, Domain, Level};
use narsbridge::narsese::Codec;
use narsbridge::prediction::SharedPredictionState;
use narsbridge::recorder::{SqliteRecorder, SummaryHook};
use narsbridge::transport::Transport;

async fn load_ticks(cfg: &Config) -> Result<Vec<Tick>> {
    let query = TickQuery::from_dates(&cfg.symbol, cfg.timeframe, &cfg.start, cfg.end.as_deref())?;
    let source: Box<dyn TickSource> = match &cfg.tick_csv {
        Some(path) => Box::new(CsvTickFile {
            path: PathBuf::from(path),
        }),
        None => Box::new(AlpacaBars::new(cfg)?),
    };
    let ticks = source
        .load_ticks(&query)
        .await
        .with_context(|| format!("loading ticks for {}", cfg.symbol))?;
    Ok(ticks)
}

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("env_addr", v_str(&cfg.env_addr.to_string())),
            ("destination", v_str(&cfg.destination().to_string())),
            ("symbol", v_str(&cfg.symbol)),
            ("deadzone", v_num(cfg.deadzone)),
            ("augment", v_num(cfg.augment)),
            ("repeat", json!(cfg.repeat)),
        ]),
    );

    let transport = Transport::bind(cfg.env_addr).await?;
    let state = SharedPredictionState::new(cfg.initial_predicted.unwrap_or(0.0), cfg.augment);

    let mut listener = CommandListener::new(transport.clone(), state.clone(), Codec::default(), cfg.max_datagram).spawn();

    let mut env = EnvironmentLoop::new(
        state.clone(),
        transport.clone(),
        cfg.destination(),
        LoopConfig::from_config(&cfg),
    )
    .with_hook(Box::new(SummaryHook::new()));
    if let Some(path) = &cfg.sqlite_path {
        env = env.with_hook(Box::new(SqliteRecorder::new(path, run_id())?));
    }

    let work = async {
        let summary = match cfg.feed_mode {
            FeedMode::Historical => {
                let ticks = load_ticks(&cfg).await?;
                log(
                    Level::Info,
                    Domain::Env,
                    "ticks_loaded",
                    obj(&[("count", json!(ticks.len()))]),
                );
                env.run(&ticks).await?
            }
            FeedMode::Live => {
                let mut stream = LiveBarStream::new(&cfg)?;
                stream.subscribe(EventType::Bars);
                let (tx, rx) = mpsc::channel(256);
                let feed = tokio::spawn(stream.run(tx));
                let summary = env.run_stream(rx).await;
                if let Ok(Err(err)) = feed.await {
                    log(
                        Level::Error,
                        Domain::Feed,
                        "stream_failed",
                        obj(&[("error", v_str(&err.to_string()))]),
                    );
                }
                summary?
            }
        };
        Ok::<RunSummary, anyhow::Error>(summary)
    };
    let result = run_alongside(&mut listener, work).await;

    transport.close();
    let summary = result?;
    let last = state.snapshot();
    log_session_summary(
        "env",
        started.elapsed().as_secs_f64(),
        &[
            ("passes", json!(summary.passes)),
            ("ticks", json!(summary.ticks)),
            ("dropped", json!(summary.dropped)),
            ("predicted", v_num(last.predicted)),
        ],
    );
    Ok(())
}
