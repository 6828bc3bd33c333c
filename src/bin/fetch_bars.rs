use std::env;

use narsbridge::config::Config;
use narsbridge::data::alpaca::AlpacaBars;
use narsbridge::data::{read_csv_ticks, Timeframe, TickQuery};

const USAGE: &str = "usage: fetch_bars SYMBOL START [END] TIMEFRAME   (dates YYYY-MM-DD, timeframe minute|hour|day)";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let (symbol, start, end, timeframe) = match args.as_slice() {
        [s, start, tf] => (s, start, None, tf),
        [s, start, end, tf] => (s, start, Some(end.as_str()), tf),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };
    let Some(timeframe) = Timeframe::parse(timeframe) else {
        eprintln!("unknown timeframe {:?}", timeframe);
        eprintln!("{}", USAGE);
        std::process::exit(1);
    };

    let query = match TickQuery::from_dates(symbol, timeframe, start, end) {
        Ok(q) => q,
        Err(err) => {
            eprintln!("bad query: {}", err);
            std::process::exit(1);
        }
    };

    let cfg = Config::from_env();
    let client = match AlpacaBars::new(&cfg) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{} (set ALPACA_API_KEY and ALPACA_SECRET_KEY)", err);
            std::process::exit(2);
        }
    };

    let path = match client.retrieve(&query).await {
        Ok(p) => p,
        Err(err) => {
            eprintln!("fetch failed: {}", err);
            std::process::exit(3);
        }
    };
    let rows = read_csv_ticks(&path).map(|t| t.len()).unwrap_or(0);
    println!("{} ({} bars)", path.display(), rows);
}
