//! Tick sources and the on-disk bar cache.
//!
//! The environment consumes a finite ordered sequence of [`Tick`]s. Bars are
//! cached as CSV under the data directory, one file per
//! `(symbol, timeframe, start, end)` query.

pub mod alpaca;

use std::fs::{create_dir_all, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::FetchError;
use crate::logging::{log, obj, v_str, Domain, Level};
use serde_json::json;

pub const CSV_COLUMNS: [&str; 8] = [
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "trade_count",
    "vwap",
];

/// One timestep of the driving sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub actual_value: f64,
    pub volume: u64,
    pub trade_count: u64,
    /// Bar open time, epoch seconds, when the source provides one.
    pub ts: Option<i64>,
}

impl Tick {
    pub fn new(actual_value: f64, volume: u64, trade_count: u64) -> Self {
        Self {
            actual_value,
            volume,
            trade_count,
            ts: None,
        }
    }
}

/// Aggregated bar as delivered by the data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(rename = "t")]
    pub timestamp: String,
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
    #[serde(rename = "v")]
    pub volume: f64,
    #[serde(rename = "n", default)]
    pub trade_count: u64,
    #[serde(rename = "vw", default)]
    pub vwap: f64,
}

impl Bar {
    pub fn to_tick(&self) -> Tick {
        Tick {
            actual_value: self.close,
            volume: self.volume.max(0.0) as u64,
            trade_count: self.trade_count,
            ts: parse_timestamp(&self.timestamp),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Minute,
    Hour,
    Day,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "minute" | "1min" => Some(Timeframe::Minute),
            "hour" | "1hour" => Some(Timeframe::Hour),
            "day" | "1day" => Some(Timeframe::Day),
            _ => None,
        }
    }

    /// Provider spelling, also used in cache file names.
    pub fn as_provider(&self) -> &'static str {
        match self {
            Timeframe::Minute => "1Min",
            Timeframe::Hour => "1Hour",
            Timeframe::Day => "1Day",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TickQuery {
    /// Dates are `YYYY-MM-DD`; a missing end means now.
    pub fn from_dates(
        symbol: &str,
        timeframe: Timeframe,
        start: &str,
        end: Option<&str>,
    ) -> Result<Self, FetchError> {
        let start = parse_date(start)?;
        let end = match end {
            Some(e) => parse_date(e)?,
            None => Utc::now(),
        };
        Ok(Self {
            symbol: symbol.to_string(),
            timeframe,
            start,
            end,
        })
    }

    pub fn cache_file_name(&self) -> String {
        let fmt = "%Y-%m-%d-%H-%M-%S";
        format!(
            "{}-{}-{}-{}.csv",
            self.symbol,
            self.timeframe.as_provider(),
            self.start.format(fmt),
            self.end.format(fmt)
        )
    }

    pub fn cache_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.cache_file_name())
    }
}

fn parse_date(s: &str) -> Result<DateTime<Utc>, FetchError> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| FetchError::Parse(format!("bad date {:?}: {}", s, e)))?;
    let dt = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| FetchError::Parse(format!("bad date {:?}", s)))?;
    Ok(dt.and_utc())
}

fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc3339(&s.replacen(' ', "T", 1)))
        .ok()
        .map(|dt| dt.timestamp())
}

/// Anything that can produce the ordered tick sequence for a query.
#[async_trait]
pub trait TickSource: Send + Sync {
    async fn load_ticks(&self, query: &TickQuery) -> Result<Vec<Tick>, FetchError>;
}

/// A CSV file on disk, regardless of the query.
#[derive(Debug, Clone)]
pub struct CsvTickFile {
    pub path: PathBuf,
}

#[async_trait]
impl TickSource for CsvTickFile {
    async fn load_ticks(&self, _query: &TickQuery) -> Result<Vec<Tick>, FetchError> {
        read_csv_ticks(&self.path)
    }
}

/// Read ticks from a cached bar CSV. Columns are located by header name, so
/// files with extra columns (e.g. a leading `symbol`) load too. Rows that do
/// not parse are skipped and logged.
pub fn read_csv_ticks(path: &Path) -> Result<Vec<Tick>, FetchError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut lines = reader.lines();
    let columns = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                break CsvColumns::from_header(trimmed)?;
            }
            None => return Ok(Vec::new()),
        }
    };

    let mut ticks = Vec::new();
    let mut bad_rows = 0u64;

    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match columns.parse_row(trimmed) {
            Ok(t) => ticks.push(t),
            Err(err) => {
                bad_rows += 1;
                log(
                    Level::Warn,
                    Domain::Feed,
                    "bad_row",
                    obj(&[("error", v_str(&err)), ("path", v_str(&path.display().to_string()))]),
                );
            }
        }
    }

    log(
        Level::Info,
        Domain::Feed,
        "csv_loaded",
        obj(&[
            ("path", v_str(&path.display().to_string())),
            ("rows", json!(ticks.len())),
            ("bad_rows", json!(bad_rows)),
        ]),
    );
    Ok(ticks)
}

struct CsvColumns {
    close: usize,
    volume: Option<usize>,
    trade_count: Option<usize>,
    timestamp: Option<usize>,
}

impl CsvColumns {
    fn from_header(header: &str) -> Result<Self, FetchError> {
        let names: Vec<String> = header.split(',').map(|s| s.trim().to_lowercase()).collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let close = find("close")
            .ok_or_else(|| FetchError::Parse(format!("missing close column in header {:?}", header)))?;
        Ok(Self {
            close,
            volume: find("volume"),
            trade_count: find("trade_count"),
            timestamp: find("timestamp"),
        })
    }

    fn parse_row(&self, line: &str) -> Result<Tick, String> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let field = |idx: usize| {
            parts
                .get(idx)
                .copied()
                .ok_or_else(|| format!("expected column {}, got {} columns", idx, parts.len()))
        };
        let actual_value: f64 = field(self.close)?
            .parse()
            .map_err(|e| format!("bad close: {}", e))?;
        // Volumes may be written as floats ("1200.0").
        let count = |idx: Option<usize>, name: &str| -> Result<u64, String> {
            match idx {
                Some(i) => field(i)?
                    .parse::<f64>()
                    .map(|v| v.max(0.0) as u64)
                    .map_err(|e| format!("bad {}: {}", name, e)),
                None => Ok(0),
            }
        };
        Ok(Tick {
            actual_value,
            volume: count(self.volume, "volume")?,
            trade_count: count(self.trade_count, "trade_count")?,
            ts: match self.timestamp {
                Some(i) => parse_timestamp(field(i)?),
                None => None,
            },
        })
    }
}

pub fn write_csv_bars(path: &Path, bars: &[Bar]) -> Result<(), FetchError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{}", CSV_COLUMNS.join(","))?;
    for b in bars {
        writeln!(
            w,
            "{},{},{},{},{},{},{},{}",
            b.timestamp, b.open, b.high, b.low, b.close, b.volume, b.trade_count, b.vwap
        )?;
    }
    w.flush()?;
    Ok(())
}

pub fn file_sha256(path: &Path) -> Result<String, FetchError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
