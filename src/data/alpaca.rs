use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use url::Url;

use crate::config::Config;
use crate::data::{file_sha256, read_csv_ticks, write_csv_bars, Bar, Tick, TickQuery, TickSource};
use crate::error::FetchError;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::retry::{retry_fetch, RetryConfig};
use serde_json::json;

const PAGE_LIMIT: u32 = 10_000;

/// Historical bars from the Alpaca data API, cached as CSV.
pub struct AlpacaBars {
    client: Client,
    data_base: String,
    trading_base: String,
    api_key: String,
    secret_key: String,
    cache_dir: PathBuf,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<Bar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    symbol: String,
    class: String,
    #[serde(default)]
    tradable: bool,
}

impl AlpacaBars {
    pub fn new(cfg: &Config) -> Result<Self, FetchError> {
        let (api_key, secret_key) = match (&cfg.api_key, &cfg.secret_key) {
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => (k.clone(), s.clone()),
            _ => return Err(FetchError::MissingCredentials),
        };
        Ok(Self {
            client: Client::new(),
            data_base: cfg.alpaca_data_base.clone(),
            trading_base: cfg.alpaca_trading_base.clone(),
            api_key,
            secret_key,
            cache_dir: PathBuf::from(&cfg.data_dir),
            retry: RetryConfig::default(),
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    fn endpoint(base: &str, path: &str) -> Result<Url, FetchError> {
        let base = Url::parse(base).map_err(|e| FetchError::Parse(format!("bad base url {}: {}", base, e)))?;
        base.join(path)
            .map_err(|e| FetchError::Parse(format!("bad path {}: {}", path, e)))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, name: &str, url: Url) -> Result<T, FetchError> {
        let resp = self.authed(self.client.get(url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                endpoint: name.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }

    /// Only US equities are accepted.
    pub async fn validate_symbol(&self, symbol: &str) -> Result<(), FetchError> {
        let url = Self::endpoint(&self.trading_base, &format!("/v2/assets/{}", symbol))?;
        let asset: Asset = retry_fetch(&self.retry, "get_asset", || self.get_json("assets", url.clone()))
            .await
            .map_err(|e| FetchError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;
        if asset.class != "us_equity" {
            return Err(FetchError::InvalidSymbol {
                symbol: asset.symbol,
                reason: format!("invalid asset class {}", asset.class),
            });
        }
        if !asset.tradable {
            log(
                Level::Warn,
                Domain::Feed,
                "asset_not_tradable",
                obj(&[("symbol", v_str(symbol))]),
            );
        }
        Ok(())
    }

    pub async fn fetch_bars(&self, query: &TickQuery) -> Result<Vec<Bar>, FetchError> {
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = Self::endpoint(&self.data_base, &format!("/v2/stocks/{}/bars", query.symbol))?;
            {
                let mut q = url.query_pairs_mut();
                q.append_pair("timeframe", query.timeframe.as_provider())
                    .append_pair("start", &query.start.to_rfc3339())
                    .append_pair("end", &query.end.to_rfc3339())
                    .append_pair("limit", &PAGE_LIMIT.to_string());
                if let Some(token) = &page_token {
                    q.append_pair("page_token", token);
                }
            }
            let page: BarsPage = retry_fetch(&self.retry, "get_bars", || self.get_json("bars", url.clone())).await?;
            bars.extend(page.bars.unwrap_or_default());
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        log(
            Level::Info,
            Domain::Feed,
            "bars_fetched",
            obj(&[("symbol", v_str(&query.symbol)), ("count", json!(bars.len()))]),
        );
        Ok(bars)
    }

    /// Fetch into the cache unless the cache file already exists.
    pub async fn retrieve(&self, query: &TickQuery) -> Result<PathBuf, FetchError> {
        let path = query.cache_path(&self.cache_dir);
        if path.exists() {
            log_cache("cache_hit", &path);
            return Ok(path);
        }
        self.validate_symbol(&query.symbol).await?;
        let bars = self.fetch_bars(query).await?;
        write_csv_bars(&path, &bars)?;
        log_cache("cache_written", &path);
        Ok(path)
    }
}

fn log_cache(event: &str, path: &Path) {
    let hash = file_sha256(path).unwrap_or_default();
    log(
        Level::Info,
        Domain::Feed,
        event,
        obj(&[
            ("path", v_str(&path.display().to_string())),
            ("sha256", v_str(&hash)),
        ]),
    );
}

#[async_trait]
impl TickSource for AlpacaBars {
    async fn load_ticks(&self, query: &TickQuery) -> Result<Vec<Tick>, FetchError> {
        let path = self.retrieve(query).await?;
        read_csv_ticks(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_rejected() {
        let mut cfg = Config::default();
        cfg.api_key = None;
        assert!(matches!(AlpacaBars::new(&cfg), Err(FetchError::MissingCredentials)));
        cfg.api_key = Some("k".to_string());
        cfg.secret_key = Some(String::new());
        assert!(matches!(AlpacaBars::new(&cfg), Err(FetchError::MissingCredentials)));
    }

    #[test]
    fn parses_bars_page() {
        let body = r#"{"bars":[{"t":"2021-01-04T09:00:00Z","o":375.31,"h":375.45,"l":374.7,"c":375.0,"v":9052,"n":74,"vw":375.07}],"symbol":"SPY","next_page_token":null}"#;
        let page: BarsPage = serde_json::from_str(body).unwrap();
        let bars = page.bars.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].to_tick().volume, 9052);
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn endpoint_joins_path() {
        let url = AlpacaBars::endpoint("https://data.alpaca.markets", "/v2/stocks/SPY/bars").unwrap();
        assert_eq!(url.as_str(), "https://data.alpaca.markets/v2/stocks/SPY/bars");
    }

    #[tokio::test]
    async fn cached_file_is_reused_without_network() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.api_key = Some("k".to_string());
        cfg.secret_key = Some("s".to_string());
        cfg.data_dir = dir.path().display().to_string();
        let source = AlpacaBars::new(&cfg).unwrap();
        let q = TickQuery::from_dates("SPY", crate::data::Timeframe::Minute, "2021-01-01", Some("2021-01-30")).unwrap();
        std::fs::write(q.cache_path(dir.path()), "timestamp,close,volume,trade_count\n2021-01-04T14:30:00Z,1.5,2,3\n").unwrap();
        let ticks = source.load_ticks(&q).await.unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].actual_value, 1.5);
    }
}
