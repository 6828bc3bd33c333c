use std::net::SocketAddr;
use std::time::Duration;

use crate::data::Timeframe;

/// Where the environment sends its perceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationRole {
    /// The reasoning agent's perception address.
    Reasoner,
    /// A plain controller listening on its own address.
    Controller,
}

/// What to do with a perception datagram that does not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerceptionPolicy {
    /// Stop the channel with an error.
    Strict,
    /// Log and drop the datagram; the cycle is missed.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// Finite sequence from the bar cache / historical API.
    Historical,
    /// Push stream of live bars.
    Live,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env_addr: SocketAddr,
    pub agent_addr: SocketAddr,
    pub controller_addr: SocketAddr,
    pub dest_role: DestinationRole,
    pub max_datagram: usize,
    pub deadzone: f64,
    pub augment: f64,
    pub initial_predicted: Option<f64>,
    pub repeat: bool,
    pub pace_ms: u64,
    pub babble_budget: u32,
    pub babble_chance: f64,
    pub babble_seed: Option<u64>,
    pub max_actions_per_cycle: usize,
    pub perception_policy: PerceptionPolicy,
    pub feed_mode: FeedMode,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: String,
    pub end: Option<String>,
    pub tick_csv: Option<String>,
    pub data_dir: String,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub alpaca_data_base: String,
    pub alpaca_trading_base: String,
    pub alpaca_stream_url: String,
    pub sqlite_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_addr: SocketAddr::from(([127, 0, 0, 1], 12345)),
            agent_addr: SocketAddr::from(([127, 0, 0, 1], 54321)),
            controller_addr: SocketAddr::from(([127, 0, 0, 1], 54322)),
            dest_role: DestinationRole::Reasoner,
            max_datagram: 1024,
            deadzone: 1.0,
            augment: 1.0,
            initial_predicted: None,
            repeat: true,
            pace_ms: 0,
            babble_budget: 1000,
            babble_chance: 1.0,
            babble_seed: None,
            max_actions_per_cycle: 1,
            perception_policy: PerceptionPolicy::Strict,
            feed_mode: FeedMode::Historical,
            symbol: "SPY".to_string(),
            timeframe: Timeframe::Minute,
            start: "2021-01-01".to_string(),
            end: Some("2021-01-30".to_string()),
            tick_csv: None,
            data_dir: "data".to_string(),
            api_key: None,
            secret_key: None,
            alpaca_data_base: "https://data.alpaca.markets".to_string(),
            alpaca_trading_base: "https://paper-api.alpaca.markets".to_string(),
            alpaca_stream_url: "wss://stream.data.alpaca.markets/v2/iex".to_string(),
            sqlite_path: None,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            env_addr: std::env::var("ENV_ADDR").ok().and_then(|v| v.parse().ok()).unwrap_or(d.env_addr),
            agent_addr: std::env::var("AGENT_ADDR").ok().and_then(|v| v.parse().ok()).unwrap_or(d.agent_addr),
            controller_addr: std::env::var("CONTROLLER_ADDR").ok().and_then(|v| v.parse().ok()).unwrap_or(d.controller_addr),
            dest_role: match std::env::var("DEST_ROLE").unwrap_or_default().as_str() {
                "controller" => DestinationRole::Controller,
                _ => DestinationRole::Reasoner,
            },
            max_datagram: std::env::var("MAX_DATAGRAM").ok().and_then(|v| v.parse().ok()).unwrap_or(d.max_datagram),
            deadzone: std::env::var("DEADZONE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.deadzone),
            augment: std::env::var("AUGMENT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.augment),
            initial_predicted: std::env::var("INITIAL_PREDICTED").ok().and_then(|v| v.parse().ok()),
            repeat: env_flag("REPEAT").unwrap_or(d.repeat),
            pace_ms: std::env::var("PACE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.pace_ms),
            babble_budget: std::env::var("BABBLE_BUDGET").ok().and_then(|v| v.parse().ok()).unwrap_or(d.babble_budget),
            babble_chance: std::env::var("BABBLE_CHANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.babble_chance),
            babble_seed: std::env::var("BABBLE_SEED").ok().and_then(|v| v.parse().ok()),
            max_actions_per_cycle: std::env::var("MAX_ACTIONS_PER_CYCLE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.max_actions_per_cycle),
            perception_policy: match std::env::var("PERCEPTION_POLICY").unwrap_or_default().as_str() {
                "skip" => PerceptionPolicy::Skip,
                _ => PerceptionPolicy::Strict,
            },
            feed_mode: match std::env::var("FEED_MODE").unwrap_or_default().as_str() {
                "live" => FeedMode::Live,
                _ => FeedMode::Historical,
            },
            symbol: std::env::var("SYMBOL").unwrap_or(d.symbol),
            timeframe: std::env::var("TIMEFRAME").ok().and_then(|v| Timeframe::parse(&v)).unwrap_or(d.timeframe),
            start: std::env::var("START").unwrap_or(d.start),
            end: std::env::var("END").ok().or(d.end),
            tick_csv: std::env::var("TICK_CSV").ok(),
            data_dir: std::env::var("DATA_DIR").unwrap_or(d.data_dir),
            api_key: std::env::var("ALPACA_API_KEY").ok(),
            secret_key: std::env::var("ALPACA_SECRET_KEY").ok(),
            alpaca_data_base: std::env::var("ALPACA_DATA_BASE").unwrap_or(d.alpaca_data_base),
            alpaca_trading_base: std::env::var("ALPACA_TRADING_BASE").unwrap_or(d.alpaca_trading_base),
            alpaca_stream_url: std::env::var("ALPACA_STREAM_URL").unwrap_or(d.alpaca_stream_url),
            sqlite_path: std::env::var("SQLITE_PATH").ok(),
        }
    }

    /// Address the environment loop sends perceptions to.
    pub fn destination(&self) -> SocketAddr {
        match self.dest_role {
            DestinationRole::Reasoner => self.agent_addr,
            DestinationRole::Controller => self.controller_addr,
        }
    }

    pub fn pace(&self) -> Duration {
        Duration::from_millis(self.pace_ms)
    }
}
