use std::collections::BTreeMap;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::data::{Bar, Tick};
use crate::error::FetchError;
use crate::logging::{log, obj, v_str, Domain, Level};

/// Push streams a bar feed can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    /// Minute bars aggregated from trades.
    Bars,
    /// Daily bar summarising the session so far.
    DailyBars,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::Bars, EventType::DailyBars];

    pub fn as_wire(&self) -> &'static str {
        match self {
            EventType::Bars => "bars",
            EventType::DailyBars => "dailyBars",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "T")]
enum WsMessage {
    #[serde(rename = "success")]
    Success { msg: String },
    #[serde(rename = "error")]
    Error { code: i64, msg: String },
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        bars: Vec<String>,
        #[serde(default, rename = "dailyBars")]
        daily_bars: Vec<String>,
    },
    #[serde(rename = "b")]
    Bar(WsBar),
    #[serde(rename = "d")]
    DailyBar(WsBar),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
struct WsBar {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(flatten)]
    bar: Bar,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    Authenticated,
    Subscribed { bars: Vec<String>, daily_bars: Vec<String> },
    Bar { kind: EventType, symbol: String, tick: Tick },
    Error { code: i64, msg: String },
    Ignored,
}

/// Decode one websocket text frame (always a JSON array).
pub fn parse_stream_message(text: &str) -> Result<Vec<StreamEvent>, FetchError> {
    let msgs: Vec<WsMessage> =
        serde_json::from_str(text).map_err(|e| FetchError::Parse(format!("stream message: {}", e)))?;
    Ok(msgs
        .into_iter()
        .map(|m| match m {
            WsMessage::Success { msg } if msg == "connected" => StreamEvent::Connected,
            WsMessage::Success { msg } if msg == "authenticated" => StreamEvent::Authenticated,
            WsMessage::Success { .. } | WsMessage::Other => StreamEvent::Ignored,
            WsMessage::Error { code, msg } => StreamEvent::Error { code, msg },
            WsMessage::Subscription { bars, daily_bars } => StreamEvent::Subscribed { bars, daily_bars },
            WsMessage::Bar(b) => StreamEvent::Bar {
                kind: EventType::Bars,
                tick: b.bar.to_tick(),
                symbol: b.symbol,
            },
            WsMessage::DailyBar(b) => StreamEvent::Bar {
                kind: EventType::DailyBars,
                tick: b.bar.to_tick(),
                symbol: b.symbol,
            },
        })
        .collect())
}

/// Live bar subscription for one symbol, forwarding each bar as a [`Tick`].
#[derive(Debug, Clone)]
pub struct LiveBarStream {
    url: String,
    api_key: String,
    secret_key: String,
    symbol: String,
    subscriptions: BTreeMap<EventType, bool>,
}

impl LiveBarStream {
    pub fn new(cfg: &Config) -> Result<Self, FetchError> {
        let (api_key, secret_key) = match (&cfg.api_key, &cfg.secret_key) {
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => (k.clone(), s.clone()),
            _ => return Err(FetchError::MissingCredentials),
        };
        Ok(Self {
            url: cfg.alpaca_stream_url.clone(),
            api_key,
            secret_key,
            symbol: cfg.symbol.clone(),
            subscriptions: EventType::ALL.iter().map(|e| (*e, false)).collect(),
        })
    }

    /// Returns false if already subscribed.
    pub fn subscribe(&mut self, event: EventType) -> bool {
        let slot = self.subscriptions.entry(event).or_insert(false);
        if *slot {
            log(
                Level::Debug,
                Domain::Feed,
                "already_subscribed",
                obj(&[("stream", v_str(event.as_wire()))]),
            );
            return false;
        }
        *slot = true;
        true
    }

    /// Returns false if not subscribed.
    pub fn unsubscribe(&mut self, event: EventType) -> bool {
        match self.subscriptions.get_mut(&event) {
            Some(slot) if *slot => {
                *slot = false;
                true
            }
            _ => {
                log(
                    Level::Debug,
                    Domain::Feed,
                    "not_subscribed",
                    obj(&[("stream", v_str(event.as_wire()))]),
                );
                false
            }
        }
    }

    pub fn subscribe_all(&mut self) {
        for e in EventType::ALL {
            self.subscribe(e);
        }
    }

    pub fn unsubscribe_all(&mut self) {
        for e in EventType::ALL {
            self.unsubscribe(e);
        }
    }

    pub fn is_subscribed(&self, event: EventType) -> bool {
        self.subscriptions.get(&event).copied().unwrap_or(false)
    }

    fn auth_message(&self) -> Value {
        json!({"action": "auth", "key": self.api_key, "secret": self.secret_key})
    }

    fn subscribe_message(&self) -> Value {
        let mut msg = serde_json::Map::new();
        msg.insert("action".to_string(), json!("subscribe"));
        for (event, on) in &self.subscriptions {
            if *on {
                msg.insert(event.as_wire().to_string(), json!([self.symbol]));
            }
        }
        Value::Object(msg)
    }

    /// Connect, authenticate, subscribe, then forward bars until the socket
    /// closes or the receiver goes away.
    pub async fn run(self, sender: mpsc::Sender<Tick>) -> Result<(), FetchError> {
        if !self.subscriptions.values().any(|on| *on) {
            return Err(FetchError::Stream("no stream subscribed".to_string()));
        }
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| FetchError::Stream(e.to_string()))?;
        let (mut write, mut read) = ws.split();
        log(
            Level::Info,
            Domain::Feed,
            "stream_connected",
            obj(&[("url", v_str(&self.url)), ("symbol", v_str(&self.symbol))]),
        );

        write
            .send(Message::Text(self.auth_message().to_string()))
            .await
            .map_err(|e| FetchError::Stream(e.to_string()))?;

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| FetchError::Stream(e.to_string()))?;
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            for event in parse_stream_message(&text)? {
                match event {
                    StreamEvent::Authenticated => {
                        write
                            .send(Message::Text(self.subscribe_message().to_string()))
                            .await
                            .map_err(|e| FetchError::Stream(e.to_string()))?;
                    }
                    StreamEvent::Subscribed { bars, daily_bars } => log(
                        Level::Info,
                        Domain::Feed,
                        "stream_subscribed",
                        obj(&[("bars", json!(bars)), ("daily_bars", json!(daily_bars))]),
                    ),
                    StreamEvent::Bar { kind, symbol, tick } => {
                        log(
                            Level::Debug,
                            Domain::Feed,
                            "live_bar",
                            obj(&[
                                ("symbol", v_str(&symbol)),
                                ("stream", v_str(kind.as_wire())),
                                ("close", json!(tick.actual_value)),
                            ]),
                        );
                        if sender.send(tick).await.is_err() {
                            return Ok(());
                        }
                    }
                    StreamEvent::Error { code, msg } => {
                        return Err(FetchError::Stream(format!("{}: {}", code, msg)));
                    }
                    StreamEvent::Connected | StreamEvent::Ignored => {}
                }
            }
        }
        log(Level::Info, Domain::Feed, "stream_closed", obj(&[]));
        Ok(())
    }
}
