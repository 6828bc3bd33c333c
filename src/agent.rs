//! Agent side of the bridge: receive perceptions, hand them to a reasoner,
//! and execute whatever it derives (or a babbled fallback).

use serde_json::json;

use crate::babbling::BabblingSelector;
use crate::config::{Config, PerceptionPolicy};
use crate::error::{ChannelError, DecodeError, TransportError};
use crate::logging::{log, log_decode_error, log_transition, obj, v_str, Domain, Level};
use crate::narsese::{ActionToken, Codec, Judgment, CONNECTION_FAILED, SEPARATOR};
use crate::operations::OperationRegistry;
use crate::transport::{Transport, DEFAULT_MAX_DATAGRAM};

/// The reasoning engine behind the channel. Called synchronously, one cycle
/// at a time.
pub trait Reasoner: Send {
    fn ingest_perception(&mut self, judgment: &Judgment);
    /// `None` means nothing derivable right now.
    fn derive_action(&mut self, candidates: &[ActionToken]) -> Option<ActionToken>;
}

/// Never derives anything; every action comes from babbling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReasoner;

impl Reasoner for NullReasoner {
    fn ingest_perception(&mut self, _judgment: &Judgment) {}

    fn derive_action(&mut self, _candidates: &[ActionToken]) -> Option<ActionToken> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    PerceptionReceived,
    Derived,
    Babbled,
    NoAction,
    Executed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::PerceptionReceived => "perception_received",
            ChannelState::Derived => "derived",
            ChannelState::Babbled => "babbled",
            ChannelState::NoAction => "no_action",
            ChannelState::Executed => "executed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Derived(Vec<ActionToken>),
    Babbled(ActionToken),
    NoAction,
}

impl CycleOutcome {
    pub fn actions(&self) -> &[ActionToken] {
        match self {
            CycleOutcome::Derived(tokens) => tokens,
            CycleOutcome::Babbled(token) => std::slice::from_ref(token),
            CycleOutcome::NoAction => &[],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    pub max_actions_per_cycle: usize,
    pub policy: PerceptionPolicy,
    pub max_datagram: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_actions_per_cycle: 1,
            policy: PerceptionPolicy::Strict,
            max_datagram: DEFAULT_MAX_DATAGRAM,
        }
    }
}

impl AgentConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_actions_per_cycle: cfg.max_actions_per_cycle.max(1),
            policy: cfg.perception_policy,
            max_datagram: cfg.max_datagram,
        }
    }
}

/// Counters kept across cycles, reported on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub cycles: u64,
    pub derived: u64,
    pub babbled: u64,
    pub idle: u64,
    pub skipped: u64,
    /// Actions whose send failed; the cycle still completes.
    pub dropped_actions: u64,
}

pub struct AgentChannel<R: Reasoner> {
    transport: Transport,
    codec: Codec,
    registry: OperationRegistry,
    reasoner: R,
    babbling: BabblingSelector,
    cfg: AgentConfig,
    state: ChannelState,
    stats: ChannelStats,
}

impl<R: Reasoner> AgentChannel<R> {
    pub fn new(
        transport: Transport,
        registry: OperationRegistry,
        reasoner: R,
        babbling: BabblingSelector,
        cfg: AgentConfig,
    ) -> Self {
        Self {
            transport,
            codec: registry.codec(),
            registry,
            reasoner,
            babbling,
            cfg,
            state: ChannelState::Idle,
            stats: ChannelStats::default(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn reasoner(&self) -> &R {
        &self.reasoner
    }

    pub fn babbling(&self) -> &BabblingSelector {
        &self.babbling
    }

    fn transition(&mut self, to: ChannelState) {
        log_transition(self.state.as_str(), to.as_str());
        self.state = to;
    }

    /// Decode a perception datagram into judgments.
    pub fn perceive(&self, text: &str) -> Result<Vec<Judgment>, DecodeError> {
        if text.trim() == CONNECTION_FAILED {
            return Ok(Vec::new());
        }
        // every part must decode; an empty part is an error here
        text.split(SEPARATOR)
            .map(|part| self.codec.decode_judgment(part))
            .collect()
    }

    fn choose(&mut self) -> CycleOutcome {
        let candidates = self.registry.candidates();
        let mut derived: Vec<ActionToken> = Vec::new();
        while derived.len() < self.cfg.max_actions_per_cycle {
            match self.reasoner.derive_action(&candidates) {
                Some(token) if !derived.contains(&token) => derived.push(token),
                _ => break,
            }
        }
        if !derived.is_empty() {
            return CycleOutcome::Derived(derived);
        }
        match self.babbling.try_select(&candidates) {
            Some(token) => CycleOutcome::Babbled(token),
            None => CycleOutcome::NoAction,
        }
    }

    /// Process an already received perception text.
    pub async fn process(&mut self, text: &str) -> Result<CycleOutcome, ChannelError> {
        self.transition(ChannelState::PerceptionReceived);
        let judgments = match self.perceive(text) {
            Ok(j) => j,
            Err(err) => {
                log_decode_error("agent", text, &err.to_string());
                self.transition(ChannelState::Idle);
                return Err(err.into());
            }
        };
        for j in &judgments {
            self.reasoner.ingest_perception(j);
        }

        let outcome = self.choose();
        self.stats.cycles += 1;
        match &outcome {
            CycleOutcome::Derived(_) => {
                self.stats.derived += 1;
                self.transition(ChannelState::Derived);
            }
            CycleOutcome::Babbled(_) => {
                self.stats.babbled += 1;
                self.transition(ChannelState::Babbled);
            }
            CycleOutcome::NoAction => {
                self.stats.idle += 1;
                self.transition(ChannelState::NoAction);
                self.transition(ChannelState::Idle);
                return Ok(outcome);
            }
        }

        for token in outcome.actions() {
            match self.registry.execute(*token, &self.transport).await {
                Ok(true) => {}
                Ok(false) => log(
                    Level::Warn,
                    Domain::Agent,
                    "unregistered_action",
                    obj(&[("token", v_str(token.wire()))]),
                ),
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(err) => {
                    self.stats.dropped_actions += 1;
                    log(
                        Level::Warn,
                        Domain::Agent,
                        "action_dropped",
                        obj(&[("token", v_str(token.wire())), ("error", v_str(&err.to_string()))]),
                    );
                }
            }
        }
        self.transition(ChannelState::Executed);
        self.transition(ChannelState::Idle);
        Ok(outcome)
    }

    /// One full cycle: block for a perception, then process it.
    pub async fn cycle(&mut self) -> Result<CycleOutcome, ChannelError> {
        let dg = self.transport.receive(self.cfg.max_datagram).await?;
        if dg.truncated {
            log(
                Level::Warn,
                Domain::Agent,
                "perception_truncated",
                obj(&[("len", json!(dg.payload.len()))]),
            );
        }
        self.process(&dg.text()).await
    }

    /// Run cycles until the transport closes.
    pub async fn run(&mut self) -> Result<ChannelStats, ChannelError> {
        loop {
            match self.cycle().await {
                Ok(_) => {}
                Err(ChannelError::Transport(TransportError::Closed)) => {
                    log(Level::Info, Domain::Agent, "channel_closed", obj(&[]));
                    return Ok(self.stats);
                }
                Err(ChannelError::Decode(err)) if self.cfg.policy == PerceptionPolicy::Skip => {
                    self.stats.skipped += 1;
                    log(
                        Level::Debug,
                        Domain::Agent,
                        "perception_skipped",
                        obj(&[("error", v_str(&err.to_string()))]),
                    );
                }
                Err(err) => {
                    log(
                        Level::Error,
                        Domain::Agent,
                        "channel_failed",
                        obj(&[("error", v_str(&err.to_string()))]),
                    );
                    return Err(err);
                }
            }
        }
    }
}
