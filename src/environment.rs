//! Environment side of the bridge: replay ticks, report how good the current
//! prediction is, and let the command listener move the prediction.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::data::Tick;
use crate::error::TransportError;
use crate::feedback::{evaluate, DEFAULT_DEADZONE};
use crate::logging::{log, log_feedback, obj, tick_aggregator, v_num, v_str, Domain, Level};
use crate::narsese::ActionToken;
use crate::prediction::SharedPredictionState;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub deadzone: f64,
    /// Replay the sequence forever instead of stopping after one pass.
    pub repeat: bool,
    /// Delay between ticks; zero runs the sequence as fast as it can be sent.
    pub pace: Duration,
    /// Start the prediction at the first tick's value.
    pub seed_prediction: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            deadzone: DEFAULT_DEADZONE,
            repeat: false,
            pace: Duration::ZERO,
            seed_prediction: true,
        }
    }
}

impl LoopConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            deadzone: cfg.deadzone,
            repeat: cfg.repeat,
            pace: cfg.pace(),
            seed_prediction: cfg.initial_predicted.is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub index: usize,
    pub ts: Option<i64>,
    pub actual: f64,
    pub predicted: f64,
    pub intent: ActionToken,
    pub frequency: f64,
    pub delivered: bool,
}

/// Everything observed during one pass over the tick sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunRecord {
    pub pass: u64,
    pub deadzone: f64,
    pub samples: Vec<Sample>,
}

impl RunRecord {
    pub fn mean_abs_error(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(|s| (s.actual - s.predicted).abs()).sum();
        total / self.samples.len() as f64
    }

    /// Fraction of ticks where the prediction was inside the dead zone.
    pub fn hold_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let (_, _, hold) = self.intent_counts();
        hold as f64 / self.samples.len() as f64
    }

    /// (up, down, hold)
    pub fn intent_counts(&self) -> (usize, usize, usize) {
        self.samples.iter().fold((0, 0, 0), |(u, d, h), s| match s.intent {
            ActionToken::Up => (u + 1, d, h),
            ActionToken::Down => (u, d + 1, h),
            ActionToken::Hold => (u, d, h + 1),
        })
    }

    pub fn dropped(&self) -> usize {
        self.samples.iter().filter(|s| !s.delivered).count()
    }
}

/// Called after each completed pass (e.g. to persist or summarise results).
pub trait PostRunHook: Send {
    fn name(&self) -> &str;
    fn on_run_complete(&mut self, record: &RunRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: u64,
    pub ticks: u64,
    pub dropped: u64,
}

/// Per-tick machinery. Only this is borrowed across a step's awaits, so
/// hooks need not be `Sync`.
struct Stepper {
    state: SharedPredictionState,
    transport: Transport,
    destination: SocketAddr,
    cfg: LoopConfig,
}

impl Stepper {
    async fn step(&self, index: usize, tick: &Tick) -> Result<Sample, TransportError> {
        let snap = self.state.snapshot();
        let feedback = evaluate(snap.predicted, tick.actual_value, self.cfg.deadzone);
        log_feedback(
            snap.predicted,
            tick.actual_value,
            feedback.intent.name(),
            feedback.judgment.truth.frequency,
        );

        let delivered = match self
            .transport
            .send_text(&feedback.message(), self.destination)
            .await
        {
            Ok(_) => true,
            Err(TransportError::Closed) => return Err(TransportError::Closed),
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Env,
                    "send_dropped",
                    obj(&[("error", v_str(&err.to_string())), ("index", json!(index))]),
                );
                false
            }
        };

        if self.cfg.pace.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.cfg.pace).await;
        }
        tick_aggregator();

        Ok(Sample {
            index,
            ts: tick.ts,
            actual: tick.actual_value,
            predicted: snap.predicted,
            intent: feedback.intent,
            frequency: feedback.judgment.truth.frequency,
            delivered,
        })
    }

    fn seed(&self, tick: &Tick) {
        if self.cfg.seed_prediction {
            self.state.set_predicted(tick.actual_value);
            log(
                Level::Info,
                Domain::Env,
                "prediction_seeded",
                obj(&[("predicted", v_num(tick.actual_value))]),
            );
        }
    }
}

pub struct EnvironmentLoop {
    stepper: Stepper,
    hooks: Vec<Box<dyn PostRunHook>>,
}

impl EnvironmentLoop {
    pub fn new(
        state: SharedPredictionState,
        transport: Transport,
        destination: SocketAddr,
        cfg: LoopConfig,
    ) -> Self {
        Self {
            stepper: Stepper {
                state,
                transport,
                destination,
                cfg,
            },
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Box<dyn PostRunHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    fn finish_pass(&mut self, record: &RunRecord, summary: &mut RunSummary) {
        summary.passes += 1;
        summary.ticks += record.samples.len() as u64;
        summary.dropped += record.dropped() as u64;
        log(
            Level::Info,
            Domain::Env,
            "pass_complete",
            obj(&[
                ("pass", json!(record.pass)),
                ("ticks", json!(record.samples.len())),
                ("mean_abs_error", v_num(record.mean_abs_error())),
                ("dropped", json!(record.dropped())),
            ]),
        );
        for hook in self.hooks.iter_mut() {
            if let Err(err) = hook.on_run_complete(record) {
                log(
                    Level::Warn,
                    Domain::Env,
                    "hook_failed",
                    obj(&[("hook", v_str(hook.name())), ("error", v_str(&err.to_string()))]),
                );
            }
        }
    }

    /// Replay `ticks` once, or forever when `repeat` is set.
    pub async fn run(&mut self, ticks: &[Tick]) -> Result<RunSummary, TransportError> {
        let mut summary = RunSummary::default();
        let Some(first) = ticks.first() else {
            log(Level::Warn, Domain::Env, "empty_sequence", obj(&[]));
            return Ok(summary);
        };
        self.stepper.seed(first);

        let mut pass = 0u64;
        loop {
            let mut record = RunRecord {
                pass,
                deadzone: self.stepper.cfg.deadzone,
                samples: Vec::with_capacity(ticks.len()),
            };
            for (i, tick) in ticks.iter().enumerate() {
                record.samples.push(self.stepper.step(i, tick).await?);
            }
            self.finish_pass(&record, &mut summary);
            if !self.stepper.cfg.repeat {
                return Ok(summary);
            }
            pass += 1;
        }
    }

    /// Drive the loop from a push stream until the sender side closes.
    pub async fn run_stream(&mut self, mut ticks: mpsc::Receiver<Tick>) -> Result<RunSummary, TransportError> {
        let mut summary = RunSummary::default();
        let mut record = RunRecord {
            pass: 0,
            deadzone: self.stepper.cfg.deadzone,
            samples: Vec::new(),
        };
        let mut index = 0usize;
        while let Some(tick) = ticks.recv().await {
            if index == 0 {
                self.stepper.seed(&tick);
            }
            record.samples.push(self.stepper.step(index, &tick).await?);
            index += 1;
        }
        self.finish_pass(&record, &mut summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narsese::Codec;
    use std::sync::{Arc, Mutex};

    struct Capture(Arc<Mutex<Vec<RunRecord>>>);

    impl PostRunHook for Capture {
        fn name(&self) -> &str {
            "capture"
        }
        fn on_run_complete(&mut self, record: &RunRecord) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    async fn pair() -> (Transport, Transport) {
        let env = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let agent = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (env, agent)
    }

    #[tokio::test]
    async fn one_pass_sends_one_message_per_tick() {
        let (env, agent) = pair().await;
        let state = SharedPredictionState::new(0.0, 1.0);
        let records = Arc::new(Mutex::new(Vec::new()));
        let mut lp = EnvironmentLoop::new(state, env, agent.local_addr(), LoopConfig::default())
            .with_hook(Box::new(Capture(records.clone())));

        let ticks = [Tick::new(100.0, 1, 1), Tick::new(105.0, 1, 1), Tick::new(99.5, 1, 1)];
        let summary = lp.run(&ticks).await.unwrap();
        assert_eq!(summary, RunSummary { passes: 1, ticks: 3, dropped: 0 });

        let codec = Codec::default();
        let first = agent.receive(1024).await.unwrap();
        assert_eq!(first.text(), "<{SELF} --> [good]>. %1;0.9%");
        let second = agent.receive(1024).await.unwrap();
        assert_eq!(
            second.text(),
            "<{up} --> [on]>. %1;0.9%|<{SELF} --> [good]>. %0.95;0.9%"
        );
        let third = agent.receive(1024).await.unwrap();
        assert_eq!(codec.decode_message(&third.text()).unwrap().len(), 1);

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].intent_counts(), (1, 0, 2));
        assert_eq!(records[0].samples[0].predicted, 100.0);
    }

    #[tokio::test]
    async fn explicit_prediction_is_not_overwritten() {
        let (env, agent) = pair().await;
        let state = SharedPredictionState::new(50.0, 1.0);
        let cfg = LoopConfig {
            seed_prediction: false,
            ..LoopConfig::default()
        };
        let mut lp = EnvironmentLoop::new(state.clone(), env, agent.local_addr(), cfg);
        lp.run(&[Tick::new(40.0, 0, 0)]).await.unwrap();
        let dg = agent.receive(1024).await.unwrap();
        assert_eq!(dg.text(), "<{down} --> [on]>. %1;0.9%|<{SELF} --> [good]>. %0.8;0.9%");
        assert_eq!(state.snapshot().predicted, 50.0);
    }

    #[tokio::test]
    async fn empty_sequence_is_a_no_op() {
        let (env, agent) = pair().await;
        let cfg = LoopConfig {
            repeat: true,
            ..LoopConfig::default()
        };
        let mut lp = EnvironmentLoop::new(SharedPredictionState::default(), env, agent.local_addr(), cfg);
        assert_eq!(lp.run(&[]).await.unwrap(), RunSummary::default());
    }

    #[tokio::test]
    async fn repeat_runs_until_transport_closes() {
        let (env, agent) = pair().await;
        let closer = env.clone();
        let records = Arc::new(Mutex::new(Vec::new()));
        let cfg = LoopConfig {
            repeat: true,
            pace: Duration::from_millis(1),
            ..LoopConfig::default()
        };
        let mut lp = EnvironmentLoop::new(SharedPredictionState::default(), env, agent.local_addr(), cfg)
            .with_hook(Box::new(Capture(records.clone())));
        let handle = tokio::spawn(async move { lp.run(&[Tick::new(1.0, 0, 0), Tick::new(2.0, 0, 0)]).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        closer.close();
        let res = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(matches!(res, Err(TransportError::Closed)));
        assert!(records.lock().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn stream_mode_consumes_until_sender_drops() {
        let (env, agent) = pair().await;
        let (tx, rx) = mpsc::channel(8);
        let mut lp = EnvironmentLoop::new(SharedPredictionState::default(), env, agent.local_addr(), LoopConfig::default());
        tx.send(Tick::new(10.0, 0, 0)).await.unwrap();
        tx.send(Tick::new(20.0, 0, 0)).await.unwrap();
        drop(tx);
        let summary = lp.run_stream(rx).await.unwrap();
        assert_eq!(summary.ticks, 2);
        agent.receive(1024).await.unwrap();
        let second = agent.receive(1024).await.unwrap();
        assert!(second.text().starts_with("<{up} --> [on]>"));
    }

    #[test]
    fn record_statistics() {
        let sample = |actual: f64, predicted: f64, intent| Sample {
            index: 0,
            ts: None,
            actual,
            predicted,
            intent,
            frequency: 1.0,
            delivered: true,
        };
        let record = RunRecord {
            pass: 0,
            deadzone: 1.0,
            samples: vec![
                sample(10.0, 10.0, ActionToken::Hold),
                sample(14.0, 10.0, ActionToken::Up),
            ],
        };
        assert_eq!(record.mean_abs_error(), 2.0);
        assert_eq!(record.hold_ratio(), 0.5);
        assert_eq!(record.dropped(), 0);
        assert_eq!(RunRecord::default().mean_abs_error(), 0.0);
    }
}
