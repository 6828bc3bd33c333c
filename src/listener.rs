use std::future::Future;

use anyhow::anyhow;
use tokio::task::JoinHandle;

use crate::error::{DecodeError, TransportError};
use crate::logging::{log, log_command, log_decode_error, obj, v_str, Domain, Level};
use crate::narsese::{split_message, ActionToken, Codec, Statement};
use crate::prediction::SharedPredictionState;
use crate::transport::Transport;

/// What one command datagram did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handled {
    pub applied: Vec<ActionToken>,
    /// Parts that were not commands, or the whole datagram when it had no parts.
    pub rejected: usize,
}

/// Environment-side receiver of action tokens. Decoded tokens move the
/// shared prediction; anything else is logged and dropped.
pub struct CommandListener {
    transport: Transport,
    state: SharedPredictionState,
    codec: Codec,
    max_datagram: usize,
}

impl CommandListener {
    pub fn new(transport: Transport, state: SharedPredictionState, codec: Codec, max_datagram: usize) -> Self {
        Self {
            transport,
            state,
            codec,
            max_datagram,
        }
    }

    /// Apply every token in one datagram, in order.
    pub fn handle(&self, text: &str) -> Handled {
        let mut handled = Handled::default();
        let parts = split_message(text);
        if parts.is_empty() {
            log_decode_error("env", text, &DecodeError::Empty.to_string());
            handled.rejected += 1;
            return handled;
        }
        for part in parts {
            match self.codec.decode(part) {
                Ok(Statement::Action(token)) => {
                    let after = self.state.apply_command(token);
                    log_command(token.wire(), after.predicted, after.augment);
                    handled.applied.push(token);
                }
                Ok(Statement::Judgment(j)) => {
                    handled.rejected += 1;
                    log(
                        Level::Warn,
                        Domain::Env,
                        "unexpected_judgment",
                        obj(&[("text", v_str(&j.to_string()))]),
                    );
                }
                Err(err) => {
                    handled.rejected += 1;
                    log_decode_error("env", part, &err.to_string());
                }
            }
        }
        handled
    }

    /// Runs until the transport is closed.
    pub async fn run(self) -> Result<(), TransportError> {
        loop {
            match self.transport.receive(self.max_datagram).await {
                Ok(dg) => {
                    self.handle(&dg.text());
                }
                Err(TransportError::Closed) => {
                    log(Level::Info, Domain::Env, "listener_stopped", obj(&[]));
                    return Ok(());
                }
                Err(err) => {
                    log(
                        Level::Error,
                        Domain::Env,
                        "listener_failed",
                        obj(&[("error", v_str(&err.to_string()))]),
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Detached background task; dropping the handle does not stop it and it
    /// never holds up runtime shutdown.
    pub fn spawn(self) -> JoinHandle<Result<(), TransportError>> {
        tokio::spawn(self.run())
    }
}

/// Drive `work` while watching the listener task. The listener ending first
/// is an error: commands would silently stop moving the prediction.
pub async fn run_alongside<T, F>(
    listener: &mut JoinHandle<Result<(), TransportError>>,
    work: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        res = work => res,
        joined = listener => {
            let err = match joined {
                Ok(Ok(())) => anyhow!("command listener stopped"),
                Ok(Err(err)) => anyhow::Error::new(err).context("command listener failed"),
                Err(err) => anyhow::Error::new(err).context("command listener task aborted"),
            };
            log(
                Level::Error,
                Domain::Env,
                "listener_lost",
                obj(&[("error", v_str(&format!("{:#}", err)))]),
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn listener(state: SharedPredictionState) -> (CommandListener, Transport) {
        let t = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (CommandListener::new(t.clone(), state, Codec::default(), 1024), t)
    }

    #[tokio::test]
    async fn handle_applies_known_tokens_only() {
        let state = SharedPredictionState::new(100.0, 100.0);
        let (l, _t) = listener(state.clone()).await;
        assert_eq!(l.handle("^up").applied, vec![ActionToken::Up]);
        assert_eq!(state.snapshot().predicted, 200.0);
        assert_eq!(l.handle("^jump"), Handled { applied: vec![], rejected: 1 });
        assert_eq!(l.handle("<{SELF} --> [good]>. %1;0.9%").rejected, 1);
        assert_eq!(state.snapshot().predicted, 200.0);
        assert_eq!(
            l.handle("^down|hold|down").applied,
            vec![ActionToken::Down, ActionToken::Hold, ActionToken::Down]
        );
        assert_eq!(state.snapshot().predicted, 0.0);
    }

    #[tokio::test]
    async fn empty_command_datagrams_are_rejected() {
        let state = SharedPredictionState::new(5.0, 1.0);
        let (l, _t) = listener(state.clone()).await;
        for text in ["", "   ", "||", " | "] {
            assert_eq!(l.handle(text), Handled { applied: vec![], rejected: 1 }, "{:?}", text);
        }
        assert_eq!(state.snapshot().predicted, 5.0);
    }

    #[tokio::test]
    async fn run_alongside_reports_a_lost_listener() {
        let (l, t) = listener(SharedPredictionState::default()).await;
        let mut handle = l.spawn();
        t.close();
        let res: anyhow::Result<()> = run_alongside(&mut handle, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(res.unwrap_err().to_string().contains("listener"));
    }

    #[tokio::test]
    async fn run_alongside_returns_work_result() {
        let (l, t) = listener(SharedPredictionState::default()).await;
        let mut handle = l.spawn();
        let res = run_alongside(&mut handle, async { Ok(7) }).await.unwrap();
        assert_eq!(res, 7);
        t.close();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn background_task_applies_datagrams_and_stops_on_close() {
        let state = SharedPredictionState::new(10.0, 1.0);
        let (l, t) = listener(state.clone()).await;
        let handle = l.spawn();

        let sender = Transport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        sender.send_text("^up", t.local_addr()).await.unwrap();
        sender.send_text("^up", t.local_addr()).await.unwrap();

        let mut predicted = 0.0;
        for _ in 0..100 {
            predicted = state.snapshot().predicted;
            if predicted == 12.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(predicted, 12.0);

        t.close();
        let res = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(res.is_ok());
    }
}
