//! Channel-backed presentation.
//!
//! The session runs on a blocking worker thread. Everything it wants shown is
//! sent to the connection task as a [`DaemonEvent`]; key presses come back over
//! a std channel so the worker can block on them with a deadline.

use catmatch::clock::{Duration, Instant};
use catmatch::error::PresentationError;
use catmatch::session::{Presentation, Screen};
use catmatch::trial::{Choice, ChoiceLayout, Feedback, FeedbackKind, Stimulus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Client -> daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Hello { participant: String, session: String },
    Key { key: String },
    Abort,
}

/// Daemon -> client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonEvent {
    Screen {
        kind: String,
        text: String,
        wait_for_key: bool,
    },
    Stimulus {
        id: u32,
        path: String,
    },
    Choices {
        left: String,
        right: String,
        left_keys: Vec<String>,
        right_keys: Vec<String>,
    },
    Feedback {
        text: String,
        correct: bool,
        bonus: f64,
        dwell_ms: u64,
    },
    Score {
        bonus: f64,
    },
    Finished {
        trials: u32,
        bonus: f64,
        aborted: bool,
    },
    Error {
        message: String,
    },
}

/// What the connection task forwards to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Key(String),
    Abort,
}

pub struct RemotePresentation {
    events: UnboundedSender<DaemonEvent>,
    keys: Receiver<Input>,
    abort_key: String,
    animation: Duration,
    shown_at: Option<Instant>,
    abort_pending: bool,
    disconnected: bool,
}

impl RemotePresentation {
    pub fn new(
        events: UnboundedSender<DaemonEvent>,
        keys: Receiver<Input>,
        abort_key: &str,
        animation: Duration,
    ) -> Self {
        Self {
            events,
            keys,
            abort_key: abort_key.to_string(),
            animation,
            shown_at: None,
            abort_pending: false,
            disconnected: false,
        }
    }

    fn send(&mut self, event: DaemonEvent) {
        if self.events.send(event).is_err() && !self.disconnected {
            warn!("client connection gone");
            self.disconnected = true;
        }
    }

    /// Abort keys are remembered for the post-feedback check; other keys pass through.
    fn filter(&mut self, input: Input) -> Option<String> {
        match input {
            Input::Abort => {
                self.abort_pending = true;
                None
            }
            Input::Key(k) if k == self.abort_key => {
                self.abort_pending = true;
                None
            }
            Input::Key(k) => Some(k),
        }
    }

    fn sleep(&self, d: Duration) {
        if !self.disconnected {
            std::thread::sleep(d);
        }
    }
}

impl Presentation for RemotePresentation {
    fn show_screen(&mut self, screen: &Screen) -> Result<(), PresentationError> {
        self.send(DaemonEvent::Screen {
            kind: screen.kind().to_string(),
            text: screen.text(),
            wait_for_key: screen.waits_for_key(),
        });
        Ok(())
    }

    fn wait_for_key(&mut self) -> Result<(), PresentationError> {
        loop {
            match self.keys.recv() {
                Ok(input) => {
                    if self.filter(input).is_some() {
                        return Ok(());
                    }
                }
                Err(_) => {
                    self.disconnected = true;
                    return Err(PresentationError::Closed);
                }
            }
        }
    }

    fn display(&mut self, stimulus: &Stimulus) -> Result<(), PresentationError> {
        self.shown_at = Some(Instant::now());
        self.send(DaemonEvent::Stimulus {
            id: stimulus.id,
            path: stimulus.path.display().to_string(),
        });
        Ok(())
    }

    fn show_choices(
        &mut self,
        layout: &ChoiceLayout,
        left: &Path,
        right: &Path,
    ) -> Result<(), PresentationError> {
        self.send(DaemonEvent::Choices {
            left: left.display().to_string(),
            right: right.display().to_string(),
            left_keys: layout.left_keys.clone(),
            right_keys: layout.right_keys.clone(),
        });
        Ok(())
    }

    fn pause(&mut self, duration: Duration) -> Result<(), PresentationError> {
        self.sleep(duration);
        Ok(())
    }

    fn await_choice(
        &mut self,
        allowed: &[String],
        timeout: Duration,
    ) -> Result<Option<Choice>, PresentationError> {
        let start = Instant::now();
        let deadline = start + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.disconnected {
                return Ok(None);
            }
            match self.keys.recv_timeout(remaining) {
                Ok(input) => {
                    if let Some(key) = self.filter(input) {
                        if allowed.contains(&key) {
                            return Ok(Some(Choice {
                                key,
                                rt: start.elapsed(),
                            }));
                        }
                        debug!(key = %key, "ignored key");
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    // Scored as an omission; the abort check ends the session.
                    self.disconnected = true;
                    return Ok(None);
                }
            }
        }
    }

    fn poll_key(&mut self, allowed: &[String]) -> Result<Option<String>, PresentationError> {
        loop {
            match self.keys.try_recv() {
                Ok(input) => {
                    if let Some(key) = self.filter(input) {
                        if allowed.contains(&key) {
                            return Ok(Some(key));
                        }
                    }
                }
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    return Ok(None);
                }
            }
        }
    }

    fn is_animation_finished(&mut self) -> Result<bool, PresentationError> {
        Ok(self.disconnected
            || self
                .shown_at
                .map_or(true, |t| t.elapsed() >= self.animation))
    }

    fn show_feedback(
        &mut self,
        feedback: &Feedback,
        dwell: Duration,
    ) -> Result<(), PresentationError> {
        self.send(DaemonEvent::Feedback {
            text: feedback.message(),
            correct: feedback.kind == FeedbackKind::Correct,
            bonus: feedback.bonus,
            dwell_ms: dwell.as_millis() as u64,
        });
        self.send(DaemonEvent::Score {
            bonus: feedback.score,
        });
        self.sleep(dwell);
        Ok(())
    }

    fn abort_requested(&mut self, abort_key: &str) -> Result<bool, PresentationError> {
        loop {
            match self.keys.try_recv() {
                Ok(Input::Key(k)) if k == abort_key => self.abort_pending = true,
                Ok(input) => {
                    self.filter(input);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        Ok(self.abort_pending || self.disconnected)
    }

    fn close(&mut self) -> Result<(), PresentationError> {
        debug!("presentation closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catmatch::trial::Phase;
    use std::path::PathBuf;
    use std::sync::mpsc;
    use tokio::sync::mpsc::unbounded_channel;

    fn remote() -> (
        RemotePresentation,
        tokio::sync::mpsc::UnboundedReceiver<DaemonEvent>,
        mpsc::Sender<Input>,
    ) {
        let (ev_tx, ev_rx) = unbounded_channel();
        let (key_tx, key_rx) = mpsc::channel();
        let p = RemotePresentation::new(ev_tx, key_rx, "escape", Duration::from_millis(50));
        (p, ev_rx, key_tx)
    }

    fn keys(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn buffered_key_is_returned_as_choice() {
        let (mut p, _ev, tx) = remote();
        tx.send(Input::Key("x".into())).unwrap();
        tx.send(Input::Key("left".into())).unwrap();
        let c = p
            .await_choice(&keys(&["left", "right"]), Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(c.key, "left");
    }

    #[test]
    fn silence_times_out() {
        let (mut p, _ev, _tx) = remote();
        let c = p
            .await_choice(&keys(&["left"]), Duration::from_millis(20))
            .unwrap();
        assert!(c.is_none());
    }

    #[test]
    fn escape_during_a_trial_aborts_after_feedback() {
        let (mut p, _ev, tx) = remote();
        tx.send(Input::Key("escape".into())).unwrap();
        assert!(p
            .await_choice(&keys(&["left"]), Duration::from_millis(20))
            .unwrap()
            .is_none());
        assert!(p.abort_requested("escape").unwrap());
    }

    #[test]
    fn disconnect_becomes_an_abort() {
        let (mut p, _ev, tx) = remote();
        drop(tx);
        assert!(p
            .await_choice(&keys(&["left"]), Duration::from_secs(5))
            .unwrap()
            .is_none());
        assert!(p.abort_requested("escape").unwrap());
        assert!(matches!(p.wait_for_key(), Err(PresentationError::Closed)));
    }

    #[test]
    fn events_are_forwarded_in_order() {
        let (mut p, mut ev, _tx) = remote();
        p.display(&Stimulus {
            id: 4,
            path: PathBuf::from("pack/cat_1/diff_1/ex_1_1_4.png"),
            category: 1,
            difficulty: 1,
            phase: Phase::Test,
        })
        .unwrap();
        p.show_feedback(
            &Feedback {
                kind: FeedbackKind::Correct,
                phase: Phase::Test,
                bonus: 0.09,
                score: 0.09,
            },
            Duration::ZERO,
        )
        .unwrap();

        assert!(matches!(
            ev.try_recv().unwrap(),
            DaemonEvent::Stimulus { id: 4, .. }
        ));
        assert!(matches!(
            ev.try_recv().unwrap(),
            DaemonEvent::Feedback { correct: true, .. }
        ));
        assert_eq!(ev.try_recv().unwrap(), DaemonEvent::Score { bonus: 0.09 });
    }
}
