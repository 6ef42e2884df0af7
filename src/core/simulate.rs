//! Simulated participant.
//!
//! A [`Presentation`] that answers on its own and advances a [`ManualClock`] by
//! every pause and dwell, so a full timed session runs instantly. Accuracy
//! falls with difficulty, which gives the staircase something to track.

use crate::clock::{Clock, Duration, ManualClock};
use crate::config::secs;
use crate::error::PresentationError;
use crate::prng::Prng;
use crate::session::{Presentation, Screen};
use crate::trial::{Choice, ChoiceLayout, Feedback, Stimulus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::trace;

fn default_accuracy() -> Vec<f64> {
    vec![0.95, 0.9, 0.8, 0.7, 0.6]
}

fn default_rt_range_secs() -> [f64; 2] {
    [0.35, 1.2]
}

fn default_omission_rate() -> f64 {
    0.02
}

fn default_reading_secs() -> f64 {
    3.0
}

fn default_animation_secs() -> f64 {
    5.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    /// Probability of a correct answer per difficulty level, easiest first.
    #[serde(default = "default_accuracy")]
    pub accuracy: Vec<f64>,
    #[serde(default = "default_rt_range_secs")]
    pub rt_range_secs: [f64; 2],
    #[serde(default = "default_omission_rate")]
    pub omission_rate: f64,
    /// Time spent on each instruction screen.
    #[serde(default = "default_reading_secs")]
    pub reading_secs: f64,
    #[serde(default = "default_animation_secs")]
    pub animation_secs: f64,
    /// Press the abort key after this many trials.
    #[serde(default)]
    pub abort_after: Option<usize>,
}

impl Default for ParticipantProfile {
    fn default() -> Self {
        Self {
            accuracy: default_accuracy(),
            rt_range_secs: default_rt_range_secs(),
            omission_rate: default_omission_rate(),
            reading_secs: default_reading_secs(),
            animation_secs: default_animation_secs(),
            abort_after: None,
        }
    }
}

impl ParticipantProfile {
    /// Accuracy at `level`; levels past the table reuse its last entry.
    pub fn accuracy_at(&self, level: u32) -> f64 {
        let i = level.saturating_sub(1) as usize;
        self.accuracy
            .get(i)
            .or_else(|| self.accuracy.last())
            .copied()
            .unwrap_or(0.5)
    }
}

#[derive(Debug, Clone, Copy)]
struct Plan {
    correct: bool,
    rt: Duration,
}

pub struct SimulatedParticipant {
    clock: ManualClock,
    rng: Prng,
    profile: ParticipantProfile,

    category: u32,
    layout: Option<ChoiceLayout>,
    plan: Option<Plan>,
    shown_at: Duration,
    trials: usize,
    closed: bool,
}

impl SimulatedParticipant {
    pub fn new(clock: ManualClock, profile: ParticipantProfile, seed: u64) -> Self {
        Self {
            clock,
            rng: Prng::new(seed),
            profile,
            category: 0,
            layout: None,
            plan: None,
            shown_at: Duration::ZERO,
            trials: 0,
            closed: false,
        }
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn key(&mut self, correct: bool) -> Option<String> {
        let layout = self.layout.as_ref()?;
        let category = if correct {
            self.category
        } else if self.category == layout.left_category {
            layout.right_category
        } else {
            layout.left_category
        };
        // Keyset layouts accept any key of a side.
        let keys = layout.keys_for(category).to_vec();
        self.rng.choose(&keys).cloned()
    }
}

impl Presentation for SimulatedParticipant {
    fn show_screen(&mut self, screen: &Screen) -> Result<(), PresentationError> {
        trace!(screen = screen.kind(), "simulated screen");
        Ok(())
    }

    fn wait_for_key(&mut self) -> Result<(), PresentationError> {
        self.clock
            .advance(secs(self.profile.reading_secs));
        Ok(())
    }

    fn display(&mut self, stimulus: &Stimulus) -> Result<(), PresentationError> {
        if self.closed {
            return Err(PresentationError::Closed);
        }
        self.category = stimulus.category;
        self.shown_at = self.clock.elapsed();
        self.plan = if self.rng.gen_bool(self.profile.omission_rate) {
            None
        } else {
            let [lo, hi] = self.profile.rt_range_secs;
            Some(Plan {
                correct: self
                    .rng
                    .gen_bool(self.profile.accuracy_at(stimulus.difficulty)),
                rt: secs(self.rng.gen_range_f64(lo, hi)),
            })
        };
        Ok(())
    }

    fn show_choices(
        &mut self,
        layout: &ChoiceLayout,
        _left: &Path,
        _right: &Path,
    ) -> Result<(), PresentationError> {
        self.layout = Some(layout.clone());
        Ok(())
    }

    fn pause(&mut self, duration: Duration) -> Result<(), PresentationError> {
        self.clock.advance(duration);
        Ok(())
    }

    fn await_choice(
        &mut self,
        _allowed: &[String],
        timeout: Duration,
    ) -> Result<Option<Choice>, PresentationError> {
        match self.plan.take() {
            Some(plan) if plan.rt <= timeout => {
                self.clock.advance(plan.rt);
                Ok(self.key(plan.correct).map(|key| Choice { key, rt: plan.rt }))
            }
            _ => {
                self.clock.advance(timeout);
                Ok(None)
            }
        }
    }

    fn poll_key(&mut self, _allowed: &[String]) -> Result<Option<String>, PresentationError> {
        let waited = self.clock.elapsed().saturating_sub(self.shown_at);
        match self.plan {
            Some(plan) if waited >= plan.rt => {
                self.plan = None;
                Ok(self.key(plan.correct))
            }
            _ => Ok(None),
        }
    }

    fn is_animation_finished(&mut self) -> Result<bool, PresentationError> {
        let waited = self.clock.elapsed().saturating_sub(self.shown_at);
        Ok(waited.as_secs_f64() >= self.profile.animation_secs)
    }

    fn show_feedback(
        &mut self,
        feedback: &Feedback,
        dwell: Duration,
    ) -> Result<(), PresentationError> {
        trace!(message = %feedback.message(), "simulated feedback");
        self.trials += 1;
        self.clock.advance(dwell);
        Ok(())
    }

    fn abort_requested(&mut self, _abort_key: &str) -> Result<bool, PresentationError> {
        Ok(self.profile.abort_after == Some(self.trials))
    }

    fn close(&mut self) -> Result<(), PresentationError> {
        self.closed = true;
        Ok(())
    }
}
