//! Session state machine.
//!
//! `Intro -> Practice -> Intermission -> Test -> Terminated`. The session owns
//! every piece of mutable experiment state (controller, score, RNG, log) and
//! drives a [`Presentation`] that shows things and reports key presses. Each
//! call to [`Session::step`] performs one transition or one trial.
//!
//! A trial is appended to the log only after it has been scored, and the log is
//! handed to the sink exactly once: on completion, on abort, or when the
//! presentation fails.

use crate::clock::{Clock, Countdown, Duration};
use crate::config::{secs, ExperimentConfig, ResponseMode};
use crate::error::{PresentationError, SessionError};
use crate::log::{LogSink, SessionLog, TrialRecord};
use crate::pools::StimulusPools;
use crate::prng::Prng;
use crate::reward::{BonusSchedule, Outcome, SessionScore};
use crate::staircase::DifficultyController;
use crate::trial::{
    is_correct, Choice, ChoiceLayout, Feedback, FeedbackKind, Phase, ResponseLayout, Stimulus,
};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Non-trial screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Screen {
    Welcome,
    Instructions { layout: ResponseLayout },
    Intermission { minutes: f64 },
    /// Fixation cross between trials.
    Fixation,
    Finished { score: f64, aborted: bool },
}

impl Screen {
    pub fn kind(&self) -> &'static str {
        match self {
            Screen::Welcome => "welcome",
            Screen::Instructions { .. } => "instructions",
            Screen::Intermission { .. } => "intermission",
            Screen::Fixation => "fixation",
            Screen::Finished { .. } => "finished",
        }
    }

    /// The participant has to press a key to leave this screen.
    pub fn waits_for_key(&self) -> bool {
        matches!(
            self,
            Screen::Welcome | Screen::Instructions { .. } | Screen::Intermission { .. }
        )
    }

    pub fn text(&self) -> String {
        match self {
            Screen::Welcome => "Welcome! Press any key to read the instructions.".to_string(),
            Screen::Instructions { layout } => {
                let keys = match layout {
                    ResponseLayout::Keyset => "any of keys 1-5 for the left shape or 6-0 for the right shape",
                    _ => "left or right",
                };
                format!(
                    "A shape will appear briefly. Then two reference shapes are shown. \
                     Choose the one it belongs with using {keys}. Press any key to start practice."
                )
            }
            Screen::Intermission { minutes } => format!(
                "Practice is over. The main task lasts {minutes:.0} minutes and every correct \
                 answer earns a bonus. Press any key to begin."
            ),
            Screen::Fixation => "+".to_string(),
            Screen::Finished { score, aborted } => {
                if *aborted {
                    format!("Session ended early. Bonus: ${score:.2}")
                } else {
                    format!("Thank you! Total bonus: ${score:.2}")
                }
            }
        }
    }
}

/// Display and input collaborator.
///
/// Durations passed to the presentation are to be spent before returning;
/// a live presentation sleeps, a simulated one advances its clock.
pub trait Presentation {
    fn show_screen(&mut self, screen: &Screen) -> Result<(), PresentationError>;

    /// Block until any key is pressed.
    fn wait_for_key(&mut self) -> Result<(), PresentationError>;

    fn display(&mut self, stimulus: &Stimulus) -> Result<(), PresentationError>;

    /// Show the two prototypes and the keys that select them.
    fn show_choices(
        &mut self,
        layout: &ChoiceLayout,
        left: &Path,
        right: &Path,
    ) -> Result<(), PresentationError>;

    fn pause(&mut self, duration: Duration) -> Result<(), PresentationError>;

    /// Wait up to `timeout` for one of `allowed`. `None` means no response.
    fn await_choice(
        &mut self,
        allowed: &[String],
        timeout: Duration,
    ) -> Result<Option<Choice>, PresentationError>;

    /// Non-blocking check for one of `allowed`.
    fn poll_key(&mut self, allowed: &[String]) -> Result<Option<String>, PresentationError>;

    /// For revealing stimuli: has the animation played to the end.
    fn is_animation_finished(&mut self) -> Result<bool, PresentationError>;

    fn show_feedback(&mut self, feedback: &Feedback, dwell: Duration)
        -> Result<(), PresentationError>;

    /// Checked once per trial, after feedback.
    fn abort_requested(&mut self, abort_key: &str) -> Result<bool, PresentationError>;

    fn close(&mut self) -> Result<(), PresentationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Intro,
    Practice,
    Intermission,
    Test,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Completed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTally {
    pub trials: u32,
    pub correct: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub practice_trials: u32,
    pub test_trials: u32,
    pub score: f64,
    pub final_level: u32,
    pub termination: Termination,
    /// Test trials per difficulty level.
    pub levels: HashMap<u32, LevelTally>,
}

pub struct Session<P, C, S> {
    config: ExperimentConfig,
    pools: StimulusPools,
    presentation: P,
    clock: C,
    sink: S,
    rng: Prng,

    state: SessionState,
    controller: DifficultyController,
    score: SessionScore,
    schedule: BonusSchedule,
    log: SessionLog,

    practice_cursor: usize,
    countdown: Option<Countdown>,
    trials: u32,
    practice_done: u32,
    test_done: u32,
    levels: HashMap<u32, LevelTally>,
    termination: Option<Termination>,
}

impl<P: Presentation, C: Clock, S: LogSink> Session<P, C, S> {
    pub fn new(
        config: ExperimentConfig,
        pools: StimulusPools,
        presentation: P,
        clock: C,
        sink: S,
    ) -> Self {
        let rng = config.seed.map(Prng::new).unwrap_or_else(Prng::from_entropy);
        let controller = DifficultyController::new(
            pools.levels(),
            config.trials_per_difficulty,
            config.accuracy_threshold,
        );
        let schedule = BonusSchedule::new(config.reward.checkpoints());
        Self {
            config,
            pools,
            presentation,
            clock,
            sink,
            rng,
            state: SessionState::Intro,
            controller,
            score: SessionScore::new(),
            schedule,
            log: SessionLog::new(),
            practice_cursor: 0,
            countdown: None,
            trials: 0,
            practice_done: 0,
            test_done: 0,
            levels: HashMap::new(),
            termination: None,
        }
    }

    /// Replace the RNG (e.g. to continue the stream used to build the pools).
    pub fn with_rng(mut self, rng: Prng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn level(&self) -> u32 {
        self.controller.level()
    }

    pub fn score(&self) -> f64 {
        self.score.total()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (P, S, SessionLog) {
        (self.presentation, self.sink, self.log)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            practice_trials: self.practice_done,
            test_trials: self.test_done,
            score: self.score.total(),
            final_level: self.controller.level(),
            termination: self.termination.unwrap_or(Termination::Failed),
            levels: self.levels.clone(),
        }
    }

    /// Run until terminated.
    pub fn run(&mut self) -> Result<SessionSummary, SessionError> {
        while self.state != SessionState::Terminated {
            self.step()?;
        }
        Ok(self.summary())
    }

    /// One transition or one trial. Returns the state afterwards.
    pub fn step(&mut self) -> Result<SessionState, SessionError> {
        if self.state == SessionState::Terminated {
            return Err(SessionError::Terminated);
        }
        match self.advance() {
            Ok(state) => Ok(state),
            Err(e) => {
                error!(error = %e, trials = self.log.len(), "session failed");
                self.termination = Some(Termination::Failed);
                self.state = SessionState::Terminated;
                if !self.log.is_persisted() {
                    if let Err(log_err) = self.log.persist(&mut self.sink) {
                        error!(error = %log_err, "could not persist session log");
                    }
                }
                if let Err(close_err) = self.presentation.close() {
                    warn!(error = %close_err, "could not close presentation");
                }
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Intro => {
                self.show_and_wait(&Screen::Welcome)?;
                self.show_and_wait(&Screen::Instructions {
                    layout: self.config.response_layout,
                })?;
                info!(practice = self.pools.practice().len(), "practice started");
                self.state = SessionState::Practice;
            }
            SessionState::Practice => match self.pools.practice().get(self.practice_cursor) {
                Some(stimulus) => {
                    let stimulus = stimulus.clone();
                    self.practice_cursor += 1;
                    self.run_trial(&stimulus)?;
                    self.check_abort()?;
                }
                None => self.state = SessionState::Intermission,
            },
            SessionState::Intermission => {
                self.show_and_wait(&Screen::Intermission {
                    minutes: self.config.test_duration_secs / 60.0,
                })?;
                self.controller.reset();
                self.schedule = BonusSchedule::new(self.config.reward.checkpoints());
                self.countdown = Some(Countdown::start(&self.clock, self.config.test_duration()));
                info!(budget = ?self.config.test_duration(), "test started");
                self.state = SessionState::Test;
            }
            SessionState::Test => {
                let Some(countdown) = self.countdown else {
                    return Err(SessionError::Terminated);
                };
                if countdown.expired(&self.clock) {
                    self.finish(Termination::Completed)?;
                } else {
                    let level = self.controller.update();
                    let stimulus = self.pools.draw(level, &mut self.rng)?.clone();
                    self.run_trial(&stimulus)?;
                    if self.state == SessionState::Test {
                        self.check_abort()?;
                    }
                    if self.state == SessionState::Test {
                        let added = self.schedule.unlock(countdown.elapsed(&self.clock));
                        if added > 0.0 {
                            info!(added, total = self.schedule.additional(), "bonus checkpoint reached");
                        }
                    }
                }
            }
            SessionState::Terminated => return Err(SessionError::Terminated),
        }
        Ok(self.state)
    }

    fn show_and_wait(&mut self, screen: &Screen) -> Result<(), SessionError> {
        self.presentation.show_screen(screen)?;
        if screen.waits_for_key() {
            self.presentation.wait_for_key()?;
        }
        Ok(())
    }

    fn check_abort(&mut self) -> Result<(), SessionError> {
        if self.presentation.abort_requested(&self.config.abort_key)? {
            info!(trials = self.log.len(), "abort requested");
            self.finish(Termination::Aborted)?;
        }
        Ok(())
    }

    /// Persist the log, say goodbye and close the presentation.
    fn finish(&mut self, how: Termination) -> Result<(), SessionError> {
        self.termination = Some(how);
        self.state = SessionState::Terminated;
        self.log.persist(&mut self.sink)?;
        info!(
            termination = ?how,
            trials = self.log.len(),
            score = self.score.total(),
            "session finished"
        );
        // The log is safe by now; a failing goodbye does not change the outcome.
        let goodbye = Screen::Finished {
            score: self.score.total(),
            aborted: how == Termination::Aborted,
        };
        if let Err(e) = self.presentation.show_screen(&goodbye) {
            warn!(error = %e, "could not show the final screen");
        }
        if let Err(e) = self.presentation.close() {
            warn!(error = %e, "could not close presentation");
        }
        Ok(())
    }

    fn now_secs(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    fn prototype_paths(&self, layout: &ChoiceLayout) -> (&Path, &Path) {
        let empty = Path::new("");
        (
            self.pools.prototype(layout.left_category).unwrap_or(empty),
            self.pools.prototype(layout.right_category).unwrap_or(empty),
        )
    }

    /// Present one stimulus and collect a response. Returns the response, the
    /// stimulus onset and the blank delay used.
    fn present(
        &mut self,
        stimulus: &Stimulus,
        layout: &ChoiceLayout,
    ) -> Result<(Option<Choice>, f64, Option<f64>), SessionError> {
        let allowed = layout.allowed_keys();
        match self.config.response_mode {
            ResponseMode::Timed => {
                let onset = self.now_secs();
                self.presentation.display(stimulus)?;
                self.presentation.pause(self.config.stimulus_duration())?;

                let mut delay = self.config.delay_secs;
                if stimulus.phase == Phase::Train {
                    let [lo, hi] = self.config.practice_delay_jitter_secs;
                    delay += self.rng.gen_range_f64(lo, hi);
                }
                self.presentation.pause(secs(delay))?;

                let (left, right) = self.prototype_paths(layout);
                let (left, right) = (left.to_path_buf(), right.to_path_buf());
                self.presentation.show_choices(layout, &left, &right)?;
                let choice = self
                    .presentation
                    .await_choice(&allowed, self.config.response_window())?;
                Ok((choice, onset, Some(delay)))
            }
            ResponseMode::Reveal => {
                let (left, right) = self.prototype_paths(layout);
                let (left, right) = (left.to_path_buf(), right.to_path_buf());
                self.presentation.show_choices(layout, &left, &right)?;

                let start = self.clock.elapsed();
                self.presentation.display(stimulus)?;
                let limit = self.config.animation_duration();
                loop {
                    if let Some(key) = self.presentation.poll_key(&allowed)? {
                        let rt = self.clock.elapsed().saturating_sub(start);
                        return Ok((Some(Choice { key, rt }), start.as_secs_f64(), None));
                    }
                    if self.presentation.is_animation_finished()?
                        || self.clock.elapsed().saturating_sub(start) >= limit
                    {
                        return Ok((None, start.as_secs_f64(), None));
                    }
                    self.presentation.pause(self.config.refresh_interval())?;
                }
            }
        }
    }

    fn run_trial(&mut self, stimulus: &Stimulus) -> Result<(), SessionError> {
        let iti_onset = self.now_secs();
        self.presentation.show_screen(&Screen::Fixation)?;

        let layout = self.config.response_layout.arrange(&mut self.rng);
        let (response, stimulus_onset, t_delay) = self.present(stimulus, &layout)?;

        let correct_keys = layout.keys_for(stimulus.category).to_vec();
        let correct = is_correct(response.as_ref(), &correct_keys);
        let (outcome, kind) = match &response {
            Some(c) if correct => (Outcome::Correct { rt: c.rt }, FeedbackKind::Correct),
            Some(_) => (Outcome::Incorrect, FeedbackKind::Wrong),
            None => (Outcome::Omission, FeedbackKind::TimedOut),
        };
        if response.is_none() {
            warn!(stimulus = stimulus.id, phase = stimulus.phase.as_str(), "no response");
        }

        let bonus = self.config.reward.trial_bonus(
            stimulus.phase,
            outcome,
            self.score.total(),
            self.schedule.additional(),
        );
        let score = self.score.apply(bonus);
        self.trials += 1;
        let feedback_onset = self.now_secs();

        self.log.append(TrialRecord {
            trial: self.trials,
            phase: stimulus.phase,
            stimulus_id: stimulus.id,
            stimulus: stimulus.path.display().to_string(),
            category: stimulus.category,
            difficulty: stimulus.difficulty,
            response: response.as_ref().map(|c| c.key.clone()).unwrap_or_default(),
            correct: u8::from(correct),
            correct_response: correct_keys.join("|"),
            response_time: response.as_ref().map(|c| c.rt.as_secs_f64()),
            bonus,
            score,
            t_delay,
            iti_onset: Some(iti_onset),
            stimulus_onset: Some(stimulus_onset),
            feedback_onset: Some(feedback_onset),
        });

        match stimulus.phase {
            Phase::Train => self.practice_done += 1,
            Phase::Test => {
                self.test_done += 1;
                self.controller.record(correct, stimulus.difficulty);
                let tally = self.levels.entry(stimulus.difficulty).or_default();
                tally.trials += 1;
                tally.correct += u32::from(correct);
            }
        }
        debug!(
            trial = self.trials,
            phase = stimulus.phase.as_str(),
            difficulty = stimulus.difficulty,
            correct,
            bonus,
            score,
            "trial scored"
        );

        let feedback = Feedback {
            kind,
            phase: stimulus.phase,
            bonus,
            score,
        };
        self.presentation
            .show_feedback(&feedback, self.config.feedback_dwell(correct))?;
        Ok(())
    }
}
