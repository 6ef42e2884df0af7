//! Experiment configuration.
//!
//! Every field has a default matching the deployed experiment, so a config
//! file only needs the values it changes.

use crate::clock::Duration;
use crate::error::ConfigError;
use crate::reward::RewardPolicy;
use crate::trial::ResponseLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    #[default]
    WithoutReplacement,
    /// Legacy behavior: training picks may repeat.
    WithReplacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeOrder {
    Listed,
    #[default]
    Shuffled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Stimulus, blank delay, then a bounded response window.
    #[default]
    Timed,
    /// Continuously revealing animation; responses polled until it ends.
    Reveal,
}

fn default_categories() -> u32 {
    2
}

fn default_difficulty_levels() -> u32 {
    5
}

fn default_trials_per_difficulty() -> usize {
    5
}

fn default_accuracy_threshold() -> f64 {
    0.75
}

fn default_practice_trials() -> usize {
    10
}

fn default_practice_fractions() -> Vec<f64> {
    vec![0.6, 0.4, 0.0, 0.0, 0.0]
}

fn default_test_duration_secs() -> f64 {
    600.0
}

fn default_stimulus_secs() -> f64 {
    1.0
}

fn default_delay_secs() -> f64 {
    0.85
}

fn default_practice_delay_jitter_secs() -> [f64; 2] {
    [0.0, 0.4]
}

fn default_response_window_secs() -> f64 {
    4.0
}

fn default_correct_feedback_secs() -> f64 {
    1.5
}

fn default_incorrect_feedback_secs() -> f64 {
    5.0
}

fn default_animation_secs() -> f64 {
    5.5
}

fn default_refresh_secs() -> f64 {
    1.0 / 60.0
}

fn default_abort_key() -> String {
    "escape".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_categories")]
    pub categories: u32,
    #[serde(default = "default_difficulty_levels")]
    pub difficulty_levels: u32,
    #[serde(default = "default_trials_per_difficulty")]
    pub trials_per_difficulty: usize,
    #[serde(default = "default_accuracy_threshold")]
    pub accuracy_threshold: f64,

    #[serde(default = "default_practice_trials")]
    pub practice_trials: usize,
    /// Fraction of `practice_trials` drawn from each difficulty level.
    #[serde(default = "default_practice_fractions")]
    pub practice_fractions: Vec<f64>,
    #[serde(default)]
    pub practice_order: PracticeOrder,
    #[serde(default)]
    pub sampling: SamplingMode,

    #[serde(default = "default_test_duration_secs")]
    pub test_duration_secs: f64,
    #[serde(default = "default_stimulus_secs")]
    pub stimulus_secs: f64,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
    /// Extra uniform delay added on practice trials.
    #[serde(default = "default_practice_delay_jitter_secs")]
    pub practice_delay_jitter_secs: [f64; 2],
    #[serde(default = "default_response_window_secs")]
    pub response_window_secs: f64,
    #[serde(default = "default_correct_feedback_secs")]
    pub correct_feedback_secs: f64,
    #[serde(default = "default_incorrect_feedback_secs")]
    pub incorrect_feedback_secs: f64,

    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default = "default_animation_secs")]
    pub animation_secs: f64,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: f64,
    #[serde(default)]
    pub response_layout: ResponseLayout,

    #[serde(default)]
    pub reward: RewardPolicy,

    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_abort_key")]
    pub abort_key: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            difficulty_levels: default_difficulty_levels(),
            trials_per_difficulty: default_trials_per_difficulty(),
            accuracy_threshold: default_accuracy_threshold(),
            practice_trials: default_practice_trials(),
            practice_fractions: default_practice_fractions(),
            practice_order: PracticeOrder::default(),
            sampling: SamplingMode::default(),
            test_duration_secs: default_test_duration_secs(),
            stimulus_secs: default_stimulus_secs(),
            delay_secs: default_delay_secs(),
            practice_delay_jitter_secs: default_practice_delay_jitter_secs(),
            response_window_secs: default_response_window_secs(),
            correct_feedback_secs: default_correct_feedback_secs(),
            incorrect_feedback_secs: default_incorrect_feedback_secs(),
            response_mode: ResponseMode::default(),
            animation_secs: default_animation_secs(),
            refresh_secs: default_refresh_secs(),
            response_layout: ResponseLayout::default(),
            reward: RewardPolicy::default(),
            seed: None,
            abort_key: default_abort_key(),
        }
    }
}

/// Longest duration a config may ask for (one day).
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Seconds to a `Duration`, clamped to `[0, MAX_DURATION_SECS]`; NaN becomes zero.
pub(crate) fn secs(v: f64) -> Duration {
    Duration::try_from_secs_f64(v.clamp(0.0, MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}

fn check_duration(name: &str, v: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let low_ok = if allow_zero { v >= 0.0 } else { v > 0.0 };
    if !v.is_finite() || !low_ok || v > MAX_DURATION_SECS {
        let bound = if allow_zero { "[0" } else { "(0" };
        return Err(ConfigError::Invalid(format!(
            "{name} must be in {bound}, {MAX_DURATION_SECS}], got {v}"
        )));
    }
    Ok(())
}

impl ExperimentConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.categories != 2 {
            return invalid(format!(
                "sessions need exactly 2 categories, got {}",
                self.categories
            ));
        }
        if self.difficulty_levels == 0 {
            return invalid("difficulty_levels must be at least 1".to_string());
        }
        if self.trials_per_difficulty == 0 {
            return invalid("trials_per_difficulty must be at least 1".to_string());
        }
        if !(self.accuracy_threshold > 0.0 && self.accuracy_threshold <= 1.0) {
            return invalid(format!(
                "accuracy_threshold {} is outside (0, 1]",
                self.accuracy_threshold
            ));
        }
        if self.practice_fractions.len() != self.difficulty_levels as usize {
            return invalid(format!(
                "practice_fractions has {} entries for {} difficulty levels",
                self.practice_fractions.len(),
                self.difficulty_levels
            ));
        }
        if let Some(f) = self
            .practice_fractions
            .iter()
            .find(|f| !(0.0..=1.0).contains(*f))
        {
            return invalid(format!("practice fraction {f} is outside [0, 1]"));
        }
        let positive = [
            ("test_duration_secs", self.test_duration_secs),
            ("stimulus_secs", self.stimulus_secs),
            ("response_window_secs", self.response_window_secs),
            ("correct_feedback_secs", self.correct_feedback_secs),
            ("incorrect_feedback_secs", self.incorrect_feedback_secs),
            ("animation_secs", self.animation_secs),
            ("refresh_secs", self.refresh_secs),
        ];
        for (name, v) in positive {
            check_duration(name, v, false)?;
        }
        let [lo, hi] = self.practice_delay_jitter_secs;
        check_duration("delay_secs", self.delay_secs, true)?;
        check_duration("practice_delay_jitter_secs", lo, true)?;
        check_duration("practice_delay_jitter_secs", hi, true)?;
        if hi < lo {
            return invalid(format!("practice_delay_jitter_secs [{lo}, {hi}] is not a range"));
        }
        if self.delay_secs + hi > MAX_DURATION_SECS {
            return invalid(format!(
                "delay_secs plus jitter exceeds {MAX_DURATION_SECS} seconds"
            ));
        }
        for cp in self.reward.checkpoints() {
            check_duration("checkpoint after_secs", cp.after_secs, true)?;
        }
        Ok(())
    }

    pub fn test_duration(&self) -> Duration {
        secs(self.test_duration_secs)
    }

    pub fn stimulus_duration(&self) -> Duration {
        secs(self.stimulus_secs)
    }

    pub fn response_window(&self) -> Duration {
        secs(self.response_window_secs)
    }

    pub fn animation_duration(&self) -> Duration {
        secs(self.animation_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        secs(self.refresh_secs)
    }

    pub fn feedback_dwell(&self, correct: bool) -> Duration {
        if correct {
            secs(self.correct_feedback_secs)
        } else {
            secs(self.incorrect_feedback_secs)
        }
    }
}
