//! Bonus model.
//!
//! Two policies: a flat bonus/penalty, and a latency-scaled bonus where fast
//! correct answers earn more and time-based checkpoints add a flat top-up to
//! every later correct answer. The running score never drops below zero.

use crate::clock::Duration;
use crate::trial::Phase;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Correct { rt: Duration },
    Incorrect,
    Omission,
}

impl Outcome {
    pub fn is_correct(&self) -> bool {
        matches!(self, Outcome::Correct { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonusCheckpoint {
    pub after_secs: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RewardPolicy {
    Flat {
        bonus: f64,
        #[serde(default)]
        penalty: f64,
    },
    Latency {
        max_reward: f64,
        decay: f64,
        penalty: f64,
        #[serde(default)]
        checkpoints: Vec<BonusCheckpoint>,
        /// Decimal places kept on each trial bonus (2 rounds to cents).
        #[serde(default = "default_decimals")]
        decimals: u32,
    },
}

fn default_decimals() -> u32 {
    3
}

impl Default for RewardPolicy {
    fn default() -> Self {
        RewardPolicy::Latency {
            max_reward: 0.1,
            decay: 0.2,
            penalty: 0.1,
            checkpoints: vec![
                BonusCheckpoint {
                    after_secs: 180.0,
                    amount: 0.05,
                },
                BonusCheckpoint {
                    after_secs: 360.0,
                    amount: 0.05,
                },
            ],
            decimals: default_decimals(),
        }
    }
}

/// `max_reward * exp(-decay * rt)`.
pub fn latency_reward(max_reward: f64, decay: f64, rt_secs: f64) -> f64 {
    max_reward * (-decay * rt_secs.max(0.0)).exp()
}

fn round_to(v: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals.min(9) as i32);
    (v * scale).round() / scale
}

impl RewardPolicy {
    pub fn checkpoints(&self) -> &[BonusCheckpoint] {
        match self {
            RewardPolicy::Flat { .. } => &[],
            RewardPolicy::Latency { checkpoints, .. } => checkpoints,
        }
    }

    /// Signed bonus for one trial given the score before it.
    ///
    /// Practice trials never pay. `additional` is the checkpoint top-up, only
    /// used by the latency policy.
    pub fn trial_bonus(&self, phase: Phase, outcome: Outcome, score: f64, additional: f64) -> f64 {
        if phase == Phase::Train {
            return 0.0;
        }
        match (self, outcome) {
            (RewardPolicy::Flat { bonus, .. }, Outcome::Correct { .. }) => *bonus,
            (RewardPolicy::Flat { penalty, .. }, _) => -penalty.abs().min(score.max(0.0)),
            (
                RewardPolicy::Latency {
                    max_reward,
                    decay,
                    decimals,
                    ..
                },
                Outcome::Correct { rt },
            ) => round_to(
                latency_reward(*max_reward, *decay, rt.as_secs_f64()) + additional,
                *decimals,
            ),
            (RewardPolicy::Latency { penalty, .. }, _) => {
                let penalty = penalty.abs();
                if score >= penalty {
                    -penalty
                } else {
                    0.0
                }
            }
        }
    }
}

/// Running bonus total, floored at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionScore {
    total: f64,
}

impl SessionScore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn apply(&mut self, delta: f64) -> f64 {
        self.total = (self.total + delta).max(0.0);
        self.total
    }
}

/// Tracks which checkpoints have been crossed.
#[derive(Debug, Clone)]
pub struct BonusSchedule {
    checkpoints: Vec<BonusCheckpoint>,
    unlocked: Vec<bool>,
    additional: f64,
}

impl BonusSchedule {
    pub fn new(checkpoints: &[BonusCheckpoint]) -> Self {
        Self {
            checkpoints: checkpoints.to_vec(),
            unlocked: vec![false; checkpoints.len()],
            additional: 0.0,
        }
    }

    pub fn additional(&self) -> f64 {
        self.additional
    }

    /// Unlock every checkpoint at or before `elapsed`; returns the newly added amount.
    pub fn unlock(&mut self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        let mut added = 0.0;
        for (cp, done) in self.checkpoints.iter().zip(self.unlocked.iter_mut()) {
            if !*done && t >= cp.after_secs {
                *done = true;
                added += cp.amount;
            }
        }
        self.additional += added;
        added
    }
}
