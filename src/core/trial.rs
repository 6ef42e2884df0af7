//! Trial records and the response encodings.

use crate::catalog::ShapeId;
use crate::clock::Duration;
use crate::prng::Prng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Test,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Test => "test",
        }
    }
}

/// One drawable stimulus from a pack.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    /// Exemplar number parsed from the file name.
    pub id: ShapeId,
    pub path: PathBuf,
    pub category: u32,
    pub difficulty: u32,
    pub phase: Phase,
}

/// How the two answers map onto keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLayout {
    /// Prototype sides are reshuffled every trial; answer with `left`/`right`.
    ShuffledSides,
    /// Category 1 always left, category 2 always right.
    #[default]
    FixedSides,
    /// Each side is bound to a set of keys: category 2 on keys 1-5, category 1 on 6-0.
    Keyset,
}

const LEFT_KEYS: [&str; 5] = ["1", "2", "3", "4", "5"];
const RIGHT_KEYS: [&str; 5] = ["6", "7", "8", "9", "0"];

/// Which prototype is on which side and which keys select it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceLayout {
    pub left_category: u32,
    pub right_category: u32,
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl ChoiceLayout {
    /// Every key that counts as a response.
    pub fn allowed_keys(&self) -> Vec<String> {
        self.left_keys
            .iter()
            .chain(self.right_keys.iter())
            .cloned()
            .collect()
    }

    /// Keys that select `category`; empty if it is not on screen.
    pub fn keys_for(&self, category: u32) -> &[String] {
        if category == self.left_category {
            &self.left_keys
        } else if category == self.right_category {
            &self.right_keys
        } else {
            &[]
        }
    }
}

impl ResponseLayout {
    /// Arrange the two prototypes for one trial.
    pub fn arrange(self, rng: &mut Prng) -> ChoiceLayout {
        match self {
            ResponseLayout::FixedSides => ChoiceLayout {
                left_category: 1,
                right_category: 2,
                left_keys: owned(&["left"]),
                right_keys: owned(&["right"]),
            },
            ResponseLayout::ShuffledSides => {
                let mut sides = [1u32, 2u32];
                rng.shuffle(&mut sides);
                ChoiceLayout {
                    left_category: sides[0],
                    right_category: sides[1],
                    left_keys: owned(&["left"]),
                    right_keys: owned(&["right"]),
                }
            }
            ResponseLayout::Keyset => ChoiceLayout {
                left_category: 2,
                right_category: 1,
                left_keys: owned(&LEFT_KEYS),
                right_keys: owned(&RIGHT_KEYS),
            },
        }
    }
}

/// A registered key press and its latency from response-window onset.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub key: String,
    pub rt: Duration,
}

/// Membership test against the correct-response set.
pub fn is_correct(response: Option<&Choice>, correct_keys: &[String]) -> bool {
    response.is_some_and(|c| correct_keys.iter().any(|k| *k == c.key))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Correct,
    Wrong,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub kind: FeedbackKind,
    pub phase: Phase,
    /// Signed bonus for this trial.
    pub bonus: f64,
    /// Running total after this trial.
    pub score: f64,
}

impl Feedback {
    pub fn message(&self) -> String {
        match (self.kind, self.bonus) {
            (FeedbackKind::Correct, b) if b > 0.0 => format!("Correct category! + ${b:.2}"),
            (FeedbackKind::Correct, _) => "Correct category!".to_string(),
            (FeedbackKind::Wrong, b) if b < 0.0 => format!("Wrong category! - ${:.2}", b.abs()),
            (FeedbackKind::Wrong, _) => "Wrong category!".to_string(),
            (FeedbackKind::TimedOut, b) if b < 0.0 => format!("Too slow! - ${:.2}", b.abs()),
            (FeedbackKind::TimedOut, _) => {
                "Time out! Please try to respond as quickly as possible.".to_string()
            }
        }
    }
}
