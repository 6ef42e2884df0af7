//! Adaptive difficulty staircase.
//!
//! The controller keeps the last `K` test outcomes. It only re-evaluates once
//! the window is full and every entry was administered at the current level,
//! so after a change the next `K` trials must all run at the new level before
//! another change is possible.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub correct: bool,
    pub difficulty: u32,
}

#[derive(Debug, Clone)]
pub struct DifficultyController {
    level: u32,
    max_level: u32,
    threshold: f64,
    capacity: usize,
    history: VecDeque<HistoryEntry>,
}

impl DifficultyController {
    pub const MIN_LEVEL: u32 = 1;

    pub fn new(max_level: u32, capacity: usize, threshold: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            level: Self::MIN_LEVEL,
            max_level: max_level.max(Self::MIN_LEVEL),
            threshold,
            capacity,
            history: VecDeque::with_capacity(capacity),
        }
    }

    /// Start from a given level (clamped into range).
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.clamp(Self::MIN_LEVEL, self.max_level);
        self
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Full window with every entry at the current level.
    pub fn window_is_pure(&self) -> bool {
        self.history.len() == self.capacity
            && self.history.iter().all(|e| e.difficulty == self.level)
    }

    pub fn window_accuracy(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let correct = self.history.iter().filter(|e| e.correct).count();
        Some(correct as f64 / self.history.len() as f64)
    }

    /// Apply the staircase rule and return the level for the next draw.
    pub fn update(&mut self) -> u32 {
        if !self.window_is_pure() {
            return self.level;
        }
        let accuracy = self.window_accuracy().unwrap_or(0.0);
        let before = self.level;

        if accuracy >= self.threshold && self.level < self.max_level {
            self.level += 1;
        } else if accuracy < self.threshold && self.level > Self::MIN_LEVEL {
            self.level -= 1;
        }

        if self.level != before {
            info!(from = before, to = self.level, accuracy, "difficulty changed");
        }
        self.level
    }

    /// Push one completed test trial, evicting the oldest when full.
    pub fn record(&mut self, correct: bool, difficulty: u32) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(HistoryEntry {
            correct,
            difficulty,
        });
    }

    pub fn reset(&mut self) {
        self.level = Self::MIN_LEVEL;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_at(level: u32) -> DifficultyController {
        DifficultyController::new(5, 5, 0.75).with_level(level)
    }

    #[test]
    fn four_of_five_at_level_two_steps_up() {
        let mut c = controller_at(2);
        for correct in [true, true, false, true, true] {
            c.record(correct, 2);
        }
        assert_eq!(c.update(), 3);
    }

    #[test]
    fn three_of_five_at_level_two_steps_down() {
        let mut c = controller_at(2);
        for correct in [true, false, true, false, true] {
            c.record(correct, 2);
        }
        assert_eq!(c.update(), 1);
    }

    #[test]
    fn impure_window_holds_level() {
        let mut c = controller_at(2);
        c.record(true, 1);
        for _ in 0..4 {
            c.record(true, 2);
        }
        assert_eq!(c.update(), 2);
    }

    #[test]
    fn partial_window_holds_level() {
        let mut c = controller_at(2);
        for _ in 0..4 {
            c.record(true, 2);
        }
        assert_eq!(c.update(), 2);
        c.record(true, 2);
        assert_eq!(c.update(), 3);
    }

    #[test]
    fn change_requires_a_fresh_window_at_the_new_level() {
        let mut c = controller_at(1);
        for _ in 0..5 {
            c.record(true, 1);
        }
        assert_eq!(c.update(), 2);

        // Old entries are tagged with level 1, so nothing moves until five
        // level-2 trials have replaced them.
        for i in 0..4 {
            c.record(true, 2);
            assert_eq!(c.update(), 2, "moved early after {} trials", i + 1);
        }
        c.record(true, 2);
        assert_eq!(c.update(), 3);
    }

    #[test]
    fn level_stays_within_bounds() {
        let mut top = controller_at(5);
        for _ in 0..5 {
            top.record(true, 5);
        }
        assert_eq!(top.update(), 5);

        let mut bottom = controller_at(1);
        for _ in 0..5 {
            bottom.record(false, 1);
        }
        assert_eq!(bottom.update(), 1);

        assert_eq!(controller_at(9).level(), 5);
        assert_eq!(controller_at(0).level(), 1);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut c = DifficultyController::new(5, 4, 0.75).with_level(2);
        for correct in [true, true, true, false] {
            c.record(correct, 2);
        }
        assert_eq!(c.update(), 3);
    }

    #[test]
    fn reset_returns_to_level_one_with_empty_history() {
        let mut c = controller_at(4);
        c.record(true, 4);
        c.reset();
        assert_eq!(c.level(), 1);
        assert_eq!(c.history().count(), 0);
    }
}
