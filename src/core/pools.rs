//! Practice / test split of a stimulus pack.
//!
//! Each (category, difficulty) cell gives `floor(p_d * practice_trials / C)`
//! stimuli to practice; what is left of the cell feeds the adaptive test
//! pool for that difficulty. Test pools are shared across categories, and
//! every cell must keep at least one stimulus for them.

use crate::config::{ExperimentConfig, PracticeOrder, SamplingMode};
use crate::error::PoolError;
use crate::pack::{PackEntry, PackListing};
use crate::prng::Prng;
use crate::trial::{Phase, Stimulus};
use hashbrown::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct StimulusPools {
    practice: Vec<Stimulus>,
    /// Indexed by difficulty - 1.
    test: Vec<Vec<Stimulus>>,
    prototypes: Vec<PathBuf>,
}

fn stimulus(entry: &PackEntry, category: u32, difficulty: u32, phase: Phase) -> Stimulus {
    Stimulus {
        id: entry.id,
        path: entry.path.clone(),
        category,
        difficulty,
        phase,
    }
}

/// Number of practice picks per cell for a difficulty fraction.
pub fn practice_quota(fraction: f64, practice_trials: usize, categories: u32) -> usize {
    if categories == 0 {
        return 0;
    }
    (fraction * practice_trials as f64 / categories as f64).floor() as usize
}

impl StimulusPools {
    pub fn from_listing(
        listing: &PackListing,
        config: &ExperimentConfig,
        rng: &mut Prng,
    ) -> Result<Self, PoolError> {
        if config.practice_fractions.len() != listing.difficulty_levels as usize {
            return Err(PoolError::LevelMismatch {
                fractions: config.practice_fractions.len(),
                levels: listing.difficulty_levels,
            });
        }

        let mut practice = Vec::new();
        let mut test: Vec<Vec<Stimulus>> = vec![Vec::new(); listing.difficulty_levels as usize];

        for category in 1..=listing.categories {
            for (d, &fraction) in (1u32..).zip(config.practice_fractions.iter()) {
                let cell = listing.cell(category, d);
                let k = practice_quota(fraction, config.practice_trials, listing.categories);

                if config.sampling == SamplingMode::WithoutReplacement && k > cell.len() {
                    warn!(
                        category,
                        difficulty = d,
                        wanted = k,
                        available = cell.len(),
                        "practice quota exceeds cell size"
                    );
                }
                let picked = match config.sampling {
                    SamplingMode::WithoutReplacement => rng.sample_without_replacement(cell, k),
                    SamplingMode::WithReplacement => rng.sample_with_replacement(cell, k),
                };
                // Duplicate picks are possible with replacement; the rest is filtered by path.
                let used: HashSet<&Path> = picked.iter().map(|e| e.path.as_path()).collect();
                let rest: Vec<&PackEntry> = cell
                    .iter()
                    .filter(|e| !used.contains(e.path.as_path()))
                    .collect();
                if rest.is_empty() {
                    return Err(PoolError::EmptyTestCell {
                        category,
                        difficulty: d,
                    });
                }

                debug!(
                    category,
                    difficulty = d,
                    practice = picked.len(),
                    test = rest.len(),
                    "split cell"
                );
                practice.extend(
                    picked
                        .iter()
                        .map(|e| stimulus(e, category, d, Phase::Train)),
                );
                test[(d - 1) as usize].extend(
                    rest.into_iter()
                        .map(|e| stimulus(e, category, d, Phase::Test)),
                );
            }
        }

        if config.practice_order == PracticeOrder::Shuffled {
            rng.shuffle(&mut practice);
        }

        info!(
            practice = practice.len(),
            test = test.iter().map(Vec::len).sum::<usize>(),
            "stimulus pools ready"
        );
        Ok(Self {
            practice,
            test,
            prototypes: listing.prototypes().to_vec(),
        })
    }

    pub fn practice(&self) -> &[Stimulus] {
        &self.practice
    }

    pub fn levels(&self) -> u32 {
        self.test.len() as u32
    }

    pub fn test_pool(&self, difficulty: u32) -> &[Stimulus] {
        difficulty
            .checked_sub(1)
            .and_then(|i| self.test.get(i as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Uniform draw from the test pool at `difficulty`; pools are never depleted.
    pub fn draw(&self, difficulty: u32, rng: &mut Prng) -> Result<&Stimulus, PoolError> {
        rng.choose(self.test_pool(difficulty))
            .ok_or(PoolError::EmptyTestPool(difficulty))
    }

    pub fn prototype(&self, category: u32) -> Option<&Path> {
        category
            .checked_sub(1)
            .and_then(|i| self.prototypes.get(i as usize))
            .map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::synthetic_listing as listing;

    #[test]
    fn quota_floors_per_category() {
        assert_eq!(practice_quota(0.6, 10, 2), 3);
        assert_eq!(practice_quota(0.4, 10, 2), 2);
        assert_eq!(practice_quota(0.0, 10, 2), 0);
    }

    #[test]
    fn practice_and_test_are_disjoint() {
        let pools =
            StimulusPools::from_listing(&listing(4), &ExperimentConfig::default(), &mut Prng::new(3))
                .unwrap();
        assert_eq!(pools.practice().len(), 10);
        assert!(pools.practice().iter().all(|s| s.phase == Phase::Train));

        let used: HashSet<&Path> = pools.practice().iter().map(|s| s.path.as_path()).collect();
        for d in 1..=5 {
            for s in pools.test_pool(d) {
                assert_eq!(s.difficulty, d);
                assert_eq!(s.phase, Phase::Test);
                assert!(!used.contains(s.path.as_path()));
            }
        }
        // 4 per cell, 3 taken per category at level 1 and 2 at level 2.
        assert_eq!(pools.test_pool(1).len(), 2);
        assert_eq!(pools.test_pool(2).len(), 4);
        assert_eq!(pools.test_pool(3).len(), 8);
    }

    #[test]
    fn exhausted_cell_fails_fast() {
        let err = StimulusPools::from_listing(
            &listing(3),
            &ExperimentConfig::default(),
            &mut Prng::new(3),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PoolError::EmptyTestCell {
                category: 1,
                difficulty: 1
            }
        ));
    }

    #[test]
    fn one_empty_cell_is_rejected_even_when_its_level_has_stimuli() {
        let mut pack = listing(6);
        pack.clear_cell(1, 4);
        let err = StimulusPools::from_listing(&pack, &ExperimentConfig::default(), &mut Prng::new(3))
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::EmptyTestCell {
                category: 1,
                difficulty: 4
            }
        ));
        assert_eq!(
            err.to_string(),
            "category 1 difficulty 4 has no stimuli left for testing"
        );
    }

    #[test]
    fn replacement_sampling_may_repeat_but_never_leaks() {
        let config = ExperimentConfig {
            sampling: SamplingMode::WithReplacement,
            ..ExperimentConfig::default()
        };
        let pools = StimulusPools::from_listing(&listing(6), &config, &mut Prng::new(9)).unwrap();
        assert_eq!(pools.practice().len(), 10);
        let used: HashSet<&Path> = pools.practice().iter().map(|s| s.path.as_path()).collect();
        assert!(pools.test_pool(1).iter().all(|s| !used.contains(s.path.as_path())));
    }

    #[test]
    fn draws_stay_in_level() {
        let pools =
            StimulusPools::from_listing(&listing(4), &ExperimentConfig::default(), &mut Prng::new(5))
                .unwrap();
        let mut rng = Prng::new(11);
        for _ in 0..50 {
            assert_eq!(pools.draw(3, &mut rng).unwrap().difficulty, 3);
        }
        assert!(matches!(pools.draw(9, &mut rng), Err(PoolError::EmptyTestPool(9))));
        assert_eq!(pools.prototype(2), Some(Path::new("pack/cat_2/prototype_2.png")));
    }
}
