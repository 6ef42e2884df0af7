//! Adaptive category-learning experiment.
//!
//! Offline, [`catalog::CatalogBuilder`] turns a shape distance matrix into
//! categories, difficulty levels and prototypes, and [`pack`] lays the shape
//! files out on disk. At run time [`session::Session`] walks a participant
//! through practice and a timed test, with [`staircase::DifficultyController`]
//! choosing the difficulty and [`reward::RewardPolicy`] paying the bonus.

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/clock.rs"]
pub mod clock;

#[path = "core/matrix.rs"]
pub mod matrix;

#[path = "core/catalog.rs"]
pub mod catalog;

#[path = "core/pack.rs"]
pub mod pack;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/trial.rs"]
pub mod trial;

#[path = "core/pools.rs"]
pub mod pools;

#[path = "core/staircase.rs"]
pub mod staircase;

#[path = "core/reward.rs"]
pub mod reward;

#[path = "core/log.rs"]
pub mod log;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/simulate.rs"]
pub mod simulate;

pub use catalog::{CatalogBuilder, StimulusCatalog};
pub use config::ExperimentConfig;
pub use pools::StimulusPools;
pub use session::{Presentation, Session, SessionSummary};
pub use staircase::DifficultyController;
