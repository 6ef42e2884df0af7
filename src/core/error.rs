//! Error types shared across the crate.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("matrix is empty")]
    EmptyMatrix,

    #[error("row {row} has {found} columns, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("cannot parse value {value:?} on line {line}")]
    BadNumber { line: usize, value: String },

    #[error("{shapes} shapes cannot fill {categories} categories x {levels} difficulty levels")]
    TooFewShapes {
        shapes: usize,
        categories: usize,
        levels: usize,
    },

    #[error("prototype {index} of category {category} lies outside its range {start}..{end}")]
    PrototypeOutsideCategory {
        category: u32,
        index: usize,
        start: usize,
        end: usize,
    },

    #[error("category {category} difficulty {difficulty} has no eligible stimuli")]
    EmptyCell { category: u32, difficulty: u32 },
}

#[derive(Debug, Error)]
pub enum PackError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("missing stimulus directory {0:?}")]
    MissingCell(PathBuf),

    #[error("stimulus directory {0:?} is empty")]
    EmptyCell(PathBuf),

    #[error("missing prototype for category {category} in {dir:?}")]
    MissingPrototype { category: u32, dir: PathBuf },

    #[error("cannot parse a stimulus id from {0:?}")]
    BadStimulusName(PathBuf),

    #[error("source shape file {0:?} not found")]
    MissingShape(PathBuf),

    #[error("manifest encoding failed: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl PackError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("test pool for difficulty {0} is empty")]
    EmptyTestPool(u32),

    #[error("category {category} difficulty {difficulty} has no stimuli left for testing")]
    EmptyTestCell { category: u32, difficulty: u32 },

    #[error("practice fractions cover {fractions} levels but the pack has {levels}")]
    LevelMismatch { fractions: usize, levels: u32 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error writing session log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("session log already persisted")]
    AlreadyPersisted,
}

#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("presentation closed")]
    Closed,

    #[error("presentation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Presentation(#[from] PresentationError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("session already terminated")]
    Terminated,
}
