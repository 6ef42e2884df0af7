//! Append-only session log.
//!
//! Rows are only appended after a trial is fully scored. The log is handed to a
//! sink once, either when the session completes or when it is aborted.

use crate::error::LogError;
use crate::trial::Phase;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial: u32,
    pub phase: Phase,
    pub stimulus_id: u32,
    pub stimulus: String,
    pub category: u32,
    pub difficulty: u32,
    /// Empty on omission.
    pub response: String,
    pub correct: u8,
    /// Accepted keys joined with `|`.
    pub correct_response: String,
    pub response_time: Option<f64>,
    pub bonus: f64,
    pub score: f64,
    pub t_delay: Option<f64>,
    pub iti_onset: Option<f64>,
    pub stimulus_onset: Option<f64>,
    pub feedback_onset: Option<f64>,
}

pub trait LogSink {
    fn write_rows(&mut self, rows: &[TrialRecord]) -> Result<(), LogError>;
}

/// Flat CSV file; parent directories are created on demand.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: PathBuf,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for CsvFileSink {
    fn write_rows(&mut self, rows: &[TrialRecord]) -> Result<(), LogError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut w = csv::Writer::from_path(&self.path)?;
        for row in rows {
            w.serialize(row)?;
        }
        w.flush().map_err(|source| LogError::Io {
            path: self.path.clone(),
            source,
        })?;
        info!(path = ?self.path, rows = rows.len(), "session log written");
        Ok(())
    }
}

/// Keeps rows in memory. Counts writes so callers can check persistence.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub rows: Vec<TrialRecord>,
    pub writes: usize,
}

impl LogSink for MemorySink {
    fn write_rows(&mut self, rows: &[TrialRecord]) -> Result<(), LogError> {
        self.rows = rows.to_vec();
        self.writes += 1;
        Ok(())
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write_rows(&mut self, rows: &[TrialRecord]) -> Result<(), LogError> {
        (**self).write_rows(rows)
    }
}

impl<S: LogSink + ?Sized> LogSink for &mut S {
    fn write_rows(&mut self, rows: &[TrialRecord]) -> Result<(), LogError> {
        (**self).write_rows(rows)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    rows: Vec<TrialRecord>,
    persisted: bool,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, row: TrialRecord) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[TrialRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Hand every row to `sink`. A second call is refused.
    pub fn persist(&mut self, sink: &mut dyn LogSink) -> Result<(), LogError> {
        if self.persisted {
            return Err(LogError::AlreadyPersisted);
        }
        sink.write_rows(&self.rows)?;
        self.persisted = true;
        Ok(())
    }
}

/// Read a log written by [`CsvFileSink`].
pub fn read_csv(path: &Path) -> Result<Vec<TrialRecord>, LogError> {
    let mut r = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in r.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(trial: u32, phase: Phase, response_time: Option<f64>) -> TrialRecord {
        TrialRecord {
            trial,
            phase,
            stimulus_id: 3,
            stimulus: "cat_1/diff_2/ex_1_2_3.png".to_string(),
            category: 1,
            difficulty: 2,
            response: if response_time.is_some() {
                "left".to_string()
            } else {
                String::new()
            },
            correct: u8::from(response_time.is_some()),
            correct_response: "left".to_string(),
            response_time,
            bonus: 0.0,
            score: 0.0,
            t_delay: None,
            iti_onset: Some(1.0),
            stimulus_onset: Some(2.0),
            feedback_onset: Some(3.5),
        }
    }

    #[test]
    fn persists_exactly_once() {
        let mut log = SessionLog::new();
        log.append(record(1, Phase::Train, Some(0.4)));
        let mut sink = MemorySink::default();
        log.persist(&mut sink).unwrap();
        assert!(matches!(
            log.persist(&mut sink),
            Err(LogError::AlreadyPersisted)
        ));
        assert_eq!(sink.writes, 1);
        assert_eq!(sink.rows.len(), 1);
    }

    #[test]
    fn csv_file_keeps_omissions_blank() {
        let dir = std::env::temp_dir().join(format!("catmatch-log-{}", std::process::id()));
        let path = dir.join("nested").join("output.csv");
        let rows = vec![
            record(1, Phase::Train, Some(0.4)),
            record(2, Phase::Test, None),
        ];
        CsvFileSink::new(&path).write_rows(&rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert!(header.starts_with("trial,phase,stimulus_id,stimulus,category,difficulty"));
        assert!(text.contains(",test,"));

        let back = read_csv(&path).unwrap();
        assert_eq!(back, rows);
        let _ = fs::remove_dir_all(&dir);
    }
}
