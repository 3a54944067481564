//! Run logs: per-iteration summary records and the line search trial table.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::OptimizeError;

/// Sink for the records an optimizer emits.
pub trait RunLogger {
    /// One value of a per-iteration summary series (`misfit`, `step_length`, ...).
    fn log_summary(&mut self, key: &str, value: f64) -> Result<(), OptimizeError>;

    /// Opens the trial block of a new line search with its baseline misfit.
    fn begin_search(&mut self, objective: f64) -> Result<(), OptimizeError>;

    /// One line search trial, appended to the open block.
    fn log_trial(&mut self, step_length: f64, objective: f64) -> Result<(), OptimizeError>;
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    summary: BTreeMap<String, Vec<f64>>,
    trials: Vec<Vec<(f64, f64)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All values logged under `key`, oldest first.
    pub fn series(&self, key: &str) -> &[f64] {
        self.summary.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last(&self, key: &str) -> Option<f64> {
        self.series(key).last().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.summary.keys().map(String::as_str)
    }

    /// Trial blocks, one per line search, each starting with its baseline.
    pub fn trial_blocks(&self) -> &[Vec<(f64, f64)>] {
        &self.trials
    }
}

impl RunLogger for MemoryLog {
    fn log_summary(&mut self, key: &str, value: f64) -> Result<(), OptimizeError> {
        self.summary.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    fn begin_search(&mut self, objective: f64) -> Result<(), OptimizeError> {
        self.trials.push(vec![(0.0, objective)]);
        Ok(())
    }

    fn log_trial(&mut self, step_length: f64, objective: f64) -> Result<(), OptimizeError> {
        match self.trials.last_mut() {
            Some(block) => block.push((step_length, objective)),
            None => self.trials.push(vec![(step_length, objective)]),
        }
        Ok(())
    }
}

/// Step table written next to the summary files.
pub const STEP_TABLE: &str = "output.optim";

/// Writes records under an output directory: each summary key is a text
/// file with one value per line, and every trial goes to [`STEP_TABLE`].
#[derive(Debug, Clone)]
pub struct FileLog {
    dir: PathBuf,
    iteration: usize,
}

impl FileLog {
    /// Opens `dir`, creating it and the step table header if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OptimizeError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let table = dir.join(STEP_TABLE);
        if !table.exists() {
            let mut file = fs::File::create(&table)?;
            writeln!(file, "{:>10}  {:>10}  {:>10}", "ITER", "STEPLEN", "MISFIT")?;
            writeln!(file, "{:>10}  {:>10}  {:>10}", "====", "=======", "======")?;
        }
        Ok(Self { dir, iteration: 0 })
    }

    /// Numbers the next block `iteration`; blocks count up from there.
    pub fn with_first_iteration(mut self, iteration: usize) -> Self {
        self.iteration = iteration.saturating_sub(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append(&self, file: &str) -> Result<fs::File, OptimizeError> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?)
    }
}

impl RunLogger for FileLog {
    fn log_summary(&mut self, key: &str, value: f64) -> Result<(), OptimizeError> {
        let mut file = self.append(key)?;
        writeln!(file, "{value:11.6e}")?;
        Ok(())
    }

    fn begin_search(&mut self, objective: f64) -> Result<(), OptimizeError> {
        let mut file = self.append(STEP_TABLE)?;
        self.iteration += 1;
        writeln!(file)?;
        writeln!(
            file,
            "{:>10}  {:>10.3e}  {:>10.3e}",
            self.iteration, 0.0, objective
        )?;
        Ok(())
    }

    fn log_trial(&mut self, step_length: f64, objective: f64) -> Result<(), OptimizeError> {
        let mut file = self.append(STEP_TABLE)?;
        writeln!(file, "{:>12}{:>10.3e}  {:>10.3e}", "", step_length, objective)?;
        Ok(())
    }
}
