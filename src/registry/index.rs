//! Tab-separated experiment index
//!
//! One column per configuration key ever seen plus `experiment_name` and
//! `time_ran`; rows from different runs may leave columns blank.

use std::path::Path;

use indexmap::IndexMap;

use crate::config::{Configuration, EXPERIMENT_NAME_KEY};
use crate::error::Result;
use crate::utils::io::write_file_atomic;

/// Column holding the registration timestamp
pub const TIME_RAN_COLUMN: &str = "time_ran";

/// One run; blank cells are simply absent
pub type Row = IndexMap<String, String>;

/// In-memory copy of `index.tsv`
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentIndex {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl ExperimentIndex {
    /// Fresh index with only the `experiment_name` column
    pub fn empty() -> Self {
        Self {
            columns: vec![EXPERIMENT_NAME_KEY.to_string()],
            rows: Vec::new(),
        }
    }

    /// Read an index file, or start empty when there is none yet
    pub fn load_or_empty(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::empty());
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)?;

        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: Row = columns
                .iter()
                .zip(record.iter())
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(column, cell)| (column.clone(), cell.to_string()))
                .collect();
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    /// Rewrite the whole file in one step
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());

        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(
                self.columns
                    .iter()
                    .map(|column| row.get(column).map_or("", String::as_str)),
            )?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        write_file_atomic(path, &bytes)
    }

    /// Header in file order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether the header has this column
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// All runs, oldest first
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Add a run, growing the header with any new keys
    pub fn append(&mut self, config: &Configuration, time_ran: &str) {
        let mut row = Row::new();
        for (key, value) in config.iter() {
            self.ensure_column(key);
            row.insert(key.clone(), value.to_string());
        }
        self.ensure_column(TIME_RAN_COLUMN);
        row.insert(TIME_RAN_COLUMN.to_string(), time_ran.to_string());
        self.rows.push(row);
    }

    /// Drop every row recorded under `experiment_name`; returns how many went
    pub fn remove_experiment(&mut self, experiment_name: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| {
            row.get(EXPERIMENT_NAME_KEY).map(String::as_str) != Some(experiment_name)
        });
        before - self.rows.len()
    }

    /// Experiment names of the given rows
    pub fn experiment_names(&self, positions: &[usize]) -> Vec<String> {
        positions
            .iter()
            .filter_map(|&i| self.rows.get(i))
            .filter_map(|row| row.get(EXPERIMENT_NAME_KEY).cloned())
            .collect()
    }

    fn ensure_column(&mut self, column: &str) {
        if !self.has_column(column) {
            self.columns.push(column.to_string());
        }
    }
}
