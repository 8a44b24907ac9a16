use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::error::SchemaError;

/// Column layout of a delimited file, re-derived from its header row.
///
/// The engine never assumes a fixed column order beyond what it writes
/// itself; every file access goes through a `Header` built from the first
/// row of that file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    columns: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Header {
    pub fn new(columns: Vec<String>) -> Self {
        let positions = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self { columns, positions }
    }

    pub fn from_record(record: &csv::StringRecord) -> Self {
        Self::new(record.iter().map(|s| s.trim().to_string()).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn try_position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }

    /// Position of `column`, or a schema error naming the file it is
    /// missing from.
    pub fn position(&self, column: &str, file: &str) -> Result<usize, SchemaError> {
        self.try_position(column)
            .ok_or_else(|| SchemaError::MissingColumn {
                column: column.to_string(),
                file: file.to_string(),
            })
    }
}

/// Numeric sort/merge key for a single cell.
///
/// Index and entity values must order as numbers; a cell that does not
/// parse is a schema violation, never a silent lexicographic fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumKey(pub f64);

impl NumKey {
    pub fn parse(column: &str, value: &str) -> Result<Self, SchemaError> {
        value
            .trim()
            .parse::<f64>()
            .map(NumKey)
            .map_err(|_| SchemaError::NonNumericKey {
                column: column.to_string(),
                value: value.to_string(),
            })
    }
}

impl Eq for NumKey {}

impl Ord for NumKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for NumKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for NumKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Per-step counters, written once per step and read by reporting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StepStats {
    pub total_records_linked: u64,
    pub total_entities: u64,
    pub total_matched_not_linked: u64,
    /// Rows excluded from the step's candidate set for blank blocking
    /// values. A data-quality count, not an error.
    pub total_blocking_excluded: u64,
}

/// Cumulative counters across all steps of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub steps: Vec<(u32, StepStats)>,
    pub total_records_linked: u64,
    pub total_entities: u64,
    pub total_matched_not_linked: u64,
}

impl RunStats {
    pub fn record_step(&mut self, seq: u32, stats: StepStats) {
        self.total_records_linked += stats.total_records_linked;
        self.total_entities += stats.total_entities;
        self.total_matched_not_linked += stats.total_matched_not_linked;
        self.steps.push((seq, stats));
    }
}

/// Allocator for entity and link identifiers.
///
/// One instance is owned by the orchestrator for the whole run and handed
/// by reference to the resolvers, so ids assigned during linkage and at
/// finalization share a single monotonically increasing counter.
#[derive(Debug)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next_id(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
