//! Field matching: reduces a candidate pair batch to the rows whose
//! configured field comparisons all agree.

use crate::algorithms::Comparator;
use crate::config::ComparisonArgs;
use crate::engine::blocking::PairBatch;
use crate::engine::{LEFT_PREFIX, RIGHT_PREFIX, STEP_COLUMN};
use crate::error::Result;
use crate::models::{Header, NumKey};

pub struct LinkingSpec<'a> {
    pub left_cols: Vec<String>,
    pub right_cols: Vec<String>,
    pub comparisons: Vec<(&'a dyn Comparator, ComparisonArgs)>,
}

/// Apply every configured comparison to the batch and keep the rows where
/// all of them match. A null comparison result counts as "no match".
/// Survivors are tagged with the step number and returned sorted by the
/// numeric composite key, which the merge stage depends on.
pub fn match_records(
    batch: PairBatch,
    spec: &LinkingSpec<'_>,
    step: u32,
    left_key_col: &str,
    right_key_col: &str,
) -> Result<PairBatch> {
    const LABEL: &str = "candidate pairs";
    let left_key_pos = batch.header.position(left_key_col, LABEL)?;
    let right_key_pos = batch.header.position(right_key_col, LABEL)?;

    let mut field_positions = Vec::with_capacity(spec.comparisons.len());
    for (left_col, right_col) in spec.left_cols.iter().zip(&spec.right_cols) {
        let left_pos = batch
            .header
            .position(&format!("{}{}", LEFT_PREFIX, left_col), LABEL)?;
        let right_pos = batch
            .header
            .position(&format!("{}{}", RIGHT_PREFIX, right_col), LABEL)?;
        field_positions.push((left_pos, right_pos));
    }

    let step_value = step.to_string();
    let mut matched: Vec<((NumKey, NumKey), Vec<String>)> = Vec::new();
    for mut row in batch.rows {
        let mut all_matched = true;
        for ((left_pos, right_pos), (comparator, args)) in
            field_positions.iter().zip(&spec.comparisons)
        {
            let result = comparator
                .compare(&row[*left_pos], &row[*right_pos], args)
                .unwrap_or(false);
            if !result {
                all_matched = false;
                break;
            }
        }
        if !all_matched {
            continue;
        }
        let key = (
            NumKey::parse(left_key_col, &row[left_key_pos])?,
            NumKey::parse(right_key_col, &row[right_key_pos])?,
        );
        row.push(step_value.clone());
        matched.push((key, row));
    }
    matched.sort_by(|a, b| a.0.cmp(&b.0));

    let mut columns: Vec<String> = batch.header.columns().to_vec();
    columns.push(STEP_COLUMN.to_string());
    Ok(PairBatch {
        header: Header::new(columns),
        rows: matched.into_iter().map(|(_, row)| row).collect(),
    })
}
