//! Run summary written next to the project outputs, consumed by the
//! external reporting collaborator.

use std::io::BufWriter;
use std::path::Path;

use crate::models::RunStats;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub project: String,
    pub project_type: String,
    pub relationship: Option<String>,
    pub started_utc: chrono::DateTime<chrono::Utc>,
    pub ended_utc: chrono::DateTime<chrono::Utc>,
    pub stats: RunStats,
}

impl RunSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.ended_utc - self.started_utc).num_milliseconds() as f64 / 1000.0
    }

    /// One row per step plus a TOTAL row, with the run metadata repeated
    /// in the leading columns.
    pub fn write_csv(&self, path: &Path) -> crate::error::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::new(file));
        writer.write_record([
            "project",
            "type",
            "relationship",
            "started_utc",
            "ended_utc",
            "duration_secs",
            "step",
            "total_records_linked",
            "total_entities",
            "total_matched_not_linked",
            "total_blocking_excluded",
        ])?;
        let meta = [
            self.project.clone(),
            self.project_type.clone(),
            self.relationship.clone().unwrap_or_default(),
            self.started_utc.to_rfc3339(),
            self.ended_utc.to_rfc3339(),
            format!("{:.3}", self.duration_secs()),
        ];
        for (seq, step) in &self.stats.steps {
            let mut row = meta.to_vec();
            row.push(seq.to_string());
            row.push(step.total_records_linked.to_string());
            row.push(step.total_entities.to_string());
            row.push(step.total_matched_not_linked.to_string());
            row.push(step.total_blocking_excluded.to_string());
            writer.write_record(&row)?;
        }
        let mut total = meta.to_vec();
        total.push("TOTAL".to_string());
        total.push(self.stats.total_records_linked.to_string());
        total.push(self.stats.total_entities.to_string());
        total.push(self.stats.total_matched_not_linked.to_string());
        let excluded: u64 = self
            .stats
            .steps
            .iter()
            .map(|(_, s)| s.total_blocking_excluded)
            .sum();
        total.push(excluded.to_string());
        writer.write_record(&total)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepStats;

    #[test]
    fn summary_has_one_row_per_step_plus_total() {
        let mut stats = RunStats::default();
        stats.record_step(
            1,
            StepStats {
                total_records_linked: 4,
                total_entities: 2,
                ..Default::default()
            },
        );
        stats.record_step(
            2,
            StepStats {
                total_records_linked: 1,
                total_entities: 1,
                ..Default::default()
            },
        );
        let now = chrono::Utc::now();
        let summary = RunSummary {
            project: "demo".into(),
            project_type: "DEDUP".into(),
            relationship: None,
            started_utc: now,
            ended_utc: now,
            stats,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.csv");
        summary.write_csv(&path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body.lines().count(), 4);
        assert!(body.lines().last().unwrap().contains("TOTAL"));
        assert!(body.contains("demo,DEDUP"));
    }
}
