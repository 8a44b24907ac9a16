//! Step orchestration: runs a validated project end to end, one step at a
//! time, threading the remaining unmatched records and accumulated
//! statistics from one step into the next.

pub mod summary;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use log::info;

use crate::algorithms::AlgorithmRegistry;
use crate::config::{ProjectConfig, ProjectType, StepConfig};
use crate::engine::chunk::import_dataset;
use crate::engine::entities::resolve_entities;
use crate::engine::external_sort::{sort_file, SortColumn};
use crate::engine::extract::{extract_dedup_rows, extract_linked_rows};
use crate::engine::pipeline::{pair_and_match, MatchParams};
use crate::engine::relationship::resolve_links;
use crate::engine::{ENTITY_ID_COLUMN, LEFT_PREFIX, LINK_ID_COLUMN, RIGHT_PREFIX};
use crate::error::ConfigError;
use crate::models::{Header, IdAllocator, RunStats, StepStats};
use crate::orchestrator::summary::RunSummary;
use crate::util::files::{append_rows, replace_file, truncate_file, WorkDir};

/// Run a project end to end. Validation happens before any file I/O;
/// the returned summary has also been written to the output root.
pub fn run_project(cfg: &ProjectConfig, registry: &AlgorithmRegistry) -> Result<RunSummary> {
    cfg.validate(registry)?;
    std::fs::create_dir_all(&cfg.output_root)?;
    std::fs::create_dir_all(&cfg.temp_path)?;

    let started = Utc::now();
    let (type_label, stats) = match cfg.project_type {
        ProjectType::Dedup => {
            info!("Executing de-duplication project {}.", cfg.name);
            ("DEDUP", run_dedup(cfg, registry)?)
        }
        ProjectType::Link => {
            info!("Executing linking project {}.", cfg.name);
            ("LINK", run_link(cfg, registry)?)
        }
    };

    let summary = RunSummary {
        project: cfg.name.clone(),
        project_type: type_label.to_string(),
        relationship: cfg.relationship_type.map(|r| r.label().to_string()),
        started_utc: started,
        ended_utc: Utc::now(),
        stats,
    };
    summary.write_csv(&cfg.output_root.join("run_summary.csv"))?;
    info!("Execution of project {} completed.", cfg.name);
    Ok(summary)
}

/// Columns a side's steps reference, in first-seen order. An empty right
/// column list falls back to the left one, matching the schema defaults.
fn referenced_columns(steps: &[StepConfig], right_side: bool) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for step in steps {
        let blocking = if right_side && !step.blocking_schema.right.is_empty() {
            &step.blocking_schema.right
        } else {
            &step.blocking_schema.left
        };
        let linking = if right_side && !step.linking_schema.right.is_empty() {
            &step.linking_schema.right
        } else {
            &step.linking_schema.left
        };
        for column in blocking.iter().chain(linking) {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    columns
}

fn steps_in_order(cfg: &ProjectConfig) -> Vec<StepConfig> {
    let mut steps = cfg.steps.clone();
    steps.sort_by_key(|s| s.seq);
    steps
}

fn run_dedup(cfg: &ProjectConfig, registry: &AlgorithmRegistry) -> Result<RunStats> {
    let dataset = &cfg.datasets[0];
    let index_field = dataset.index_field.as_str();
    let steps = steps_in_order(cfg);
    let chunk_size = cfg.chunk_size();

    let work = WorkDir::create(&cfg.temp_path, "dedup")?;
    let left_file = cfg.output_root.join("left_file.csv");

    // Working copy with every column any step references; both join
    // sides read the same file.
    let mut columns = referenced_columns(&steps, false);
    for column in referenced_columns(&steps, true) {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    if let Some(declared) = &dataset.columns {
        columns = declared.clone();
    }
    import_dataset(
        &dataset.url,
        &left_file,
        &columns,
        std::slice::from_ref(&dataset.index_field),
        dataset.data_types.as_ref(),
    )?;
    sort_file(
        &left_file,
        &left_file,
        &[SortColumn::numeric(index_field)],
        chunk_size,
        work.path(),
    )?;

    let matched = work.file("matched_records.csv");
    let entity_index = work.file("entities.csv");
    let step_selected = work.file("step_selected_rows.csv");
    let all_selected = work.file("selected_rows.csv");
    let dedup_results = cfg.output_root.join("dedup_matched.csv");
    truncate_file(&matched)?;

    let left_key_col = format!("{}{}", LEFT_PREFIX, index_field);
    let right_key_col = format!("{}{}", RIGHT_PREFIX, index_field);

    let mut alloc = IdAllocator::new();
    let mut stats = RunStats::default();
    let mut prev_total = 0u64;
    let mut first_selected = true;
    let mut first_results = true;

    for step in &steps {
        info!("De-duplication step {}:", step.seq);
        info!(
            "{}.1) Finding record pairs satisfying blocking and linking constraints...",
            step.seq
        );
        let outcome = pair_and_match(
            &MatchParams {
                registry,
                step,
                dedup: true,
                left_path: &left_file,
                right_path: &left_file,
                left_index: index_field,
                right_index: index_field,
                chunk_size,
                work: &work,
            },
            &matched,
        )?;
        let pairs_count = outcome.total_pairs;

        let mut step_stats = StepStats {
            total_records_linked: pairs_count.saturating_sub(prev_total),
            total_blocking_excluded: outcome.blocking_excluded,
            ..Default::default()
        };
        prev_total = pairs_count;

        if step.group && pairs_count > 0 {
            info!("{}.2) Grouping matched records into entities...", step.seq);
            step_stats.total_entities = resolve_entities(
                &matched,
                &left_key_col,
                &right_key_col,
                &entity_index,
                &mut alloc,
                &work,
            )?;

            extract_dedup_rows(&left_file, index_field, &entity_index, &step_selected, &work)?;
            sort_file(
                &step_selected,
                &step_selected,
                &[SortColumn::numeric(ENTITY_ID_COLUMN)],
                chunk_size,
                work.path(),
            )?;
            append_rows(&all_selected, &step_selected, first_selected)?;
            first_selected = false;

            append_rows(&dedup_results, &matched, first_results)?;
            first_results = false;
            truncate_file(&matched)?;
            prev_total = 0;
        }
        stats.record_step(step.seq, step_stats);
    }

    finalize_dedup(cfg, &left_file, &all_selected, index_field, &mut alloc, &mut stats)?;
    Ok(stats)
}

/// Produce the deduplicated output: the resolved records from all grouped
/// steps, followed by every remaining record as its own singleton entity.
/// Singleton ids come from the same counter as linkage ids.
fn finalize_dedup(
    cfg: &ProjectConfig,
    left_file: &Path,
    all_selected: &Path,
    index_field: &str,
    alloc: &mut IdAllocator,
    stats: &mut RunStats,
) -> Result<()> {
    info!("Assigning entity id to all remaining records.");
    let deduped = cfg.output_root.join("deduped_data.csv");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(left_file)?;
    let label = left_file.display().to_string();
    let header = Header::from_record(&reader.headers()?.clone());
    let index_pos = header.position(index_field, &label)?;

    let have_selected = all_selected.exists();
    let file = if have_selected {
        replace_file(all_selected, &deduped)?;
        std::fs::OpenOptions::new().append(true).open(&deduped)?
    } else {
        File::create(&deduped)?
    };
    let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::with_capacity(512 * 1024, file));
    if !have_selected {
        let mut columns = vec![index_field.to_string(), ENTITY_ID_COLUMN.to_string()];
        columns.extend(
            header
                .columns()
                .iter()
                .enumerate()
                .filter(|(p, _)| *p != index_pos)
                .map(|(_, c)| c.clone()),
        );
        writer.write_record(&columns)?;
    }

    let mut total_remained = 0u64;
    for record in reader.records() {
        let record = record?;
        let id = alloc.next_id().to_string();
        let mut out = Vec::with_capacity(header.len() + 1);
        out.push(record.get(index_pos).unwrap_or("").to_string());
        out.push(id);
        for (p, cell) in record.iter().enumerate() {
            if p != index_pos {
                out.push(cell.to_string());
            }
        }
        writer.write_record(&out)?;
        total_remained += 1;
    }
    writer.flush()?;

    stats.total_entities += total_remained;
    info!(
        "Total number of entities after de-duplication: {}",
        stats.total_entities
    );
    info!("De-duplicated file generated at {}.", deduped.display());
    Ok(())
}

fn run_link(cfg: &ProjectConfig, registry: &AlgorithmRegistry) -> Result<RunStats> {
    let relationship = cfg.relationship_type.ok_or(ConfigError::MissingField {
        field: "relationship_type",
    })?;
    let left_ds = &cfg.datasets[0];
    let right_ds = &cfg.datasets[1];
    let left_entity = left_ds
        .entity_field
        .as_deref()
        .ok_or(ConfigError::MissingField {
            field: "datasets.entity_field",
        })?;
    let right_entity = right_ds
        .entity_field
        .as_deref()
        .ok_or(ConfigError::MissingField {
            field: "datasets.entity_field",
        })?;
    let steps = steps_in_order(cfg);
    let chunk_size = cfg.chunk_size();

    let work = WorkDir::create(&cfg.temp_path, "link")?;
    let left_file = cfg.output_root.join("left_file.csv");
    let right_file = cfg.output_root.join("right_file.csv");

    import_side(left_ds, &left_file, &referenced_columns(&steps, false))?;
    import_side(right_ds, &right_file, &referenced_columns(&steps, true))?;

    let matched = work.file("matched_records.csv");
    let step_linked = work.file("step_linked_records.csv");
    let linked_records = work.file("linked_records.csv");
    let not_linked = cfg.output_root.join("matched_not_linked_data.csv");
    truncate_file(&not_linked)?;

    let left_entity_col = format!("{}{}", LEFT_PREFIX, left_entity);
    let right_entity_col = format!("{}{}", RIGHT_PREFIX, right_entity);

    let mut alloc = IdAllocator::new();
    let mut stats = RunStats::default();
    let mut first_linked = true;

    for step in &steps {
        // Working datasets stay index-sorted between steps.
        sort_file(
            &left_file,
            &left_file,
            &[SortColumn::numeric(left_ds.index_field.as_str())],
            chunk_size,
            work.path(),
        )?;
        sort_file(
            &right_file,
            &right_file,
            &[SortColumn::numeric(right_ds.index_field.as_str())],
            chunk_size,
            work.path(),
        )?;

        info!("Linking step {}:", step.seq);
        info!(
            "{}.1) Finding record pairs satisfying blocking and linking constraints...",
            step.seq
        );
        truncate_file(&matched)?;
        let outcome = pair_and_match(
            &MatchParams {
                registry,
                step,
                dedup: false,
                left_path: &left_file,
                right_path: &right_file,
                left_index: &left_ds.index_field,
                right_index: &right_ds.index_field,
                chunk_size,
                work: &work,
            },
            &matched,
        )?;

        if outcome.total_pairs == 0 {
            info!("No records matched at step {}", step.seq);
            stats.record_step(
                step.seq,
                StepStats {
                    total_blocking_excluded: outcome.blocking_excluded,
                    ..Default::default()
                },
            );
            continue;
        }

        info!(
            "{}.2) Identifying the linked records based on the relationship type...",
            step.seq
        );
        let link_stats = resolve_links(
            &matched,
            relationship,
            &left_entity_col,
            &right_entity_col,
            &not_linked,
            &step_linked,
            &mut alloc,
            chunk_size,
            &work,
        )?;
        stats.record_step(
            step.seq,
            StepStats {
                total_records_linked: link_stats.total_records_linked,
                total_entities: link_stats.total_linked,
                total_matched_not_linked: link_stats.total_filtered,
                total_blocking_excluded: outcome.blocking_excluded,
            },
        );

        // Resolved links leave the working datasets before the next step.
        sort_file(
            &left_file,
            &left_file,
            &[
                SortColumn::numeric(left_entity),
                SortColumn::numeric(left_ds.index_field.as_str()),
            ],
            chunk_size,
            work.path(),
        )?;
        sort_file(
            &right_file,
            &right_file,
            &[
                SortColumn::numeric(right_entity),
                SortColumn::numeric(right_ds.index_field.as_str()),
            ],
            chunk_size,
            work.path(),
        )?;
        extract_linked_rows(
            &step_linked,
            &left_file,
            LEFT_PREFIX,
            left_entity,
            &left_ds.index_field,
            chunk_size,
            &work,
        )?;
        extract_linked_rows(
            &step_linked,
            &right_file,
            RIGHT_PREFIX,
            right_entity,
            &right_ds.index_field,
            chunk_size,
            &work,
        )?;

        append_rows(&linked_records, &step_linked, first_linked)?;
        first_linked = false;
    }

    finalize_link(cfg, &left_file, &right_file, &linked_records, &stats, chunk_size, &work)?;
    Ok(stats)
}

fn import_side(
    dataset: &crate::config::DatasetConfig,
    dest: &Path,
    referenced: &[String],
) -> Result<()> {
    let mut columns = referenced.to_vec();
    if let Some(declared) = &dataset.columns {
        columns = declared.clone();
    }
    let entity = dataset.entity_field.clone().ok_or(ConfigError::MissingField {
        field: "datasets.entity_field",
    })?;
    import_dataset(
        &dataset.url,
        dest,
        &columns,
        &[dataset.index_field.clone(), entity],
        dataset.data_types.as_ref(),
    )?;
    Ok(())
}

/// Produce the linked output sorted by LINK_ID and leave the unresolved
/// working datasets index-sorted next to it.
fn finalize_link(
    cfg: &ProjectConfig,
    left_file: &Path,
    right_file: &Path,
    linked_records: &Path,
    stats: &RunStats,
    chunk_size: usize,
    work: &WorkDir,
) -> Result<()> {
    let linked_out: PathBuf = cfg.output_root.join("linked_data.csv");
    if stats.total_records_linked > 0 && linked_records.exists() {
        sort_file(
            linked_records,
            &linked_out,
            &[SortColumn::numeric(LINK_ID_COLUMN)],
            chunk_size,
            work.path(),
        )?;
        info!("Linking output file generated at {}.", linked_out.display());
    }

    sort_file(
        left_file,
        left_file,
        &[SortColumn::numeric(cfg.datasets[0].index_field.as_str())],
        chunk_size,
        work.path(),
    )?;
    sort_file(
        right_file,
        right_file,
        &[SortColumn::numeric(cfg.datasets[1].index_field.as_str())],
        chunk_size,
        work.path(),
    )?;
    Ok(())
}
