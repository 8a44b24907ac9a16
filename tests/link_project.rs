//! End-to-end linking runs across two datasets with relationship
//! constraints.

use std::path::Path;

use record_linker::algorithms::AlgorithmRegistry;
use record_linker::config::{
    BlockingSchema, ComparisonArgs, ComparisonSpec, DatasetConfig, LinkingSchema, ProjectConfig,
    ProjectType, RelationshipType, StepConfig,
};
use record_linker::orchestrator::run_project;

fn write_left(path: &Path) {
    std::fs::write(
        path,
        "ingestion_id,client_id,first_name,dob\n\
         1,100,ann,19900101\n\
         2,101,bob,19800202\n\
         3,102,cal,19700303\n\
         4,103,dan,19600404\n",
    )
    .unwrap();
}

fn write_right(path: &Path) {
    std::fs::write(
        path,
        "ingestion_id,client_id,first_name,dob\n\
         11,200,ann,19900101\n\
         12,201,bob,19800202\n\
         13,202,bob,19800202\n\
         14,203,eve,19500505\n",
    )
    .unwrap();
}

fn name_dob_step(seq: u32) -> StepConfig {
    StepConfig {
        seq,
        blocking_schema: BlockingSchema {
            left: vec!["first_name".into()],
            right: vec!["first_name".into()],
            transformations: vec![],
        },
        linking_schema: LinkingSchema {
            left: vec!["dob".into()],
            right: vec!["dob".into()],
            comparisons: vec![ComparisonSpec {
                name: "ABS_DIFF".into(),
                args: ComparisonArgs {
                    threshold: Some(0.0),
                    ..Default::default()
                },
            }],
        },
        group: true,
    }
}

fn link_project(
    root: &Path,
    left: &Path,
    right: &Path,
    relationship: RelationshipType,
    steps: Vec<StepConfig>,
) -> ProjectConfig {
    let dataset = |name: &str, url: &Path| DatasetConfig {
        name: name.into(),
        url: url.to_path_buf(),
        index_field: "ingestion_id".into(),
        entity_field: Some("client_id".into()),
        columns: None,
        data_types: None,
    };
    ProjectConfig {
        name: "link-test".into(),
        description: None,
        project_type: ProjectType::Link,
        output_root: root.join("out"),
        temp_path: root.join("work"),
        datasets: vec![dataset("left", left), dataset("right", right)],
        steps,
        relationship_type: Some(relationship),
        chunk_size: Some(2),
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect()
}

fn header_of(path: &Path) -> Vec<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .unwrap();
    reader.headers().unwrap().iter().map(String::from).collect()
}

#[test]
fn one_to_one_drops_ambiguous_groups() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left.csv");
    let right = dir.path().join("right.csv");
    write_left(&left);
    write_right(&right);

    let cfg = link_project(
        dir.path(),
        &left,
        &right,
        RelationshipType::OneToOne,
        vec![name_dob_step(1)],
    );
    let registry = AlgorithmRegistry::with_builtins();
    let summary = run_project(&cfg, &registry).unwrap();

    // ann links 1:1; bob matches two right entities and is ambiguous.
    assert_eq!(summary.stats.total_records_linked, 1);
    assert_eq!(summary.stats.total_entities, 1);
    assert_eq!(summary.stats.total_matched_not_linked, 2);

    let linked = read_rows(&cfg.output_root.join("linked_data.csv"));
    assert_eq!(linked.len(), 1);
    let header = header_of(&cfg.output_root.join("linked_data.csv"));
    assert_eq!(header[0], "LINK_ID");
    assert!(header.contains(&"LEFT_ingestion_id".to_string()));
    assert!(header.contains(&"RIGHT_ingestion_id".to_string()));
    assert!(header.contains(&"STEP".to_string()));
    let link_pos = header.iter().position(|c| c == "LEFT_ingestion_id").unwrap();
    assert_eq!(linked[0][link_pos], "1");

    let not_linked = read_rows(&cfg.output_root.join("matched_not_linked_data.csv"));
    assert_eq!(not_linked.len(), 2);

    // Linked records left the working datasets; the rest remain.
    let left_rest = read_rows(&cfg.output_root.join("left_file.csv"));
    let right_rest = read_rows(&cfg.output_root.join("right_file.csv"));
    assert_eq!(left_rest.len(), 3);
    assert_eq!(right_rest.len(), 3);
    assert!(left_rest.iter().all(|r| r[0] != "1"));
    assert!(right_rest.iter().all(|r| r[0] != "11"));
}

#[test]
fn one_to_many_links_each_right_entity_group() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left.csv");
    let right = dir.path().join("right.csv");
    write_left(&left);
    write_right(&right);

    let cfg = link_project(
        dir.path(),
        &left,
        &right,
        RelationshipType::OneToMany,
        vec![name_dob_step(1)],
    );
    let registry = AlgorithmRegistry::with_builtins();
    let summary = run_project(&cfg, &registry).unwrap();

    // One left client may link to many right entities: all three matched
    // pairs survive, one link group per right entity.
    assert_eq!(summary.stats.total_records_linked, 3);
    assert_eq!(summary.stats.total_entities, 3);
    assert_eq!(summary.stats.total_matched_not_linked, 0);

    let linked = read_rows(&cfg.output_root.join("linked_data.csv"));
    assert_eq!(linked.len(), 3);
    // Output is sorted by LINK_ID.
    let ids: Vec<&str> = linked.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(ids, ["1", "2", "3"]);
}

#[test]
fn many_to_one_groups_on_the_left_entity() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left.csv");
    let right = dir.path().join("right.csv");
    write_left(&left);
    write_right(&right);

    let cfg = link_project(
        dir.path(),
        &left,
        &right,
        RelationshipType::ManyToOne,
        vec![name_dob_step(1)],
    );
    let registry = AlgorithmRegistry::with_builtins();
    let summary = run_project(&cfg, &registry).unwrap();

    // Grouping swaps to the left entity: bob's group sees two right
    // entities and is dropped; ann's group links.
    assert_eq!(summary.stats.total_records_linked, 1);
    assert_eq!(summary.stats.total_matched_not_linked, 2);
}

#[test]
fn second_step_resolves_only_its_own_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left.csv");
    let right = dir.path().join("right.csv");
    write_left(&left);
    write_right(&right);

    // Two identical steps: records linked in step 1 are extracted, so
    // step 2 re-matches only the pairs that were matched-not-linked.
    let cfg = link_project(
        dir.path(),
        &left,
        &right,
        RelationshipType::OneToOne,
        vec![name_dob_step(1), name_dob_step(2)],
    );
    let registry = AlgorithmRegistry::with_builtins();
    let summary = run_project(&cfg, &registry).unwrap();

    let per_step: Vec<_> = summary.stats.steps.iter().collect();
    assert_eq!(per_step[0].1.total_records_linked, 1);
    assert_eq!(per_step[0].1.total_matched_not_linked, 2);
    // Step 2 sees the bob pairs again, and they fail 1:1 again; the ann
    // link from step 1 is not re-matched or re-split.
    assert_eq!(per_step[1].1.total_records_linked, 0);
    assert_eq!(per_step[1].1.total_matched_not_linked, 2);

    let linked = read_rows(&cfg.output_root.join("linked_data.csv"));
    assert_eq!(linked.len(), 1);
}

#[test]
fn no_matches_still_produces_a_summary() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left.csv");
    let right = dir.path().join("right.csv");
    write_left(&left);
    std::fs::write(
        &right,
        "ingestion_id,client_id,first_name,dob\n21,300,zed,19400101\n",
    )
    .unwrap();

    let cfg = link_project(
        dir.path(),
        &left,
        &right,
        RelationshipType::OneToOne,
        vec![name_dob_step(1)],
    );
    let registry = AlgorithmRegistry::with_builtins();
    let summary = run_project(&cfg, &registry).unwrap();
    assert_eq!(summary.stats.total_records_linked, 0);
    assert_eq!(summary.stats.total_entities, 0);
    assert!(!cfg.output_root.join("linked_data.csv").exists());
    assert!(cfg.output_root.join("run_summary.csv").exists());
}
