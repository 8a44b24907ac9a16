use anyhow::Result;
use clap::Parser;

use record_linker::algorithms::AlgorithmRegistry;
use record_linker::cli::Cli;
use record_linker::config::ProjectConfig;
use record_linker::logging::init_tracing_from_env;
use record_linker::orchestrator::run_project;

fn main() -> Result<()> {
    init_tracing_from_env();
    let cli = Cli::parse();

    let mut cfg = ProjectConfig::load(&cli.project)?;
    if let Some(chunk_size) = cli.chunk_size {
        cfg.chunk_size = Some(chunk_size);
    }
    let registry = AlgorithmRegistry::with_builtins();

    if cli.check {
        cfg.validate(&registry)?;
        println!("Project {} is valid.", cfg.name);
        return Ok(());
    }

    let summary = run_project(&cfg, &registry)?;
    println!(
        "{}: {} records linked, {} entities, {} matched-not-linked in {:.2}s",
        summary.project,
        summary.stats.total_records_linked,
        summary.stats.total_entities,
        summary.stats.total_matched_not_linked,
        summary.duration_secs()
    );
    Ok(())
}
