use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "record-linker",
    about = "Out-of-core record linkage and de-duplication over delimited files",
    version
)]
pub struct Cli {
    /// Path to the project descriptor (JSON)
    pub project: PathBuf,

    /// Override the project's chunk size (rows per chunk)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Validate the project descriptor and exit without running
    #[arg(long)]
    pub check: bool,
}
