use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "fcu-report",
    version,
    about = "Held-out evaluation and comparative reporting for FCU predictor runs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Re-derive the spatial train/test split and write a fingerprint manifest.
    Splits(SplitsArgs),
    /// Score every run on its held-out set and write calibration diagrams.
    Evaluate(EvaluateArgs),
    /// Assemble the tabbed sensitivity report.
    Consolidate(ConsolidateArgs),
    /// Copy the report and its images into a self-contained folder.
    Package(PackageArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding the run folders.
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// JSON replacement for the built-in run and scope registry.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where evaluation outputs are written (default `<base-dir>/comparativo_avancado`).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl CommonArgs {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("comparativo_avancado"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct SplitsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Cleaned dataset CSV (default `<base-dir>/dados/pnui_x_ibge.csv`).
    #[arg(long)]
    pub dataset: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Evaluate only these run keys (repeatable).
    #[arg(long = "run")]
    pub runs: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ConsolidateArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Report path (default `<base-dir>/comparativo_sensibilidade.html`).
    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Report to package (default `<base-dir>/comparativo_sensibilidade.html`).
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Destination folder, recreated on every run (default `<base-dir>/deploy_vercel`).
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

pub fn default_dataset(base_dir: &Path) -> PathBuf {
    base_dir.join("dados").join("pnui_x_ibge.csv")
}

pub fn default_report_path(base_dir: &Path) -> PathBuf {
    base_dir.join("comparativo_sensibilidade.html")
}
