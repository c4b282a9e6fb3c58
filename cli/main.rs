#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;

use metacal::config::ExperimentConfig;
use metacal::evaluate::CalibrationReport;
use metacal::progress::{SimulationProgress, SimulationStage};
use metacal::regression::InformationCriterion;
use metacal::selection::CandidateLayout;
use metacal::simulation::{
    CopulaCalibration, SelectionCalibration, run_copula_sweep, run_selection_experiment,
};

#[derive(Clone, Copy, ValueEnum)]
pub enum LayoutCli {
    Disjoint,
    Nested,
}

impl From<LayoutCli> for CandidateLayout {
    fn from(value: LayoutCli) -> Self {
        match value {
            LayoutCli::Disjoint => CandidateLayout::Disjoint,
            LayoutCli::Nested => CandidateLayout::Nested,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CriterionCli {
    Aic,
    Bic,
}

impl From<CriterionCli> for InformationCriterion {
    fn from(value: CriterionCli) -> Self {
        match value {
            CriterionCli::Aic => InformationCriterion::Aic,
            CriterionCli::Bic => InformationCriterion::Bic,
        }
    }
}

/// Options shared by both experiments.
#[derive(Args)]
pub struct CommonArgs {
    /// Experiment configuration (.toml); defaults are used when omitted
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the random seed from the configuration
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the calibration table as TSV to this path
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Comma-separated nominal levels, e.g. 0.01,0.05,0.1
    #[arg(long, value_delimiter = ',')]
    pub thresholds: Option<Vec<f64>>,
}

#[derive(Args)]
pub struct CopulaArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of correlated features to generate
    #[arg(long, value_name = "N")]
    pub features: Option<usize>,

    /// Number of tests combined per feature
    #[arg(long, value_name = "D")]
    pub tests: Option<usize>,

    /// Comma-separated rank correlations to sweep
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub rank_correlations: Option<Vec<f64>>,
}

#[derive(Args)]
pub struct SelectionArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of simulated units
    #[arg(long, value_name = "N")]
    pub units: Option<usize>,

    /// Observations per unit
    #[arg(long, value_name = "M")]
    pub samples_per_unit: Option<usize>,

    /// Candidate models fitted per unit
    #[arg(long, value_name = "K")]
    pub candidate_models: Option<usize>,

    #[arg(long, value_enum)]
    pub layout: Option<LayoutCli>,

    #[arg(long, value_enum)]
    pub criterion: Option<CriterionCli>,
}

#[derive(Parser)]
#[command(
    name = "metacal",
    about = "Null calibration of p-value combination and model-selection procedures",
    long_about = "Simulates p-values under the null hypothesis and reports how often each \
                 combination rule or selection procedure rejects at nominal levels."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep rank correlations and evaluate every combination method
    #[command(about = "Calibrate combiners on correlated null p-values")]
    Copula(CopulaArgs),

    /// Compare raw and FDR-corrected p-values after model selection
    #[command(about = "Calibrate selected-model p-values before and after correction")]
    Selection(SelectionArgs),

    /// Write the default configuration to a TOML file
    #[command(about = "Write a default experiment configuration (outputs: metacal.toml)")]
    InitConfig {
        #[arg(value_name = "PATH", default_value = "metacal.toml")]
        path: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Copula(args)) => run_copula(args),
        Some(Commands::Selection(args)) => run_selection(args),
        Some(Commands::InitConfig { path }) => init_config(&path),
        None => {
            let shown = Cli::command().print_help();
            println!();
            shown.map_err(Into::into)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(common: &CommonArgs) -> Result<ExperimentConfig, Box<dyn std::error::Error>> {
    let mut config = match &common.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            ExperimentConfig::load(path)?
        }
        None => ExperimentConfig::default(),
    };
    if let Some(seed) = common.seed {
        config.seed = seed;
    }
    if let Some(thresholds) = &common.thresholds {
        config.evaluation.thresholds = thresholds.clone();
    }
    Ok(config)
}

fn init_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    ExperimentConfig::default().save(path)?;
    println!("Default configuration written to {}", path.display());
    Ok(())
}

pub fn run_copula(args: CopulaArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.common)?;
    if let Some(features) = args.features {
        config.copula.features = features;
    }
    if let Some(tests) = args.tests {
        config.copula.tests = tests;
    }
    if let Some(points) = args.rank_correlations {
        config.copula.rank_correlations = points;
    }
    config.validate()?;

    let progress = BarProgress::default();
    let results = run_copula_sweep(&config, &progress)?;
    print_copula_table(&results, config.evaluation.tolerance);

    if let Some(path) = &args.common.output {
        write_copula_tsv(path, &results)?;
        println!("Calibration table written to {}", path.display());
    }
    Ok(())
}

pub fn run_selection(args: SelectionArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.common)?;
    if let Some(units) = args.units {
        config.selection.units = units;
    }
    if let Some(samples) = args.samples_per_unit {
        config.selection.samples_per_unit = samples;
    }
    if let Some(models) = args.candidate_models {
        config.selection.candidate_models = models;
    }
    if let Some(layout) = args.layout {
        config.selection.layout = layout.into();
    }
    if let Some(criterion) = args.criterion {
        config.selection.criterion = criterion.into();
    }
    config.validate()?;

    let progress = BarProgress::default();
    let result = run_selection_experiment(&config, &progress)?;
    print_selection_summary(&result, config.evaluation.tolerance);

    if let Some(path) = &args.common.output {
        write_selection_tsv(path, &result)?;
        println!("Per-unit outcomes written to {}", path.display());
    }
    Ok(())
}

fn print_report_rows(label: &str, report: &CalibrationReport, tolerance: f64) {
    for rate in &report.rates {
        println!(
            "{label:<12} {:>6} {:>8.4} {:>+9.4} {:>8.4}  {}",
            rate.alpha,
            rate.observed,
            rate.deviation(),
            rate.std_error,
            rate.skew(tolerance)
        );
    }
}

fn print_copula_table(results: &[CopulaCalibration], tolerance: f64) {
    for point in results {
        println!(
            "\nr = {:.3} (rho = {:.4}, observed correlation {:.4})",
            point.rank_correlation, point.pearson_correlation, point.observed_correlation
        );
        println!(
            "{:<12} {:>6} {:>8} {:>9} {:>8}  skew",
            "method", "alpha", "observed", "deviation", "se"
        );
        for entry in &point.methods {
            print_report_rows(entry.method.name(), &entry.report, tolerance);
        }
    }
}

fn print_selection_summary(result: &SelectionCalibration, tolerance: f64) {
    println!(
        "\n{:<12} {:>6} {:>8} {:>9} {:>8}  skew",
        "p-values", "alpha", "observed", "deviation", "se"
    );
    print_report_rows("raw", &result.raw, tolerance);
    print_report_rows("corrected", &result.corrected, tolerance);
    println!(
        "KS distance: raw {:.4}, corrected {:.4}",
        result.raw.max_deviation, result.corrected.max_deviation
    );
    println!("Selection counts per candidate: {:?}", result.selection_counts);
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, csv::Error> {
    csv::WriterBuilder::new().delimiter(b'\t').from_path(path)
}

fn write_copula_tsv(path: &Path, results: &[CopulaCalibration]) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "rank_correlation",
        "rho",
        "method",
        "alpha",
        "observed",
        "std_error",
        "ks_distance",
    ])?;
    for point in results {
        for entry in &point.methods {
            for rate in &entry.report.rates {
                writer.write_record([
                    point.rank_correlation.to_string(),
                    point.pearson_correlation.to_string(),
                    entry.method.name().to_string(),
                    rate.alpha.to_string(),
                    rate.observed.to_string(),
                    rate.std_error.to_string(),
                    entry.report.max_deviation.to_string(),
                ])?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_selection_tsv(path: &Path, result: &SelectionCalibration) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = tsv_writer(path)?;
    for outcome in &result.outcomes {
        writer.serialize(outcome)?;
    }
    writer.flush()?;
    Ok(())
}

/// Draws one progress bar per stage on stderr when it is a terminal.
#[derive(Default)]
struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    fn create_bar(len: u64, stage: SimulationStage) -> ProgressBar {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(Some(len), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        pb.set_message(stage.describe());
        pb
    }
}

impl SimulationProgress for BarProgress {
    fn on_stage_start(&self, stage: SimulationStage, total: usize) {
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(Self::create_bar(total as u64, stage));
        }
    }

    fn on_stage_advance(&self, stage: SimulationStage, completed: usize) {
        let _ = stage;
        if let Ok(slot) = self.bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_position(completed as u64);
            }
        }
    }

    fn on_stage_finish(&self, stage: SimulationStage) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_with_message(format!("{stage} complete"));
            }
        }
    }
}
