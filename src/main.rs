use clap::Parser;
use conformal_intervals::conformal::ConformalMethod;
use conformal_intervals::errors::ConformalError;
use conformal_intervals::experiment::{run_experiments, Dataset, ExperimentConfig, SyntheticKind};
use env_logger::{Builder, Env};
use log::{error, info};
use std::process;

#[derive(Parser, Debug)]
#[command(
    name = "conformal-experiment",
    version,
    about = "Compare conformal prediction interval methods on regression datasets."
)]
struct Args {
    /// Datasets: a CSV path, or `synthetic:linear` / `synthetic:heteroscedastic`.
    #[arg(short = 'd', long, num_args = 1.., required = true)]
    datasets: Vec<String>,

    /// Methods to compare, any of CP, TCP, CQR, CondHist.
    #[arg(short = 'm', long, num_args = 1.., required = true)]
    methods: Vec<String>,

    /// JSON file with harness options, overridden by the flags below.
    #[arg(long)]
    config: Option<String>,

    /// Meta level seed.
    #[arg(long)]
    grand_seed: Option<u64>,

    /// Number of experiments to run.
    #[arg(short = 'n', long)]
    n_experiments: Option<usize>,

    #[arg(long)]
    alpha: Option<f64>,

    #[arg(long)]
    delta: Option<f64>,

    /// Target column of CSV datasets.
    #[arg(long, default_value = "y")]
    target: String,

    /// Rows generated per synthetic dataset.
    #[arg(long, default_value_t = 4000)]
    n_samples: usize,

    /// Features per synthetic dataset.
    #[arg(long, default_value_t = 5)]
    n_features: usize,

    /// Write the results table to the output CSV.
    #[arg(long)]
    save: Option<bool>,

    #[arg(long)]
    output: Option<String>,
}

fn load_dataset(source: &str, args: &Args, seed: u64) -> Result<Dataset, ConformalError> {
    match source.strip_prefix("synthetic:") {
        Some(kind) => Dataset::synthetic(kind.parse::<SyntheticKind>()?, args.n_samples, args.n_features, seed),
        None => {
            let name = std::path::Path::new(source)
                .file_stem()
                .map_or(source.to_string(), |s| s.to_string_lossy().into_owned());
            Dataset::from_csv(source, &name, &args.target)
        }
    }
}

fn build_config(args: &Args) -> Result<ExperimentConfig, ConformalError> {
    let mut config = match &args.config {
        Some(path) => ExperimentConfig::from_json_file(path)?,
        None => ExperimentConfig::default(),
    };
    config.methods = args
        .methods
        .iter()
        .map(|m| m.parse::<ConformalMethod>())
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(v) = args.grand_seed {
        config.grand_seed = v;
    }
    if let Some(v) = args.n_experiments {
        config.n_experiments = v;
    }
    if let Some(v) = args.alpha {
        config.alpha = v;
    }
    if let Some(v) = args.delta {
        config.delta = v;
    }
    if let Some(v) = args.save {
        config.save = v;
    }
    if let Some(v) = &args.output {
        config.output = v.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<(), ConformalError> {
    let config = build_config(args)?;
    let datasets = args
        .datasets
        .iter()
        .map(|d| load_dataset(d, args, config.grand_seed))
        .collect::<Result<Vec<_>, _>>()?;

    let table = run_experiments(&config, &datasets)?;
    println!("{}", table);
    for (dataset, method, res) in table.summary() {
        info!(
            "{} {}: mean coverage {:.4}, mean length {:.4}",
            dataset, method, res.marginal_coverage, res.average_length
        );
    }
    if config.save {
        table.save_csv(&config.output)?;
        info!("Saved results to {}.", config.output);
    }
    Ok(())
}

fn main() {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{}", e);
        process::exit(1);
    }
}
