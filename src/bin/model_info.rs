use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use twosfs_rs::demography::{DemographicModel, EpochKind};
use twosfs_rs::simulations::filename_to_seed;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Inspect a fastNeutrino fitted demographic model")]
struct Args {
    /// fastNeutrino fitted-parameter output file
    model_file: PathBuf,
    /// Rescale the model so that the expected pairwise coalescence time is 4
    #[arg(long)]
    rescale: bool,
    /// Evaluate the population size at these times (comma-separated)
    #[arg(long, value_delimiter = ',')]
    times: Vec<f64>,
    /// Print the population-size-change events as JSON
    #[arg(long)]
    json: bool,
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();

    let mut model = DemographicModel::from_path(&args.model_file)?;
    eprintln!("=== {} ===", args.model_file.display());
    eprintln!("epochs: {}", model.num_epochs());
    eprintln!("t2: {}", model.t2()?);
    eprintln!(
        "seed for this filename: {}",
        filename_to_seed(&args.model_file.display().to_string())
    );

    if args.rescale {
        let scale = model.rescale()?;
        eprintln!("rescaled by {scale} (t2 is now {})", model.t2()?);
    }

    for epoch in model.epochs() {
        match epoch.kind {
            EpochKind::Constant => {
                eprintln!("  t >= {:<12} N = {}", epoch.start_time, epoch.size)
            }
            EpochKind::Exponential { rate } => eprintln!(
                "  t >= {:<12} N = {} (growth rate {rate})",
                epoch.start_time, epoch.size
            ),
        }
    }

    if !args.times.is_empty() {
        for (t, n) in args.times.iter().zip(model.population_sizes(&args.times)?) {
            println!("N({t}) = {n}");
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&model.demographic_events())?);
    }

    Ok(())
}
