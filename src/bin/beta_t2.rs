use anyhow::Result;
use clap::Parser;
use twosfs_rs::simulations::{dispatch_model, rounded_parameters, CoalescentModel};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Expected pairwise coalescence time of the beta coalescent over an alpha grid")]
struct Args {
    #[arg(long, default_value_t = 1.05)]
    alpha_min: f64,
    #[arg(long, default_value_t = 1.95)]
    alpha_max: f64,
    #[arg(long, default_value_t = 0.05)]
    step: f64,
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();

    let mut alphas = Vec::new();
    let mut alpha = args.alpha_min;
    while alpha <= args.alpha_max + 1e-9 {
        alphas.push(alpha);
        alpha += args.step;
    }

    println!("alpha\tt2");
    for &alpha in &rounded_parameters(&alphas, 2) {
        let dispatched = dispatch_model(&CoalescentModel::Beta { alpha })?;
        println!("{alpha:.2}\t{}", dispatched.t2);
    }
    Ok(())
}
