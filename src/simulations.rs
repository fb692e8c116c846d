//! Coalescent model dispatch and the spectrum-simulation driver.
//!
//! A [`CoalescentModel`] names one of the four supported model families and
//! carries its family-specific parameters. [`dispatch_model`] turns it into
//! concrete simulation inputs (coalescent process, demography, expected
//! pairwise coalescence time), and [`simulate_spectra`] drives an external
//! genealogy simulator over a window grid, folding every replicate's spectrum
//! into one accumulated spectrum.

use anyhow::Result;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::function::beta::ln_beta;
use thiserror::Error;

use crate::demography::{DemographicModel, DemographyError};

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("beta coalescent needs alpha in (1, 2), got {0}")]
    AlphaOutOfRange(f64),
    #[error("simulation must request at least one replicate")]
    NoReplicates,
    #[error(transparent)]
    Demography(#[from] DemographyError),
}

// ── Model families ────────────────────────────────────────────────────────────

/// An abstract demographic/coalescent model specification.
///
/// The serde representation is tagged by family name, so configuration like
/// `{"model": "beta", "alpha": 1.5}` deserializes directly and an unknown
/// family is rejected naming the allowed set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum CoalescentModel {
    /// Constant size 1 under the standard coalescent.
    Const,
    /// A single exponential-growth epoch ending at `end_time`.
    Exp { end_time: f64, growth_rate: f64 },
    /// Arbitrary piecewise-constant sizes; `sizes[0]` applies from time 0 and
    /// `sizes[i + 1]` from `times[i]`.
    Pwc { sizes: Vec<f64>, times: Vec<f64> },
    /// Heavy-tailed multiple-merger (beta) coalescent, `alpha` in (1, 2).
    Beta { alpha: f64 },
}

/// Which coalescent process the simulator should run.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CoalescentProcess {
    Kingman,
    Beta { alpha: f64 },
}

/// Concrete simulation inputs produced by [`dispatch_model`].
#[derive(Clone, Debug)]
pub struct DispatchedModel {
    pub process: CoalescentProcess,
    /// Absent for the beta coalescent, which is not a time-changed
    /// demographic process in the same sense.
    pub demography: Option<DemographicModel>,
    /// Expected pairwise coalescence time under the model.
    pub t2: f64,
}

/// Map a model specification to a coalescent process, a demography, and the
/// expected pairwise coalescence time.
pub fn dispatch_model(model: &CoalescentModel) -> Result<DispatchedModel, SimulationError> {
    match model {
        CoalescentModel::Const => {
            let demography = DemographicModel::piecewise_constant(&[1.0], &[])?;
            let t2 = demography.t2()?;
            Ok(DispatchedModel {
                process: CoalescentProcess::Kingman,
                demography: Some(demography),
                t2,
            })
        }
        CoalescentModel::Exp {
            end_time,
            growth_rate,
        } => {
            let demography = DemographicModel::exponential(*end_time, *growth_rate)?;
            let t2 = demography.t2()?;
            Ok(DispatchedModel {
                process: CoalescentProcess::Kingman,
                demography: Some(demography),
                t2,
            })
        }
        CoalescentModel::Pwc { sizes, times } => {
            let demography = DemographicModel::piecewise_constant(sizes, times)?;
            let t2 = demography.t2()?;
            Ok(DispatchedModel {
                process: CoalescentProcess::Kingman,
                demography: Some(demography),
                t2,
            })
        }
        CoalescentModel::Beta { alpha } => {
            if !(*alpha > 1.0 && *alpha < 2.0) {
                return Err(SimulationError::AlphaOutOfRange(*alpha));
            }
            Ok(DispatchedModel {
                process: CoalescentProcess::Beta { alpha: *alpha },
                demography: None,
                t2: expected_t2_beta(*alpha, 1.0),
            })
        }
    }
}

/// Mean pairwise coalescence time of the diploid beta coalescent, in closed
/// form via the log-Beta function.
pub fn expected_t2_beta(alpha: f64, pop_size: f64) -> f64 {
    let m = 2.0
        + (alpha * 2.0_f64.ln() - (alpha - 1.0) * 3.0_f64.ln() - (alpha - 1.0).ln()).exp();
    (4.0_f64.ln() + alpha * m.ln() + (alpha - 1.0) * (pop_size / 2.0).ln()
        - alpha.ln()
        - ln_beta(2.0 - alpha, alpha))
        .exp()
}

// ── Simulator seams ───────────────────────────────────────────────────────────

/// Accumulated allele-frequency spectra over one or more replicates.
///
/// `merge` must be commutative and associative so that parallel or resumed
/// accumulation gives the same result regardless of replicate order.
pub trait Spectrum {
    fn merge(&mut self, other: Self);
}

/// One replicate genealogy (e.g. a tree sequence) with branch-length-aware
/// statistics.
pub trait Genealogy {
    type Spectrum: Spectrum;

    /// Spectrum of this genealogy over the given window grid.
    fn windowed_spectrum(&self, windows: &[f64], recombination_rate: f64) -> Self::Spectrum;

    /// Branch-mode pairwise diversity.
    fn pairwise_diversity(&self) -> f64;
}

/// The external genealogy simulator. One call produces all requested
/// independent replicates.
pub trait AncestrySimulator {
    type Genealogy: Genealogy;

    fn simulate(
        &self,
        process: &CoalescentProcess,
        demography: Option<&DemographicModel>,
        recombination_rate: f64,
        random_seed: u32,
        parameters: &SimulationParameters,
    ) -> Result<Vec<Self::Genealogy>>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Window grid spans `0..=sequence_length` in unit steps.
    pub sequence_length: u64,
    pub num_samples: usize,
    pub num_replicates: usize,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            sequence_length: 100,
            num_samples: 100,
            num_replicates: 1000,
        }
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

/// Simulate spectra under `model` and accumulate them over all replicates.
///
/// The dimensionless `scaled_recombination_rate` is converted to a per-site
/// rate `r = scaled / (2 t2)` so that recombination is comparable across
/// models with different absolute timescales. The accumulated spectrum is
/// returned un-normalized.
pub fn simulate_spectra<S: AncestrySimulator>(
    model: &CoalescentModel,
    parameters: &SimulationParameters,
    scaled_recombination_rate: f64,
    random_seed: u32,
    simulator: &S,
) -> Result<<S::Genealogy as Genealogy>::Spectrum> {
    if parameters.num_replicates == 0 {
        return Err(SimulationError::NoReplicates.into());
    }
    let dispatched = dispatch_model(model)?;
    let r = scaled_recombination_rate / (2.0 * dispatched.t2);
    let replicates = simulator.simulate(
        &dispatched.process,
        dispatched.demography.as_ref(),
        r,
        random_seed,
        parameters,
    )?;
    let windows: Vec<f64> = (0..=parameters.sequence_length).map(|w| w as f64).collect();
    replicates
        .iter()
        .map(|genealogy| genealogy.windowed_spectrum(&windows, r))
        .reduce(|mut acc, spectrum| {
            acc.merge(spectrum);
            acc
        })
        .ok_or_else(|| SimulationError::NoReplicates.into())
}

/// Mean branch-mode pairwise diversity over a set of replicate genealogies.
pub fn mean_pairwise_diversity<G: Genealogy>(genealogies: &[G], num_replicates: usize) -> f64 {
    genealogies
        .iter()
        .map(|g| g.pairwise_diversity())
        .sum::<f64>()
        / num_replicates as f64
}

// ── Seeding ───────────────────────────────────────────────────────────────────

/// Derive a reproducible simulation seed by hashing a filename.
///
/// The 4-byte BLAKE2b digest of the UTF-8 name, read big-endian. Re-running a
/// named simulation therefore reuses its seed with no external bookkeeping,
/// and similar filenames give unrelated seeds.
pub fn filename_to_seed(name: &str) -> u32 {
    let mut hasher = Blake2bVar::new(4).expect("4 bytes is a valid blake2b digest size");
    hasher.update(name.as_bytes());
    let mut digest = [0u8; 4];
    hasher
        .finalize_variable(&mut digest)
        .expect("buffer length matches digest size");
    u32::from_be_bytes(digest)
}

/// Draw a simulation seed from a caller-owned generator. The core itself
/// never holds randomness state.
pub fn seed_from_rng<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.random()
}

// ── Parameter labels ──────────────────────────────────────────────────────────

/// Round parameters for use in output labels and filenames.
pub fn rounded_parameters(values: &[f64], ndigits: i32) -> Vec<f64> {
    let factor = 10.0_f64.powi(ndigits);
    values.iter().map(|v| (v * factor).round() / factor).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn assert_close(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() <= eps, "{a} != {b} (eps {eps})");
    }

    #[test]
    fn dispatch_const_gives_standard_coalescent() {
        let dispatched = dispatch_model(&CoalescentModel::Const).unwrap();
        assert_eq!(dispatched.process, CoalescentProcess::Kingman);
        assert_eq!(dispatched.t2, 4.0);
        let demography = dispatched.demography.unwrap();
        assert_eq!(demography.num_epochs(), 1);
        assert_eq!(demography.population_size(0.0).unwrap(), 1.0);
    }

    #[test]
    fn dispatch_pwc_matches_model_t2() {
        let sizes = vec![5.0, 10.0];
        let times = vec![2.0];
        let dispatched = dispatch_model(&CoalescentModel::Pwc {
            sizes: sizes.clone(),
            times: times.clone(),
        })
        .unwrap();
        let expected = DemographicModel::piecewise_constant(&sizes, &times)
            .unwrap()
            .t2()
            .unwrap();
        assert_eq!(dispatched.t2, expected);
        assert_eq!(dispatched.demography.unwrap().num_epochs(), 2);
    }

    #[test]
    fn dispatch_pwc_rejects_mismatched_lengths() {
        let err = dispatch_model(&CoalescentModel::Pwc {
            sizes: vec![1.0],
            times: vec![1.0],
        })
        .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Demography(DemographyError::SizesTimesMismatch { .. })
        ));
    }

    #[test]
    fn dispatch_exp_gives_finite_positive_t2() {
        let dispatched = dispatch_model(&CoalescentModel::Exp {
            end_time: 1.0,
            growth_rate: 2.0,
        })
        .unwrap();
        assert_eq!(dispatched.process, CoalescentProcess::Kingman);
        assert!(dispatched.t2.is_finite() && dispatched.t2 > 0.0);
        assert_eq!(dispatched.demography.unwrap().num_epochs(), 2);
    }

    #[test]
    fn dispatch_beta_has_no_demography() {
        let dispatched = dispatch_model(&CoalescentModel::Beta { alpha: 1.5 }).unwrap();
        assert_eq!(dispatched.process, CoalescentProcess::Beta { alpha: 1.5 });
        assert!(dispatched.demography.is_none());
        assert!(dispatched.t2.is_finite() && dispatched.t2 > 0.0);
    }

    #[test]
    fn beta_t2_matches_reference_values() {
        // Reference values computed independently from the closed form.
        assert_close(expected_t2_beta(1.2, 1.0), 49.40297612035838, 1e-9);
        assert_close(expected_t2_beta(1.5, 1.0), 14.506192879853606, 1e-9);
        assert_close(expected_t2_beta(1.8, 1.0), 3.3119555334263158, 1e-9);
    }

    #[test]
    fn beta_rejects_alpha_outside_open_interval() {
        for alpha in [1.0, 2.0, 0.5, 2.5] {
            let err = dispatch_model(&CoalescentModel::Beta { alpha }).unwrap_err();
            assert!(matches!(err, SimulationError::AlphaOutOfRange(_)));
        }
    }

    #[test]
    fn model_specs_deserialize_by_family_name() {
        let model: CoalescentModel =
            serde_json::from_str(r#"{"model": "beta", "alpha": 1.5}"#).unwrap();
        assert_eq!(model, CoalescentModel::Beta { alpha: 1.5 });
        let model: CoalescentModel = serde_json::from_str(
            r#"{"model": "pwc", "sizes": [5.0, 10.0], "times": [2.0]}"#,
        )
        .unwrap();
        assert!(matches!(model, CoalescentModel::Pwc { .. }));
    }

    #[test]
    fn unknown_model_family_names_the_allowed_set() {
        let err = serde_json::from_str::<CoalescentModel>(r#"{"model": "bogus"}"#).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("const"), "unhelpful error: {message}");
        assert!(message.contains("beta"), "unhelpful error: {message}");
    }

    #[test]
    fn filename_seeds_are_deterministic() {
        let seed = filename_to_seed("path/to/my_simulation_output.hdf5");
        assert_eq!(seed, 3187965687);
        assert_eq!(seed, filename_to_seed("path/to/my_simulation_output.hdf5"));
    }

    #[test]
    fn similar_filenames_give_unrelated_seeds() {
        let seed1 = filename_to_seed("path/to/my_simulation_output.rep1.hdf5");
        let seed2 = filename_to_seed("path/to/my_simulation_output.rep2.hdf5");
        assert_eq!(seed1, 2323694911);
        assert_eq!(seed2, 1287932893);
        // One-character difference flips the high-order bits too.
        assert_ne!(seed1 >> 24, seed2 >> 24);
        assert_ne!(filename_to_seed("abc") >> 24, filename_to_seed("abd") >> 24);
    }

    #[test]
    fn seed_from_rng_is_reproducible_per_generator_state() {
        let mut a = SmallRng::seed_from_u64(7);
        let mut b = SmallRng::seed_from_u64(7);
        assert_eq!(seed_from_rng(&mut a), seed_from_rng(&mut b));
    }

    #[test]
    fn rounds_parameters_for_labels() {
        assert_eq!(
            rounded_parameters(&[1.23456, 2.0, 0.005], 2),
            vec![1.23, 2.0, 0.01]
        );
    }
}
