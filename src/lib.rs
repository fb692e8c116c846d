//! Coalescent simulation of site- and two-locus allele-frequency spectra.
//!
//! [`demography`] models population size histories as piecewise-exponential
//! epoch sequences (fastNeutrino fitted-model parsing, evaluation, rescaling
//! to coalescent units, closed-form expected pairwise coalescence time).
//! [`simulations`] maps abstract model specifications to concrete simulation
//! inputs, drives an external genealogy simulator over a window grid, and
//! accumulates replicate spectra; it also derives reproducible seeds from
//! output filenames.

pub mod demography;
pub mod simulations;

pub use demography::{DemographicModel, DemographyError, Epoch, EpochKind, PopulationSizeChange};
pub use simulations::{
    dispatch_model, expected_t2_beta, filename_to_seed, mean_pairwise_diversity, seed_from_rng,
    simulate_spectra, AncestrySimulator, CoalescentModel, CoalescentProcess, DispatchedModel,
    Genealogy, SimulationError, SimulationParameters, Spectrum,
};
