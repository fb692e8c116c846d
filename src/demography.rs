//! Piecewise-exponential demographic models.
//!
//! A model is an ordered list of epochs, each constant-size or exponentially
//! growing (backward in time), read either from `add_epoch` calls or from a
//! fastNeutrino fitted-parameter file. Sizes and times are in coalescent
//! units once `rescale` has been applied.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DemographyError {
    #[error("new epoch starts at {new} before previous epoch start {prev}")]
    EpochOrder { new: f64, prev: f64 },
    #[error("bad model line {line}: {text:?} (expected leading 'c' or 'e')")]
    BadLine { line: usize, text: String },
    #[error("bad number {text:?} on model line {line}")]
    BadNumber { line: usize, text: String },
    #[error("model file ended before line {line}")]
    Truncated { line: usize },
    #[error("model has no epochs")]
    NoEpochs,
    #[error("expected coalescence time requires a constant final epoch")]
    ExponentialTail,
    #[error("need one more size than change times (got {sizes} sizes, {times} times)")]
    SizesTimesMismatch { sizes: usize, times: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Epochs ────────────────────────────────────────────────────────────────────

/// Size trajectory within one epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EpochKind {
    Constant,
    /// Exponential growth at `rate` (forward in time), i.e. decay backward.
    Exponential { rate: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Epoch {
    pub start_time: f64,
    /// Population size at `start_time` (the most recent point of the epoch).
    pub size: f64,
    pub kind: EpochKind,
}

impl Epoch {
    /// Population size at time `t`, assuming `t` falls in this epoch.
    pub fn size_at(&self, t: f64) -> f64 {
        match self.kind {
            // Exact: no exponential evaluated for the common constant case.
            EpochKind::Constant => self.size,
            EpochKind::Exponential { rate } => {
                self.size * (-(t - self.start_time) * rate).exp()
            }
        }
    }
}

/// A population-size change in simulator-ready form, one per epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PopulationSizeChange {
    pub time: f64,
    pub size: f64,
    /// `None` means the epoch is constant-size.
    pub growth_rate: Option<f64>,
}

// ── Model ─────────────────────────────────────────────────────────────────────

/// Slices per finite exponential epoch when refining `t2` numerically.
const EXP_EPOCH_SLICES: usize = 4096;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DemographicModel {
    epochs: Vec<Epoch>,
}

impl DemographicModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn num_epochs(&self) -> usize {
        self.epochs.len()
    }

    /// Append an epoch. `rate = None` means constant size. Start times must
    /// be non-decreasing; an earlier start is an `EpochOrder` error.
    pub fn add_epoch(
        &mut self,
        start_time: f64,
        size: f64,
        rate: Option<f64>,
    ) -> Result<(), DemographyError> {
        if let Some(prev) = self.epochs.last() {
            if start_time < prev.start_time {
                return Err(DemographyError::EpochOrder {
                    new: start_time,
                    prev: prev.start_time,
                });
            }
        }
        let kind = match rate {
            None => EpochKind::Constant,
            Some(rate) => EpochKind::Exponential { rate },
        };
        self.epochs.push(Epoch {
            start_time,
            size,
            kind,
        });
        Ok(())
    }

    /// Piecewise-constant model: `sizes[0]` from time 0, then `sizes[i + 1]`
    /// from `times[i]` on. Requires exactly one more size than change times.
    pub fn piecewise_constant(sizes: &[f64], times: &[f64]) -> Result<Self, DemographyError> {
        if sizes.len() != times.len() + 1 {
            return Err(DemographyError::SizesTimesMismatch {
                sizes: sizes.len(),
                times: times.len(),
            });
        }
        let mut model = Self::new();
        model.add_epoch(0.0, sizes[0], None)?;
        for (&t, &s) in times.iter().zip(&sizes[1..]) {
            model.add_epoch(t, s, None)?;
        }
        Ok(model)
    }

    /// Unit present-day size growing at `growth_rate` until `end_time`, then a
    /// constant ancestral epoch at the boundary size `exp(-rate * end_time)`.
    pub fn exponential(end_time: f64, growth_rate: f64) -> Result<Self, DemographyError> {
        let mut model = Self::new();
        model.add_epoch(0.0, 1.0, Some(growth_rate))?;
        model.add_epoch(end_time, (-growth_rate * end_time).exp(), None)?;
        Ok(model)
    }

    // ── fastNeutrino parsing ──────────────────────────────────────────────────

    /// Read epochs from a fastNeutrino fitted-parameter output file.
    ///
    /// Line 1 is a discarded header and line 2 the ancestral population size.
    /// Each remaining line starts with `c` (constant epoch: trailing fields
    /// `size end_time`) or `e` (exponential epoch: `size end_time rate`).
    /// Epoch start times chain implicitly from 0, and the ancestral size is
    /// appended as a final constant epoch at the last end time.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DemographyError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, DemographyError> {
        let mut lines = reader.lines();
        let _header = lines
            .next()
            .ok_or(DemographyError::Truncated { line: 1 })??;
        let ancestral = lines
            .next()
            .ok_or(DemographyError::Truncated { line: 2 })??;
        let ancestral_size = parse_field(ancestral.trim(), 2)?;

        let mut model = Self::new();
        let mut start_time = 0.0;
        for (i, line) in lines.enumerate() {
            let line = line?;
            let lineno = i + 3;
            // Parameters are the last 2 (constant) or 3 (exponential)
            // whitespace-separated fields on the line.
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (size, end_time, rate) = if line.starts_with('c') && fields.len() >= 2 {
                let n = parse_field(fields[fields.len() - 2], lineno)?;
                let t = parse_field(fields[fields.len() - 1], lineno)?;
                (n, t, None)
            } else if line.starts_with('e') && fields.len() >= 3 {
                let n = parse_field(fields[fields.len() - 3], lineno)?;
                let t = parse_field(fields[fields.len() - 2], lineno)?;
                let g = parse_field(fields[fields.len() - 1], lineno)?;
                (n, t, Some(g))
            } else {
                return Err(DemographyError::BadLine {
                    line: lineno,
                    text: line.trim().to_string(),
                });
            };
            model.add_epoch(start_time, size, rate)?;
            start_time = end_time;
        }
        // The ancestral population extends to infinite past time.
        model.add_epoch(start_time, ancestral_size, None)?;
        Ok(model)
    }

    // ── Evaluation ────────────────────────────────────────────────────────────

    /// Population size at time `t`: the epoch with the greatest start time
    /// ≤ `t` applies, making the curve right-continuous at epoch boundaries.
    /// Times before the first epoch start evaluate the first epoch.
    pub fn population_size(&self, t: f64) -> Result<f64, DemographyError> {
        if self.epochs.is_empty() {
            return Err(DemographyError::NoEpochs);
        }
        let idx = self
            .epochs
            .partition_point(|e| e.start_time <= t)
            .saturating_sub(1);
        Ok(self.epochs[idx].size_at(t))
    }

    pub fn population_sizes(&self, times: &[f64]) -> Result<Vec<f64>, DemographyError> {
        times.iter().map(|&t| self.population_size(t)).collect()
    }

    // ── Rescaling ─────────────────────────────────────────────────────────────

    /// Rescale so that the expected pairwise coalescence time is 4 (the
    /// standard-coalescent convention). Returns the scale applied so the
    /// caller can invert the transform.
    pub fn rescale(&mut self) -> Result<f64, DemographyError> {
        let scale = self.t2()? / 4.0;
        self.rescale_by(scale);
        Ok(scale)
    }

    /// Divide every size and start time by `scale`; growth rates, being
    /// inverse times, are multiplied.
    pub fn rescale_by(&mut self, scale: f64) {
        for epoch in &mut self.epochs {
            epoch.start_time /= scale;
            epoch.size /= scale;
            if let EpochKind::Exponential { rate } = &mut epoch.kind {
                *rate *= scale;
            }
        }
    }

    // ── Expected pairwise coalescence time ────────────────────────────────────

    /// Expected pairwise coalescence time (branch length for a sample pair).
    ///
    /// Sums each epoch's size weighted by the probability that the pair
    /// survives to the epoch and then coalesces within it, using scaled
    /// interval lengths `Δt / size`; the final epoch counts as infinite, so
    /// a single constant epoch of size N gives exactly `4 N`. Finite
    /// exponential epochs are refined into constant slices before weighting;
    /// an exponential *final* epoch has no well-defined answer and is
    /// rejected.
    pub fn t2(&self) -> Result<f64, DemographyError> {
        let (last, finite) = self.epochs.split_last().ok_or(DemographyError::NoEpochs)?;
        if let EpochKind::Exponential { .. } = last.kind {
            return Err(DemographyError::ExponentialTail);
        }
        let mut survival = 1.0_f64;
        let mut total = 0.0_f64;
        for (i, epoch) in finite.iter().enumerate() {
            let end = self.epochs[i + 1].start_time;
            match epoch.kind {
                EpochKind::Constant => {
                    let lambda = (end - epoch.start_time) / epoch.size;
                    total += epoch.size * survival * -(-lambda).exp_m1();
                    survival *= (-lambda).exp();
                }
                EpochKind::Exponential { .. } => {
                    let dt = (end - epoch.start_time) / EXP_EPOCH_SLICES as f64;
                    for k in 0..EXP_EPOCH_SLICES {
                        let mid = epoch.start_time + (k as f64 + 0.5) * dt;
                        let size = epoch.size_at(mid);
                        let lambda = dt / size;
                        total += size * survival * -(-lambda).exp_m1();
                        survival *= (-lambda).exp();
                    }
                }
            }
        }
        total += last.size * survival;
        Ok(4.0 * total)
    }

    // ── Simulator events ──────────────────────────────────────────────────────

    /// One population-size change per epoch, in start-time order.
    pub fn demographic_events(&self) -> Vec<PopulationSizeChange> {
        self.epochs
            .iter()
            .map(|e| PopulationSizeChange {
                time: e.start_time,
                size: e.size,
                growth_rate: match e.kind {
                    EpochKind::Constant => None,
                    EpochKind::Exponential { rate } => Some(rate),
                },
            })
            .collect()
    }
}

fn parse_field(text: &str, line: usize) -> Result<f64, DemographyError> {
    text.parse().map_err(|_| DemographyError::BadNumber {
        line,
        text: text.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
