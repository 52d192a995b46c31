//! Spectrum filters: statistical quality checks over one or more channel
//! spectra of the same file.
//!
//! ```text
//!   CsFile ──channels──▶ [&Spectrum] ──apply──▶ FilterOutput
//!                                                ├─ spectra (zeroed / untouched / reconstructed)
//!                                                ├─ mask    (flagged cells)
//!                                                └─ scores  (per-cell statistic)
//! ```

pub mod linalg;
pub mod noise;
pub mod pca;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::model::{Channel, CsFile, Spectrum};
use crate::error::{QcError, Result};

pub use noise::NoiseFilter;
pub use pca::{FitMode, PcaBasis, PcaFilter, PreFitPcaFilter, ScoreRule};

// ---------------------------------------------------------------------------
// Mask / output types
// ---------------------------------------------------------------------------

/// What happens to flagged cells in the returned spectra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    /// Flagged cells are set to zero.
    Zero,
    /// Spectra are returned unmodified; use the mask.
    Keep,
    /// Flagged cells are replaced by their rank-K reconstruction (PCA filters only).
    Reconstruct,
}

/// Per-cell outlier flags for one (range × doppler) grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    shape: (usize, usize),
    flags: Vec<bool>,
}

impl Mask {
    pub fn new(shape: (usize, usize), flags: Vec<bool>) -> Self {
        debug_assert_eq!(flags.len(), shape.0 * shape.1);
        Self { shape, flags }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    pub fn is_flagged(&self, range: usize, doppler: usize) -> bool {
        self.flags[range * self.shape.1 + doppler]
    }

    pub fn flagged_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }

    /// Share of flagged cells, in `[0, 1]`.
    pub fn flagged_fraction(&self) -> f64 {
        if self.flags.is_empty() {
            0.0
        } else {
            self.flagged_count() as f64 / self.flags.len() as f64
        }
    }
}

/// Result of one filter application.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutput {
    /// Filtered copies, in input order.
    pub spectra: Vec<Spectrum>,
    pub mask: Mask,
    /// Per-cell statistic compared against the threshold.
    pub scores: Vec<f64>,
}

impl FilterOutput {
    /// Quality verdict: accepted when at most `max_flagged_fraction` of the cells are flagged.
    pub fn is_accepted(&self, max_flagged_fraction: f64) -> bool {
        self.mask.flagged_fraction() <= max_flagged_fraction
    }
}

// ---------------------------------------------------------------------------
// SpectrumFilter
// ---------------------------------------------------------------------------

/// A detector that flags anomalous cells across a set of spectra.
pub trait SpectrumFilter: fmt::Debug {
    fn name(&self) -> &str;

    /// Channels this filter reads when applied to a whole file.
    fn channels(&self) -> &[Channel];

    /// Spectra must share one shape.
    fn apply(&mut self, spectra: &[&Spectrum]) -> Result<FilterOutput>;

    fn apply_file(&mut self, file: &CsFile) -> Result<FilterOutput> {
        let channels = self.channels().to_vec();
        let spectra = file.channels(&channels)?;
        self.apply(&spectra)
    }
}

/// Run `filter` on `file` and write the filtered channels back into a copy of it.
pub fn filter_file(filter: &mut dyn SpectrumFilter, file: &CsFile) -> Result<(CsFile, FilterOutput)> {
    let output = filter.apply_file(file)?;
    let mut filtered = file.clone();
    for (&channel, spectrum) in filter.channels().iter().zip(&output.spectra) {
        filtered = filtered.with_channel(channel, spectrum.clone())?;
    }
    Ok((filtered, output))
}

/// Shape shared by all `spectra`.
pub(crate) fn common_shape(spectra: &[&Spectrum]) -> Result<(usize, usize)> {
    let first = spectra
        .first()
        .ok_or_else(|| QcError::InvalidConfig("filter needs at least one spectrum".to_string()))?;
    let shape = first.shape();
    for sp in &spectra[1..] {
        sp.check_shape(shape)?;
    }
    Ok(shape)
}

/// Channel lists must be non-empty and free of repeats.
pub(crate) fn validate_channels(channels: &[Channel]) -> Result<()> {
    if channels.is_empty() {
        return Err(QcError::InvalidConfig("channel list is empty".to_string()));
    }
    for (i, c) in channels.iter().enumerate() {
        if channels[..i].contains(c) {
            return Err(QcError::InvalidConfig(format!("channel {c} listed twice")));
        }
    }
    Ok(())
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<()> {
    if threshold.is_finite() && threshold >= 0.0 {
        Ok(())
    } else {
        Err(QcError::InvalidConfig(format!("threshold must be finite and non-negative, got {threshold}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_fraction() {
        let mask = Mask::new((2, 2), vec![true, false, false, true]);
        assert_eq!(mask.flagged_count(), 2);
        assert_eq!(mask.flagged_fraction(), 0.5);
        assert!(mask.is_flagged(1, 1));
        assert!(!mask.is_flagged(1, 0));
    }

    #[test]
    fn test_common_shape() {
        let a = Spectrum::real(2, 2, vec![0.0; 4]).unwrap();
        let b = Spectrum::real(1, 4, vec![0.0; 4]).unwrap();
        assert_eq!(common_shape(&[&a, &a]).unwrap(), (2, 2));
        assert!(matches!(common_shape(&[&a, &b]), Err(QcError::ShapeMismatch { .. })));
        assert!(common_shape(&[]).is_err());
    }

    #[test]
    fn test_validate_channels() {
        assert!(validate_channels(&[Channel::Antenna1, Channel::Antenna2]).is_ok());
        assert!(validate_channels(&[Channel::Antenna1, Channel::Antenna1]).is_err());
        assert!(validate_channels(&[]).is_err());
    }
}
