use log::debug;

use crate::data::model::{Channel, Samples, Spectrum};
use crate::error::{QcError, Result};
use super::{common_shape, validate_channels, validate_threshold, FilterOutput, Mask, MaskMode, SpectrumFilter};

/// Flags cells whose local standard deviation along the Doppler axis exceeds
/// a threshold.
///
/// The window is centred on each cell within its range row. Near the row
/// ends the window is filled by mirror reflection about the first/last cell
/// (`[.. x2 x1 | x0 x1 x2 ..]`), so every cell sees exactly `window` values.
/// Real spectra use their values, complex spectra their magnitudes. With
/// several input spectra a cell is flagged when any of them exceeds the
/// threshold, and its score is the largest deviation.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    window: usize,
    threshold: f64,
    channels: Vec<Channel>,
    mask_mode: MaskMode,
}

impl NoiseFilter {
    /// `window` must be odd; `mask_mode` may not be `Reconstruct`.
    pub fn new(window: usize, threshold: f64, channels: Vec<Channel>, mask_mode: MaskMode) -> Result<Self> {
        if window == 0 || window % 2 == 0 {
            return Err(QcError::InvalidConfig(format!("window must be a positive odd number, got {window}")));
        }
        validate_threshold(threshold)?;
        validate_channels(&channels)?;
        if mask_mode == MaskMode::Reconstruct {
            return Err(QcError::InvalidConfig("noise filter cannot reconstruct cells".to_string()));
        }
        Ok(Self {
            window,
            threshold,
            channels,
            mask_mode,
        })
    }
}

/// Index into `0..n` after mirror reflection (`-1 → 1`, `n → n - 2`).
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - m) as usize
    }
}

/// Windowed population standard deviation of each value in `row`.
fn windowed_std(row: &[f64], window: usize) -> Vec<f64> {
    let n = row.len();
    let half = (window / 2) as isize;
    let count = window as f64;
    (0..n as isize)
        .map(|centre| {
            let values = (centre - half..=centre + half).map(|i| row[reflect(i, n)]);
            let mean = values.clone().sum::<f64>() / count;
            let var = values.map(|x| (x - mean) * (x - mean)).sum::<f64>() / count;
            var.sqrt()
        })
        .collect()
}

fn cell_values(spectrum: &Spectrum) -> Vec<f64> {
    match spectrum.samples() {
        Samples::Real(v) => v.clone(),
        Samples::Complex(_) => spectrum.magnitudes(),
    }
}

impl SpectrumFilter for NoiseFilter {
    fn name(&self) -> &str {
        "noise"
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn apply(&mut self, spectra: &[&Spectrum]) -> Result<FilterOutput> {
        let (num_range, num_doppler) = common_shape(spectra)?;
        let mut scores = vec![0.0f64; num_range * num_doppler];
        for sp in spectra {
            let values = cell_values(sp);
            for (row_values, row_scores) in values.chunks(num_doppler).zip(scores.chunks_mut(num_doppler)) {
                for (score, std) in row_scores.iter_mut().zip(windowed_std(row_values, self.window)) {
                    *score = score.max(std);
                }
            }
        }

        let flags: Vec<bool> = scores.iter().map(|&s| s > self.threshold).collect();
        let mask = Mask::new((num_range, num_doppler), flags);
        debug!(
            "noise filter: {} of {} cells above {}",
            mask.flagged_count(),
            scores.len(),
            self.threshold
        );

        let spectra = spectra
            .iter()
            .map(|sp| match self.mask_mode {
                MaskMode::Zero => sp.zeroed(mask.flags()),
                _ => (*sp).clone(),
            })
            .collect();
        Ok(FilterOutput { spectra, mask, scores })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn test_reflect() {
        let got: Vec<usize> = (-3..8).map(|i| reflect(i, 5)).collect();
        assert_eq!(got, vec![3, 2, 1, 0, 1, 2, 3, 4, 3, 2, 1]);
        assert_eq!(reflect(-4, 1), 0);
        assert_eq!(reflect(-3, 2), 1);
    }

    #[test]
    fn test_windowed_std_uses_reflection_at_edges() {
        let std = windowed_std(&[0.0, 2.0, 0.0, 0.0], 3);
        // cell 0 sees [2, 0, 2]; cell 3 sees [0, 0, 0]
        let edge = (8.0f64 / 9.0).sqrt();
        assert!((std[0] - edge).abs() < 1e-12, "{std:?}");
        assert!((std[1] - edge).abs() < 1e-12, "{std:?}");
        assert_eq!(std[3], 0.0);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(NoiseFilter::new(4, 1.0, vec![Channel::Antenna3], MaskMode::Zero).is_err());
        assert!(NoiseFilter::new(0, 1.0, vec![Channel::Antenna3], MaskMode::Zero).is_err());
        assert!(NoiseFilter::new(3, -1.0, vec![Channel::Antenna3], MaskMode::Zero).is_err());
        assert!(NoiseFilter::new(3, 1.0, vec![Channel::Antenna3], MaskMode::Reconstruct).is_err());
    }

    #[test]
    fn test_flags_spike_and_zeroes_it() {
        let mut values = vec![1.0; 10];
        values[4] = 50.0;
        let sp = Spectrum::real(2, 5, values).unwrap();
        let mut filter = NoiseFilter::new(3, 5.0, vec![Channel::Antenna3], MaskMode::Zero).unwrap();
        let out = filter.apply(&[&sp]).unwrap();

        // spike at (0, 4): reflected window [1, 50, 1] for cell 4, [1, 1, 50] for cell 3
        assert!(out.mask.is_flagged(0, 4));
        assert!(out.mask.is_flagged(0, 3));
        assert!(!out.mask.is_flagged(0, 0));
        assert!((0..5).all(|d| !out.mask.is_flagged(1, d)));
        assert_eq!(out.spectra[0].row_values(0), vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(out.spectra[0].row_values(1), vec![1.0; 5]);
        assert!(out.is_accepted(0.2));
        assert!(!out.is_accepted(0.1));
    }

    #[test]
    fn test_keep_mode_leaves_spectra_untouched() {
        let sp = Spectrum::complex(
            1,
            3,
            vec![Complex64::new(0.0, 1.0), Complex64::new(30.0, 40.0), Complex64::new(1.0, 0.0)],
        )
        .unwrap();
        let mut filter = NoiseFilter::new(3, 1.0, vec![Channel::Cross12], MaskMode::Keep).unwrap();
        let out = filter.apply(&[&sp]).unwrap();
        assert_eq!(out.spectra[0], sp);
        assert_eq!(out.mask.flagged_count(), 3);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let a = Spectrum::real(2, 2, vec![0.0; 4]).unwrap();
        let b = Spectrum::real(1, 4, vec![0.0; 4]).unwrap();
        let mut filter = NoiseFilter::new(1, 0.0, vec![Channel::Antenna1, Channel::Antenna2], MaskMode::Zero).unwrap();
        assert!(matches!(filter.apply(&[&a, &b]), Err(QcError::ShapeMismatch { .. })));
    }
}
