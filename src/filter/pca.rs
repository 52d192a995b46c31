//! PCA outlier filters.
//!
//! Each (range, doppler) cell becomes one sample whose features are the
//! values of the selected channels at that cell (real channels contribute
//! their value, complex channels their magnitude). Samples are standardised
//! with the basis' mean and scale, projected onto the top-K components, and
//! scored with a [`ScoreRule`]. A cell is flagged when its score is strictly
//! greater than the threshold.

use log::{debug, info};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::data::model::{Channel, Samples, Spectrum};
use crate::error::{QcError, Result};
use super::linalg::{column_means, column_std, covariance, symmetric_eigen, Matrix};
use super::{common_shape, validate_channels, validate_threshold, FilterOutput, Mask, MaskMode, SpectrumFilter};

const ORTHONORMAL_TOLERANCE: f64 = 1e-6;

/// Per-sample outlier statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRule {
    /// Squared norm of the part of the standardised sample outside the
    /// component subspace.
    Residual,
    /// `Σ score_k² / variance_k` over the retained components.
    Mahalanobis,
}

// ---------------------------------------------------------------------------
// PcaBasis
// ---------------------------------------------------------------------------

/// Top-K principal directions plus the standardisation they were fitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct PcaBasis {
    mean: Vec<f64>,
    scale: Vec<f64>,
    components: Vec<Vec<f64>>,
    explained_variance: Vec<f64>,
}

impl PcaBasis {
    /// Basis over unscaled features. `components` must be orthonormal and
    /// each must have `mean.len()` entries.
    pub fn new(mean: Vec<f64>, components: Vec<Vec<f64>>, explained_variance: Vec<f64>) -> Result<Self> {
        let scale = vec![1.0; mean.len()];
        Self::with_scale(mean, scale, components, explained_variance)
    }

    pub fn with_scale(
        mean: Vec<f64>,
        scale: Vec<f64>,
        components: Vec<Vec<f64>>,
        explained_variance: Vec<f64>,
    ) -> Result<Self> {
        let dim = mean.len();
        if dim == 0 {
            return Err(QcError::InvalidConfig("basis has no features".to_string()));
        }
        if components.is_empty() || components.len() > dim {
            return Err(QcError::InvalidConfig(format!(
                "{} components for {dim} features",
                components.len()
            )));
        }
        if scale.len() != dim || scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(QcError::InvalidConfig("scale must hold one positive value per feature".to_string()));
        }
        if explained_variance.len() != components.len()
            || explained_variance.iter().any(|v| !(v.is_finite() && *v >= 0.0))
        {
            return Err(QcError::InvalidConfig(
                "explained variance must hold one non-negative value per component".to_string(),
            ));
        }
        for (i, ci) in components.iter().enumerate() {
            if ci.len() != dim {
                return Err(QcError::InvalidConfig(format!("component {i} has {} entries, expected {dim}", ci.len())));
            }
            for (j, cj) in components.iter().enumerate().skip(i) {
                let expected = if i == j { 1.0 } else { 0.0 };
                if (dot(ci, cj) - expected).abs() > ORTHONORMAL_TOLERANCE {
                    return Err(QcError::InvalidConfig(format!("components {i} and {j} are not orthonormal")));
                }
            }
        }
        Ok(Self {
            mean,
            scale,
            components,
            explained_variance,
        })
    }

    /// Fit the top `k` components of the rows of `samples`.
    ///
    /// Mean-centres each feature (and divides by its population standard
    /// deviation when `standardize` is set; constant features keep scale 1),
    /// eigen-decomposes the sample covariance and keeps the `k` leading
    /// eigenvectors, each signed so its first significant entry is positive.
    pub fn fit(samples: &Matrix, k: usize, standardize: bool) -> Result<Self> {
        let dim = samples.cols();
        if k == 0 || k > dim {
            return Err(QcError::InvalidConfig(format!("cannot keep {k} components of {dim} features")));
        }
        if samples.rows() < k {
            return Err(QcError::InsufficientData {
                samples: samples.rows(),
                components: k,
            });
        }

        let mean = column_means(samples);
        let scale = if standardize {
            column_std(samples, &mean)
                .into_iter()
                .map(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 })
                .collect()
        } else {
            vec![1.0; dim]
        };
        let cov = covariance(samples, &mean, &scale);
        let eig = symmetric_eigen(&cov);

        let components: Vec<Vec<f64>> = eig.vectors.into_iter().take(k).collect();
        let explained_variance: Vec<f64> = eig.values.into_iter().take(k).map(|v| v.max(0.0)).collect();
        debug!(
            "fitted {k} of {dim} components on {} samples, variance {explained_variance:?}",
            samples.rows()
        );
        Ok(Self {
            mean,
            scale,
            components,
            explained_variance,
        })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn components(&self) -> &[Vec<f64>] {
        &self.components
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    /// Centred and scaled copy of `sample`, which must have `dim()` features.
    fn standardise(&self, sample: &[f64]) -> Result<Vec<f64>> {
        if sample.len() != self.dim() {
            return Err(QcError::InvalidConfig(format!(
                "sample has {} features, basis expects {}",
                sample.len(),
                self.dim()
            )));
        }
        Ok(sample
            .iter()
            .zip(&self.mean)
            .zip(&self.scale)
            .map(|((x, m), s)| (x - m) / s)
            .collect())
    }

    /// Component scores of one sample.
    pub fn project(&self, sample: &[f64]) -> Result<Vec<f64>> {
        let z = self.standardise(sample)?;
        Ok(self.components.iter().map(|c| dot(c, &z)).collect())
    }

    /// Rank-K approximation of `sample`, in original units.
    pub fn reconstruct(&self, sample: &[f64]) -> Result<Vec<f64>> {
        let scores = self.project(sample)?;
        Ok((0..self.dim())
            .map(|j| {
                let z: f64 = self.components.iter().zip(&scores).map(|(c, s)| c[j] * s).sum();
                self.mean[j] + self.scale[j] * z
            })
            .collect())
    }

    pub fn score(&self, sample: &[f64], rule: ScoreRule) -> Result<f64> {
        let z = self.standardise(sample)?;
        let scores: Vec<f64> = self.components.iter().map(|c| dot(c, &z)).collect();
        Ok(match rule {
            ScoreRule::Residual => (0..self.dim())
                .map(|j| {
                    let explained: f64 = self.components.iter().zip(&scores).map(|(c, s)| c[j] * s).sum();
                    let r = z[j] - explained;
                    r * r
                })
                .sum(),
            ScoreRule::Mahalanobis => scores
                .iter()
                .zip(&self.explained_variance)
                .map(|(s, v)| s * s / v)
                .sum(),
        })
    }

    fn check_rule(&self, rule: ScoreRule) -> Result<()> {
        if rule == ScoreRule::Mahalanobis && self.explained_variance.iter().any(|&v| v <= 0.0) {
            return Err(QcError::DegenerateInput(
                "Mahalanobis scoring needs every retained component to have positive variance".to_string(),
            ));
        }
        Ok(())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ---------------------------------------------------------------------------
// Sample construction and scoring shared by both filters
// ---------------------------------------------------------------------------

/// One row per cell, one column per spectrum.
fn build_samples(spectra: &[&Spectrum]) -> Result<Matrix> {
    let (num_range, num_doppler) = common_shape(spectra)?;
    let cells = num_range * num_doppler;
    let dim = spectra.len();
    let mut samples = Matrix::new(cells, dim);
    for (j, sp) in spectra.iter().enumerate() {
        for (i, value) in feature_values(sp).into_iter().enumerate() {
            samples.set(i, j, value);
        }
    }
    Ok(samples)
}

fn feature_values(spectrum: &Spectrum) -> Vec<f64> {
    match spectrum.samples() {
        Samples::Real(v) => v.clone(),
        Samples::Complex(_) => spectrum.magnitudes(),
    }
}

fn evaluate(
    basis: &PcaBasis,
    rule: ScoreRule,
    threshold: f64,
    mask_mode: MaskMode,
    spectra: &[&Spectrum],
) -> Result<FilterOutput> {
    if spectra.len() != basis.dim() {
        return Err(QcError::InvalidConfig(format!(
            "basis has {} features but {} spectra were supplied",
            basis.dim(),
            spectra.len()
        )));
    }
    basis.check_rule(rule)?;
    let shape = common_shape(spectra)?;
    let samples = build_samples(spectra)?;

    let scores: Vec<f64> = (0..samples.rows())
        .map(|i| basis.score(samples.row(i), rule))
        .collect::<Result<_>>()?;
    let flags: Vec<bool> = scores.iter().map(|&s| s > threshold).collect();
    let mask = Mask::new(shape, flags);

    let spectra = match mask_mode {
        MaskMode::Zero => spectra.iter().map(|sp| sp.zeroed(mask.flags())).collect(),
        MaskMode::Keep => spectra.iter().map(|sp| (*sp).clone()).collect(),
        MaskMode::Reconstruct => reconstruct_flagged(basis, &samples, &mask, spectra)?,
    };
    Ok(FilterOutput { spectra, mask, scores })
}

/// Replace flagged cells by their rank-K reconstruction. Complex cells keep
/// their phase and take the reconstructed magnitude.
fn reconstruct_flagged(
    basis: &PcaBasis,
    samples: &Matrix,
    mask: &Mask,
    spectra: &[&Spectrum],
) -> Result<Vec<Spectrum>> {
    let mut out: Vec<Samples> = spectra.iter().map(|sp| sp.samples().clone()).collect();
    for i in (0..mask.flags().len()).filter(|&i| mask.flags()[i]) {
        let approx = basis.reconstruct(samples.row(i))?;
        for (channel, value) in out.iter_mut().zip(approx) {
            match channel {
                Samples::Real(v) => v[i] = value,
                Samples::Complex(v) => {
                    let norm = v[i].norm();
                    v[i] = if norm > 0.0 {
                        v[i] * (value / norm)
                    } else {
                        Complex64::new(value, 0.0)
                    };
                }
            }
        }
    }
    spectra
        .iter()
        .zip(out)
        .map(|(sp, samples)| sp.with_samples(samples))
        .collect()
}

// ---------------------------------------------------------------------------
// PcaFilter – fixed basis
// ---------------------------------------------------------------------------

/// Outlier filter over a basis supplied at construction.
#[derive(Debug, Clone)]
pub struct PcaFilter {
    basis: PcaBasis,
    rule: ScoreRule,
    threshold: f64,
    channels: Vec<Channel>,
    mask_mode: MaskMode,
}

impl PcaFilter {
    pub fn new(
        basis: PcaBasis,
        rule: ScoreRule,
        threshold: f64,
        channels: Vec<Channel>,
        mask_mode: MaskMode,
    ) -> Result<Self> {
        validate_threshold(threshold)?;
        validate_channels(&channels)?;
        if channels.len() != basis.dim() {
            return Err(QcError::InvalidConfig(format!(
                "basis has {} features but {} channels are selected",
                basis.dim(),
                channels.len()
            )));
        }
        if rule == ScoreRule::Mahalanobis && basis.explained_variance().iter().any(|&v| v <= 0.0) {
            return Err(QcError::InvalidConfig(
                "Mahalanobis scoring needs positive explained variance".to_string(),
            ));
        }
        Ok(Self {
            basis,
            rule,
            threshold,
            channels,
            mask_mode,
        })
    }

    pub fn basis(&self) -> &PcaBasis {
        &self.basis
    }
}

impl SpectrumFilter for PcaFilter {
    fn name(&self) -> &str {
        "pca"
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn apply(&mut self, spectra: &[&Spectrum]) -> Result<FilterOutput> {
        evaluate(&self.basis, self.rule, self.threshold, self.mask_mode, spectra)
    }
}

// ---------------------------------------------------------------------------
// PreFitPcaFilter – basis fitted from the data
// ---------------------------------------------------------------------------

/// When [`PreFitPcaFilter`] fits its basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Every `apply` fits a fresh basis from its own input and discards it.
    PerCall,
    /// The basis from [`PreFitPcaFilter::fit`] (or, failing that, from the
    /// first `apply`) is kept and reused by later calls.
    Persist,
}

/// Same scoring as [`PcaFilter`], with the basis fitted from the data.
#[derive(Debug, Clone)]
pub struct PreFitPcaFilter {
    components: usize,
    rule: ScoreRule,
    threshold: f64,
    channels: Vec<Channel>,
    mask_mode: MaskMode,
    standardize: bool,
    fit_mode: FitMode,
    basis: Option<PcaBasis>,
}

impl PreFitPcaFilter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        components: usize,
        rule: ScoreRule,
        threshold: f64,
        channels: Vec<Channel>,
        mask_mode: MaskMode,
        standardize: bool,
        fit_mode: FitMode,
    ) -> Result<Self> {
        validate_threshold(threshold)?;
        validate_channels(&channels)?;
        if components == 0 || components > channels.len() {
            return Err(QcError::InvalidConfig(format!(
                "cannot keep {components} components of {} channels",
                channels.len()
            )));
        }
        Ok(Self {
            components,
            rule,
            threshold,
            channels,
            mask_mode,
            standardize,
            fit_mode,
            basis: None,
        })
    }

    /// Basis kept from an earlier fit (`Persist` mode only).
    pub fn basis(&self) -> Option<&PcaBasis> {
        self.basis.as_ref()
    }

    /// Fit and keep a basis from several batches of channel spectra (e.g. one
    /// batch per file). Only available in `Persist` mode.
    pub fn fit(&mut self, batches: &[Vec<&Spectrum>]) -> Result<&PcaBasis> {
        if self.fit_mode != FitMode::Persist {
            return Err(QcError::InvalidConfig("explicit fitting requires persist mode".to_string()));
        }
        let mut rows = Vec::new();
        let mut count = 0;
        for batch in batches {
            let samples = self.batch_samples(batch)?;
            count += samples.rows();
            for i in 0..samples.rows() {
                rows.extend_from_slice(samples.row(i));
            }
        }
        let samples = Matrix::from_data(count, self.channels.len(), rows);
        let basis = PcaBasis::fit(&samples, self.components, self.standardize)?;
        info!("pre-fit PCA basis fitted on {count} samples from {} batches", batches.len());
        Ok(&*self.basis.insert(basis))
    }

    fn batch_samples(&self, spectra: &[&Spectrum]) -> Result<Matrix> {
        if spectra.len() != self.channels.len() {
            return Err(QcError::InvalidConfig(format!(
                "filter reads {} channels but {} spectra were supplied",
                self.channels.len(),
                spectra.len()
            )));
        }
        build_samples(spectra)
    }
}

impl SpectrumFilter for PreFitPcaFilter {
    fn name(&self) -> &str {
        "pre_fit_pca"
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn apply(&mut self, spectra: &[&Spectrum]) -> Result<FilterOutput> {
        let basis = match (self.fit_mode, self.basis.take()) {
            (FitMode::Persist, Some(basis)) => basis,
            _ => {
                let samples = self.batch_samples(spectra)?;
                PcaBasis::fit(&samples, self.components, self.standardize)?
            }
        };
        let output = evaluate(&basis, self.rule, self.threshold, self.mask_mode, spectra);
        if self.fit_mode == FitMode::Persist {
            self.basis = Some(basis);
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three channels, mostly proportional (1 : 2 : 3), one cell off the line.
    fn correlated_spectra() -> Vec<Spectrum> {
        let base: Vec<f64> = (0..12).map(|i| 1.0 + i as f64).collect();
        let mut a = base.clone();
        let b: Vec<f64> = base.iter().map(|x| 2.0 * x).collect();
        let c: Vec<f64> = base.iter().map(|x| 3.0 * x).collect();
        a[5] += 14.0;
        vec![
            Spectrum::real(3, 4, a).unwrap(),
            Spectrum::real(3, 4, b).unwrap(),
            Spectrum::real(3, 4, c).unwrap(),
        ]
    }

    fn refs(spectra: &[Spectrum]) -> Vec<&Spectrum> {
        spectra.iter().collect()
    }

    fn channels3() -> Vec<Channel> {
        vec![Channel::Antenna1, Channel::Antenna2, Channel::Antenna3]
    }

    fn diagonal_basis() -> PcaBasis {
        let s = 1.0 / 14f64.sqrt();
        PcaBasis::new(vec![0.0; 3], vec![vec![s, 2.0 * s, 3.0 * s]], vec![1.0]).unwrap()
    }

    #[test]
    fn test_basis_rejects_non_orthonormal() {
        let err = PcaBasis::new(vec![0.0; 2], vec![vec![1.0, 1.0]], vec![1.0]).unwrap_err();
        assert!(matches!(err, QcError::InvalidConfig(_)));
        let err = PcaBasis::new(vec![0.0; 2], vec![vec![1.0, 0.0], vec![0.6, 0.8]], vec![1.0, 1.0]).unwrap_err();
        assert!(matches!(err, QcError::InvalidConfig(_)));
        assert!(PcaBasis::new(vec![0.0; 2], vec![vec![1.0, 0.0]], vec![1.0, 2.0]).is_err());
    }

    #[test]
    fn test_residual_score_of_point_on_line_is_zero() {
        let basis = diagonal_basis();
        assert!(basis.score(&[2.0, 4.0, 6.0], ScoreRule::Residual).unwrap() < 1e-20);
        let off = basis.score(&[1.0, 0.0, 0.0], ScoreRule::Residual).unwrap();
        assert!((off - 13.0 / 14.0).abs() < 1e-12, "{off}");
        let m = basis.score(&[1.0, 2.0, 3.0], ScoreRule::Mahalanobis).unwrap();
        assert!((m - 14.0).abs() < 1e-12, "{m}");
    }

    #[test]
    fn test_reconstruct_projects_onto_subspace() {
        let basis = diagonal_basis();
        let r = basis.reconstruct(&[14.0, 0.0, 0.0]).unwrap();
        for (got, want) in r.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-12, "{r:?}");
        }
    }

    #[test]
    fn test_sample_length_must_match_basis() {
        let basis = diagonal_basis();
        assert!(matches!(basis.score(&[1.0, 2.0], ScoreRule::Residual), Err(QcError::InvalidConfig(_))));
        assert!(basis.project(&[1.0, 2.0, 3.0, 4.0]).is_err());
        assert!(basis.reconstruct(&[]).is_err());
        assert_eq!(basis.project(&[0.0, 0.0, 0.0]).unwrap().len(), 1);
    }

    #[test]
    fn test_pca_filter_flags_off_line_cell() {
        let spectra = correlated_spectra();
        let mut filter = PcaFilter::new(diagonal_basis(), ScoreRule::Residual, 1.0, channels3(), MaskMode::Zero).unwrap();
        let out = filter.apply(&refs(&spectra)).unwrap();
        assert_eq!(out.mask.flagged_count(), 1);
        assert!(out.mask.is_flagged(1, 1));
        for sp in &out.spectra {
            assert_eq!(sp.row_values(1)[1], 0.0);
        }
        assert_eq!(out.spectra[1].row_values(0), spectra[1].row_values(0));
    }

    #[test]
    fn test_pca_filter_is_deterministic() {
        let spectra = correlated_spectra();
        let mut filter =
            PcaFilter::new(diagonal_basis(), ScoreRule::Mahalanobis, 500.0, channels3(), MaskMode::Keep).unwrap();
        let first = filter.apply(&refs(&spectra)).unwrap();
        let second = filter.apply(&refs(&spectra)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_pca_filter_dimension_checks() {
        assert!(PcaFilter::new(diagonal_basis(), ScoreRule::Residual, 1.0, vec![Channel::Antenna1], MaskMode::Zero).is_err());
        let spectra = correlated_spectra();
        let mut filter = PcaFilter::new(diagonal_basis(), ScoreRule::Residual, 1.0, channels3(), MaskMode::Zero).unwrap();
        assert!(filter.apply(&refs(&spectra[..2])).is_err());
        let zero_var = PcaBasis::new(vec![0.0; 3], diagonal_basis().components().to_vec(), vec![0.0]).unwrap();
        assert!(matches!(
            PcaFilter::new(zero_var, ScoreRule::Mahalanobis, 1.0, channels3(), MaskMode::Zero),
            Err(QcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reconstruct_mode_replaces_flagged_cell() {
        let spectra = correlated_spectra();
        let mut filter =
            PcaFilter::new(diagonal_basis(), ScoreRule::Residual, 1.0, channels3(), MaskMode::Reconstruct).unwrap();
        let out = filter.apply(&refs(&spectra)).unwrap();
        // cell 5 was (20, 12, 18); its projection onto (1,2,3) is (7, 14, 21)
        let fixed: Vec<f64> = out.spectra.iter().map(|sp| sp.row_values(1)[1]).collect();
        for (got, want) in fixed.iter().zip([7.0, 14.0, 21.0]) {
            assert!((got - want).abs() < 1e-9, "{fixed:?}");
        }
        assert_eq!(out.spectra[0].row_values(0), spectra[0].row_values(0));
    }

    #[test]
    fn test_reconstruct_keeps_complex_phase() {
        let basis = PcaBasis::new(vec![0.0; 2], vec![vec![1.0, 0.0]], vec![1.0]).unwrap();
        let a = Spectrum::real(1, 1, vec![3.0]).unwrap();
        let b = Spectrum::complex(1, 1, vec![Complex64::new(0.0, 2.0)]).unwrap();
        let mut filter = PcaFilter::new(
            basis,
            ScoreRule::Residual,
            1.0,
            vec![Channel::Antenna1, Channel::Cross12],
            MaskMode::Reconstruct,
        )
        .unwrap();
        let out = filter.apply(&[&a, &b]).unwrap();
        assert!(out.mask.is_flagged(0, 0));
        // reconstructed magnitude of the cross channel is 0, phase kept
        match out.spectra[1].samples() {
            Samples::Complex(v) => assert_eq!(v[0], Complex64::new(0.0, 0.0)),
            Samples::Real(_) => panic!("cross channel became real"),
        }
    }

    #[test]
    fn test_fit_recovers_dominant_direction() {
        let spectra = correlated_spectra();
        let samples = build_samples(&refs(&spectra)).unwrap();
        let basis = PcaBasis::fit(&samples, 1, false).unwrap();
        let c = &basis.components()[0];
        assert!(c.iter().all(|&x| x > 0.0), "sign convention violated: {c:?}");
        assert!(c[2] > c[1] && c[1] > 0.5 * c[2], "{c:?}");
        assert!((dot(c, c) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_is_reproducible() {
        let spectra = correlated_spectra();
        let samples = build_samples(&refs(&spectra)).unwrap();
        let a = PcaBasis::fit(&samples, 2, true).unwrap();
        let b = PcaBasis::fit(&samples, 2, true).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_insufficient_data() {
        let a = Spectrum::real(1, 2, vec![1.0, 2.0]).unwrap();
        let b = Spectrum::real(1, 2, vec![2.0, 5.0]).unwrap();
        let c = Spectrum::real(1, 2, vec![0.0, 1.0]).unwrap();
        let mut filter = PreFitPcaFilter::new(
            3,
            ScoreRule::Residual,
            1.0,
            channels3(),
            MaskMode::Zero,
            false,
            FitMode::PerCall,
        )
        .unwrap();
        let err = filter.apply(&[&a, &b, &c]).unwrap_err();
        assert!(matches!(err, QcError::InsufficientData { samples: 2, components: 3 }), "{err}");

        let one = Spectrum::real(1, 1, vec![1.0]).unwrap();
        let mut filter =
            PreFitPcaFilter::new(2, ScoreRule::Residual, 1.0, channels3(), MaskMode::Zero, false, FitMode::PerCall).unwrap();
        assert!(matches!(
            filter.apply(&[&one, &one, &one]),
            Err(QcError::InsufficientData { samples: 1, components: 2 })
        ));
    }

    #[test]
    fn test_pre_fit_flags_outlier() {
        let spectra = correlated_spectra();
        let mut filter =
            PreFitPcaFilter::new(1, ScoreRule::Residual, 5.0, channels3(), MaskMode::Zero, false, FitMode::PerCall).unwrap();
        let out = filter.apply(&refs(&spectra)).unwrap();
        assert!(out.mask.is_flagged(1, 1), "scores {:?}", out.scores);
        let worst = out
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(worst, Some(5));
        assert!(filter.basis().is_none(), "per-call mode must not keep a basis");
    }

    #[test]
    fn test_persist_mode_reuses_basis() {
        let spectra = correlated_spectra();
        let mut filter =
            PreFitPcaFilter::new(1, ScoreRule::Residual, 5.0, channels3(), MaskMode::Keep, false, FitMode::Persist).unwrap();
        let fitted = filter.fit(&[refs(&spectra)]).unwrap().clone();

        let flat: Vec<Spectrum> = (0..3).map(|_| Spectrum::real(3, 4, vec![1.0; 12]).unwrap()).collect();
        filter.apply(&refs(&flat)).unwrap();
        assert_eq!(filter.basis(), Some(&fitted));

        let mut per_call =
            PreFitPcaFilter::new(1, ScoreRule::Residual, 5.0, channels3(), MaskMode::Keep, false, FitMode::PerCall).unwrap();
        assert!(per_call.fit(&[refs(&spectra)]).is_err());
    }
}
