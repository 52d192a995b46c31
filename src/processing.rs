//! Signal processors: per-spectrum value transforms that can be chained.
//!
//! Every processor maps one [`Spectrum`] to a new spectrum of the same shape.
//! [`CompositeProcessor`] threads a spectrum through an ordered list of them.

use std::fmt;

use log::debug;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::data::model::{Samples, Spectrum};
use crate::error::{QcError, Result};

/// A transform applied to one spectrum.
pub trait SignalProcessor: fmt::Debug + Send + Sync {
    /// Short name used in error reports.
    fn name(&self) -> &str;

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum>;
}

// ---------------------------------------------------------------------------
// Identity / Abs / Rectifier
// ---------------------------------------------------------------------------

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl SignalProcessor for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        Ok(spectrum.clone())
    }
}

/// Element-wise magnitude. Complex spectra become real.
#[derive(Debug, Clone, Copy, Default)]
pub struct Abs;

impl SignalProcessor for Abs {
    fn name(&self) -> &str {
        "abs"
    }

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        spectrum.with_samples(Samples::Real(spectrum.magnitudes()))
    }
}

/// Raises every value below `floor` to `floor`.
///
/// Negative values mark outliers in the raw voltages, so a floor of zero
/// removes them. Complex values are clipped part by part.
#[derive(Debug, Clone, Copy)]
pub struct Rectifier {
    floor: f64,
}

impl Rectifier {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }
}

impl SignalProcessor for Rectifier {
    fn name(&self) -> &str {
        "rectifier"
    }

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        let floor = self.floor;
        Ok(spectrum.map_parts(|x| if x < floor { floor } else { x }))
    }
}

// ---------------------------------------------------------------------------
// Normalize
// ---------------------------------------------------------------------------

/// Statistic that [`Normalize`] drives to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeTarget {
    /// Divide by the largest magnitude.
    MaxAbs,
    /// Divide by the L2 norm (total energy becomes one).
    Energy,
    /// Affine map of `[min, max]` onto `[0, 1]`; complex spectra are mapped
    /// part by part, each with its own range.
    MinMax,
}

/// Rescales a spectrum. Fails with `DegenerateInput` instead of dividing by zero.
#[derive(Debug, Clone, Copy)]
pub struct Normalize {
    target: NormalizeTarget,
}

impl Normalize {
    pub fn new(target: NormalizeTarget) -> Self {
        Self { target }
    }
}

fn positive_factor(value: f64, what: &str) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(QcError::DegenerateInput(format!("cannot normalize: {what} is {value}")))
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)))
}

fn rescale_range(values: impl Iterator<Item = f64>, what: &str) -> Result<(f64, f64)> {
    let (lo, hi) = min_max(values);
    let range = positive_factor(hi - lo, what)?;
    Ok((lo, range))
}

impl SignalProcessor for Normalize {
    fn name(&self) -> &str {
        "normalize"
    }

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        match self.target {
            NormalizeTarget::MaxAbs => {
                let peak = spectrum.magnitudes().into_iter().fold(0.0, f64::max);
                let peak = positive_factor(peak, "peak magnitude")?;
                Ok(spectrum.map_parts(|x| x / peak))
            }
            NormalizeTarget::Energy => {
                let energy: f64 = spectrum.magnitudes().iter().map(|m| m * m).sum();
                let norm = positive_factor(energy.sqrt(), "L2 norm")?;
                Ok(spectrum.map_parts(|x| x / norm))
            }
            NormalizeTarget::MinMax => match spectrum.samples() {
                Samples::Real(v) => {
                    let (lo, range) = rescale_range(v.iter().copied(), "value range")?;
                    spectrum.with_samples(Samples::Real(v.iter().map(|x| (x - lo) / range).collect()))
                }
                Samples::Complex(v) => {
                    let (re_lo, re_range) = rescale_range(v.iter().map(|z| z.re), "real range")?;
                    let (im_lo, im_range) = rescale_range(v.iter().map(|z| z.im), "imaginary range")?;
                    spectrum.with_samples(Samples::Complex(
                        v.iter()
                            .map(|z| Complex64::new((z.re - re_lo) / re_range, (z.im - im_lo) / im_range))
                            .collect(),
                    ))
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// GainCalculator
// ---------------------------------------------------------------------------

/// How [`GainCalculator`] turns its reference into a correction.
#[derive(Debug, Clone, PartialEq)]
pub enum GainRule {
    /// Power to decibels relative to a reference level:
    /// `10·log10(|x|) − reference_db`. Output is real.
    Decibel { reference_db: f64 },
    /// One gain for every cell.
    Scalar { gain: f64 },
    /// One gain per (range, doppler) cell.
    PerBin { shape: (usize, usize), gains: Vec<f64> },
}

/// Applies a gain correction derived from a reference.
#[derive(Debug, Clone)]
pub struct GainCalculator {
    rule: GainRule,
}

impl GainCalculator {
    pub fn decibel(reference_db: f64) -> Self {
        Self {
            rule: GainRule::Decibel { reference_db },
        }
    }

    pub fn scalar(gain: f64) -> Result<Self> {
        if !gain.is_finite() {
            return Err(QcError::InvalidConfig(format!("gain must be finite, got {gain}")));
        }
        Ok(Self {
            rule: GainRule::Scalar { gain },
        })
    }

    /// Gain = mean power of `reference` / `calibration`.
    pub fn from_reference_power(reference: &Spectrum, calibration: f64) -> Result<Self> {
        if !(calibration.is_finite() && calibration != 0.0) {
            return Err(QcError::InvalidConfig(format!(
                "calibration constant must be finite and nonzero, got {calibration}"
            )));
        }
        let power = reference.magnitudes().iter().map(|m| m * m).sum::<f64>() / reference.len() as f64;
        debug!("reference power {power:.6e}, calibration {calibration}");
        Self::scalar(power / calibration)
    }

    /// Per-cell gain `target / |reference|`, equalising each cell of the
    /// reference to `target`.
    pub fn per_bin(reference: &Spectrum, target: f64) -> Result<Self> {
        let gains = reference
            .magnitudes()
            .into_iter()
            .enumerate()
            .map(|(i, m)| {
                if m > 0.0 && m.is_finite() {
                    Ok(target / m)
                } else {
                    Err(QcError::DegenerateInput(format!("reference cell {i} has magnitude {m}")))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rule: GainRule::PerBin {
                shape: reference.shape(),
                gains,
            },
        })
    }

    pub fn rule(&self) -> &GainRule {
        &self.rule
    }
}

impl SignalProcessor for GainCalculator {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        match &self.rule {
            GainRule::Decibel { reference_db } => {
                let db = spectrum
                    .magnitudes()
                    .into_iter()
                    .enumerate()
                    .map(|(i, m)| {
                        if m > 0.0 {
                            Ok(10.0 * m.log10() - reference_db)
                        } else {
                            Err(QcError::DegenerateInput(format!(
                                "cell {i} has non-positive power {m}, decibels undefined"
                            )))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                spectrum.with_samples(Samples::Real(db))
            }
            GainRule::Scalar { gain } => Ok(spectrum.scaled(*gain)),
            GainRule::PerBin { shape, gains } => {
                spectrum.check_shape(*shape)?;
                let samples = match spectrum.samples() {
                    Samples::Real(v) => Samples::Real(v.iter().zip(gains).map(|(x, g)| x * g).collect()),
                    Samples::Complex(v) => Samples::Complex(v.iter().zip(gains).map(|(z, g)| *z * *g).collect()),
                };
                spectrum.with_samples(samples)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CompositeProcessor
// ---------------------------------------------------------------------------

/// Ordered chain of processors; output of one feeds the next.
///
/// Stops at the first failing stage and reports its index and name.
#[derive(Debug, Default)]
pub struct CompositeProcessor {
    stages: Vec<Box<dyn SignalProcessor>>,
}

impl CompositeProcessor {
    pub fn new(stages: Vec<Box<dyn SignalProcessor>>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: impl SignalProcessor + 'static) {
        self.stages.push(Box::new(stage));
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl SignalProcessor for CompositeProcessor {
    fn name(&self) -> &str {
        "composite"
    }

    fn process(&self, spectrum: &Spectrum) -> Result<Spectrum> {
        let mut current = spectrum.clone();
        for (index, stage) in self.stages.iter().enumerate() {
            current = stage.process(&current).map_err(|source| {
                debug!("stage {index} ({}) failed: {source}", stage.name());
                QcError::Stage {
                    index,
                    name: stage.name().to_string(),
                    source: Box::new(source),
                }
            })?;
        }
        Ok(current)
    }
}
