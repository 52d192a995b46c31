use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{QcError, Result};
use super::header::CsFileHeader;

// ---------------------------------------------------------------------------
// Samples – the value storage of one spectrum
// ---------------------------------------------------------------------------

/// Row-major sample storage, real or complex.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Real(v) => v.len(),
            Samples::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one (range × doppler) block
// ---------------------------------------------------------------------------

/// A decoded range/Doppler spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    num_range: usize,
    num_doppler: usize,
    samples: Samples,
}

impl Spectrum {
    /// Build a spectrum, checking both dimensions are positive and the
    /// sample count matches the shape.
    pub fn new(num_range: usize, num_doppler: usize, samples: Samples) -> Result<Self> {
        let expected = num_range
            .checked_mul(num_doppler)
            .filter(|&cells| cells > 0)
            .ok_or_else(|| QcError::Format(format!("invalid spectrum shape {num_range}x{num_doppler}")))?;
        if samples.len() != expected {
            return Err(QcError::Format(format!(
                "{} samples cannot fill a {num_range}x{num_doppler} spectrum",
                samples.len()
            )));
        }
        Ok(Self {
            num_range,
            num_doppler,
            samples,
        })
    }

    pub fn real(num_range: usize, num_doppler: usize, values: Vec<f64>) -> Result<Self> {
        Self::new(num_range, num_doppler, Samples::Real(values))
    }

    pub fn complex(num_range: usize, num_doppler: usize, values: Vec<Complex64>) -> Result<Self> {
        Self::new(num_range, num_doppler, Samples::Complex(values))
    }

    /// `(num_range, num_doppler)`
    pub fn shape(&self) -> (usize, usize) {
        (self.num_range, self.num_doppler)
    }

    pub fn num_range(&self) -> usize {
        self.num_range
    }

    pub fn num_doppler(&self) -> usize {
        self.num_doppler
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.samples, Samples::Complex(_))
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Same shape, new values.
    pub fn with_samples(&self, samples: Samples) -> Result<Self> {
        Self::new(self.num_range, self.num_doppler, samples)
    }

    pub fn magnitudes(&self) -> Vec<f64> {
        match &self.samples {
            Samples::Real(v) => v.iter().map(|x| x.abs()).collect(),
            Samples::Complex(v) => v.iter().map(|z| z.norm()).collect(),
        }
    }

    /// Values of one range row; complex rows are reported as magnitudes.
    pub fn row_values(&self, range: usize) -> Vec<f64> {
        let start = range * self.num_doppler;
        let end = start + self.num_doppler;
        match &self.samples {
            Samples::Real(v) => v[start..end].to_vec(),
            Samples::Complex(v) => v[start..end].iter().map(|z| z.norm()).collect(),
        }
    }

    /// Apply `f` to every real value; complex values have `f` applied to
    /// the real and imaginary parts independently.
    pub fn map_parts(&self, f: impl Fn(f64) -> f64) -> Spectrum {
        let samples = match &self.samples {
            Samples::Real(v) => Samples::Real(v.iter().map(|&x| f(x)).collect()),
            Samples::Complex(v) => {
                Samples::Complex(v.iter().map(|z| Complex64::new(f(z.re), f(z.im))).collect())
            }
        };
        Spectrum {
            num_range: self.num_range,
            num_doppler: self.num_doppler,
            samples,
        }
    }

    /// Multiply every value by a scalar.
    pub fn scaled(&self, factor: f64) -> Spectrum {
        self.map_parts(|x| x * factor)
    }

    /// Replace the listed cells with zero.
    pub fn zeroed(&self, flags: &[bool]) -> Spectrum {
        let samples = match &self.samples {
            Samples::Real(v) => Samples::Real(
                v.iter()
                    .zip(flags)
                    .map(|(&x, &flag)| if flag { 0.0 } else { x })
                    .collect(),
            ),
            Samples::Complex(v) => Samples::Complex(
                v.iter()
                    .zip(flags)
                    .map(|(&z, &flag)| if flag { Complex64::new(0.0, 0.0) } else { z })
                    .collect(),
            ),
        };
        Spectrum {
            num_range: self.num_range,
            num_doppler: self.num_doppler,
            samples,
        }
    }

    pub fn check_shape(&self, expected: (usize, usize)) -> Result<()> {
        if self.shape() != expected {
            return Err(QcError::ShapeMismatch {
                expected,
                actual: self.shape(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channel – names of the spectra stored in a file
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// First loop antenna (auto-spectrum).
    Antenna1,
    /// Second loop antenna (auto-spectrum).
    Antenna2,
    /// Monopole antenna (auto-spectrum).
    Antenna3,
    Cross12,
    Cross13,
    Cross23,
    /// Per-cell quality values, only present in some file kinds.
    Quality,
}

impl Channel {
    /// The six channels every file carries, in storage order.
    pub const STANDARD: [Channel; 6] = [
        Channel::Antenna1,
        Channel::Antenna2,
        Channel::Antenna3,
        Channel::Cross12,
        Channel::Cross13,
        Channel::Cross23,
    ];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Antenna1 => "antenna1",
            Channel::Antenna2 => "antenna2",
            Channel::Antenna3 => "antenna3",
            Channel::Cross12 => "cross12",
            Channel::Cross13 => "cross13",
            Channel::Cross23 => "cross23",
            Channel::Quality => "quality",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// CsFile – header plus its channel spectra
// ---------------------------------------------------------------------------

/// One decoded cross-spectra file. All spectra share the header's shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CsFile {
    header: CsFileHeader,
    antenna1: Spectrum,
    antenna2: Spectrum,
    antenna3: Spectrum,
    cross12: Spectrum,
    cross13: Spectrum,
    cross23: Spectrum,
    quality: Option<Spectrum>,
}

impl CsFile {
    /// Assemble a file from the six standard spectra (in [`Channel::STANDARD`]
    /// order) and an optional quality spectrum.
    pub fn new(header: CsFileHeader, spectra: [Spectrum; 6], quality: Option<Spectrum>) -> Result<Self> {
        let shape = header.dimensions()?;
        for sp in spectra.iter().chain(quality.iter()) {
            sp.check_shape(shape)?;
        }
        let [antenna1, antenna2, antenna3, cross12, cross13, cross23] = spectra;
        Ok(Self {
            header,
            antenna1,
            antenna2,
            antenna3,
            cross12,
            cross13,
            cross23,
            quality,
        })
    }

    pub fn header(&self) -> &CsFileHeader {
        &self.header
    }

    pub fn shape(&self) -> (usize, usize) {
        self.antenna1.shape()
    }

    pub fn antenna1(&self) -> &Spectrum {
        &self.antenna1
    }

    pub fn antenna2(&self) -> &Spectrum {
        &self.antenna2
    }

    pub fn antenna3(&self) -> &Spectrum {
        &self.antenna3
    }

    pub fn cross12(&self) -> &Spectrum {
        &self.cross12
    }

    pub fn cross13(&self) -> &Spectrum {
        &self.cross13
    }

    pub fn cross23(&self) -> &Spectrum {
        &self.cross23
    }

    pub fn quality(&self) -> Option<&Spectrum> {
        self.quality.as_ref()
    }

    pub fn channel(&self, channel: Channel) -> Option<&Spectrum> {
        match channel {
            Channel::Antenna1 => Some(&self.antenna1),
            Channel::Antenna2 => Some(&self.antenna2),
            Channel::Antenna3 => Some(&self.antenna3),
            Channel::Cross12 => Some(&self.cross12),
            Channel::Cross13 => Some(&self.cross13),
            Channel::Cross23 => Some(&self.cross23),
            Channel::Quality => self.quality.as_ref(),
        }
    }

    /// Look up several channels at once, failing on the first missing one.
    pub fn channels(&self, channels: &[Channel]) -> Result<Vec<&Spectrum>> {
        channels
            .iter()
            .map(|&c| {
                self.channel(c)
                    .ok_or_else(|| QcError::Format(format!("file has no {c} channel")))
            })
            .collect()
    }

    /// Copy of this file with one channel replaced.
    pub fn with_channel(&self, channel: Channel, spectrum: Spectrum) -> Result<CsFile> {
        spectrum.check_shape(self.shape())?;
        let mut out = self.clone();
        match channel {
            Channel::Antenna1 => out.antenna1 = spectrum,
            Channel::Antenna2 => out.antenna2 = spectrum,
            Channel::Antenna3 => out.antenna3 = spectrum,
            Channel::Cross12 => out.cross12 = spectrum,
            Channel::Cross13 => out.cross13 = spectrum,
            Channel::Cross23 => out.cross23 = spectrum,
            Channel::Quality => {
                if out.quality.is_none() {
                    return Err(QcError::Format("file has no quality channel".to_string()));
                }
                out.quality = Some(spectrum);
            }
        }
        Ok(out)
    }

    /// Run every spectrum (quality included) through `f`.
    pub fn map_spectra(&self, mut f: impl FnMut(&Spectrum) -> Result<Spectrum>) -> Result<CsFile> {
        let spectra = [
            f(&self.antenna1)?,
            f(&self.antenna2)?,
            f(&self.antenna3)?,
            f(&self.cross12)?,
            f(&self.cross13)?,
            f(&self.cross23)?,
        ];
        let quality = self.quality.as_ref().map(&mut f).transpose()?;
        CsFile::new(self.header.clone(), spectra, quality)
    }
}
