//! JSON pipeline description: which processors condition the spectra and
//! which filters judge them.
//!
//! ```json
//! {
//!   "preprocess": [ { "kind": "abs" }, { "kind": "normalize", "target": "max_abs" } ],
//!   "filters": [
//!     { "kind": "noise", "window": 5, "threshold": 0.2,
//!       "channels": ["antenna3"], "mask": "zero" }
//!   ],
//!   "max_flagged_fraction": 0.05
//! }
//! ```
//!
//! Every field is required.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::model::Channel;
use crate::error::{QcError, Result};
use crate::filter::{
    FitMode, MaskMode, NoiseFilter, PcaBasis, PcaFilter, PreFitPcaFilter, ScoreRule, SpectrumFilter,
};
use crate::processing::{
    Abs, CompositeProcessor, GainCalculator, Identity, Normalize, NormalizeTarget, Rectifier, SignalProcessor,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub preprocess: Vec<ProcessorConfig>,
    pub filters: Vec<FilterConfig>,
    /// A file is accepted when every filter flags at most this share of cells.
    pub max_flagged_fraction: f64,
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| QcError::InvalidConfig(format!("pipeline JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_flagged_fraction) {
            return Err(QcError::InvalidConfig(format!(
                "max_flagged_fraction must lie in [0, 1], got {}",
                self.max_flagged_fraction
            )));
        }
        Ok(())
    }

    /// The preprocessing chain as one composite processor.
    pub fn build_preprocess(&self) -> Result<CompositeProcessor> {
        let stages = self
            .preprocess
            .iter()
            .map(ProcessorConfig::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(CompositeProcessor::new(stages))
    }

    pub fn build_filters(&self) -> Result<Vec<Box<dyn SpectrumFilter>>> {
        self.filters.iter().map(FilterConfig::build).collect()
    }
}

// ---------------------------------------------------------------------------
// Processors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProcessorConfig {
    Identity,
    Abs,
    Rectifier { floor: f64 },
    Normalize { target: NormalizeTarget },
    Gain { rule: GainConfig },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum GainConfig {
    Decibel { reference_db: f64 },
    Scalar { gain: f64 },
}

impl ProcessorConfig {
    pub fn build(&self) -> Result<Box<dyn SignalProcessor>> {
        let processor: Box<dyn SignalProcessor> = match self {
            ProcessorConfig::Identity => Box::new(Identity),
            ProcessorConfig::Abs => Box::new(Abs),
            ProcessorConfig::Rectifier { floor } => {
                if !floor.is_finite() {
                    return Err(QcError::InvalidConfig(format!("rectifier floor must be finite, got {floor}")));
                }
                Box::new(Rectifier::new(*floor))
            }
            ProcessorConfig::Normalize { target } => Box::new(Normalize::new(*target)),
            ProcessorConfig::Gain { rule } => match rule {
                GainConfig::Decibel { reference_db } => Box::new(GainCalculator::decibel(*reference_db)),
                GainConfig::Scalar { gain } => Box::new(GainCalculator::scalar(*gain)?),
            },
        };
        Ok(processor)
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Serialized form of a [`PcaBasis`]; validated when the filter is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasisConfig {
    pub mean: Vec<f64>,
    /// Per-feature divisor applied after centring (all ones for raw features).
    pub scale: Vec<f64>,
    pub components: Vec<Vec<f64>>,
    pub explained_variance: Vec<f64>,
}

impl BasisConfig {
    pub fn build(&self) -> Result<PcaBasis> {
        PcaBasis::with_scale(
            self.mean.clone(),
            self.scale.clone(),
            self.components.clone(),
            self.explained_variance.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum FilterConfig {
    Noise {
        window: usize,
        threshold: f64,
        channels: Vec<Channel>,
        mask: MaskMode,
    },
    Pca {
        basis: BasisConfig,
        threshold: f64,
        score: ScoreRule,
        channels: Vec<Channel>,
        mask: MaskMode,
    },
    PreFitPca {
        components: usize,
        threshold: f64,
        score: ScoreRule,
        channels: Vec<Channel>,
        mask: MaskMode,
        standardize: bool,
        fit: FitMode,
    },
}

impl FilterConfig {
    pub fn build(&self) -> Result<Box<dyn SpectrumFilter>> {
        let filter: Box<dyn SpectrumFilter> = match self {
            FilterConfig::Noise {
                window,
                threshold,
                channels,
                mask,
            } => Box::new(NoiseFilter::new(*window, *threshold, channels.clone(), *mask)?),
            FilterConfig::Pca {
                basis,
                threshold,
                score,
                channels,
                mask,
            } => Box::new(PcaFilter::new(basis.build()?, *score, *threshold, channels.clone(), *mask)?),
            FilterConfig::PreFitPca {
                components,
                threshold,
                score,
                channels,
                mask,
                standardize,
                fit,
            } => Box::new(PreFitPcaFilter::new(
                *components,
                *score,
                *threshold,
                channels.clone(),
                *mask,
                *standardize,
                *fit,
            )?),
        };
        Ok(filter)
    }
}
