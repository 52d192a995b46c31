//! Quality control for HF radar cross-spectra (CS) files: decoding,
//! per-spectrum conditioning and statistical outlier filters.

pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod processing;

pub use data::dataset::DataSet;
pub use data::header::CsFileHeader;
pub use data::model::{Channel, CsFile, Samples, Spectrum};
pub use error::{QcError, Result};
