/// Data layer: file decoding, the in-memory model, and multi-file datasets.
///
/// Architecture:
/// ```text
///   CSS_*.cs bytes
///        │
///        ▼
///   ┌───────────────┐
///   │ serialization │  byte-order aware cursor / writer
///   └───────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  header + interleaved rows → CsFile
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  CsFile, Spectrum, Channel
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ dataset   │  headers + one channel per file → parquet / csv
///   └──────────┘
/// ```

pub mod dataset;
pub mod header;
pub mod loader;
pub mod model;
pub mod serialization;
