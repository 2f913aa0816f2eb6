/// Data layer: core types, batches, and array serialization.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Vec<Spectrum>
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  model    │  Spectrum: wave, flux, sigma, continuum, mask, meta
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  batch    │  SpectrumBatch: ordered spectra + selection
///   └──────────┘
/// ```

pub mod batch;
pub mod loader;
pub mod model;
