//! One-dimensional astronomical spectra: storage with uncertainties and
//! continua, flux-conserving resampling, smoothing, batch stacking and
//! splicing, and absorption-line measurements.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod processing;
pub mod units;

pub use analysis::absline::{AbsLineSet, AbsorptionLine, AnalysisFlags, LimitFlag};
pub use analysis::linelist::{LineList, Transition, TransitionTable};
pub use data::batch::SpectrumBatch;
pub use data::model::{AirVac, MetadataValue, Spectrum, SpectrumMeta};
pub use error::{Result, SpecError};
pub use processing::collection::{collate, rebin_to_rest, smash_spectra, splice_two, CombineMethod};
pub use units::{FluxUnit, WavelengthUnit};
