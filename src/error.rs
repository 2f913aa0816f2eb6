use thiserror::Error;

use crate::units::{FluxUnit, WavelengthUnit};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Errors raised by the spectrum container and the operations built on it.
///
/// Windowing problems (a requested range partly outside the spectrum) are not
/// errors: they are clipped to the nearest valid pixel and logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("array '{name}' has {got} values but the wavelength array has {expected}")]
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("wavelength array is not strictly increasing at pixel {index}")]
    NotMonotonic { index: usize },

    #[error("spectrum {index} does not share the common wavelength grid; rebin first")]
    IncompatibleGrids { index: usize },

    #[error("wavelength units differ: {0:?} vs {1:?}")]
    IncompatibleWavelengthUnits(WavelengthUnit, WavelengthUnit),

    #[error("flux units differ: {0:?} vs {1:?}")]
    IncompatibleFluxUnits(FluxUnit, FluxUnit),

    #[error("{0}")]
    EmptyBatch(&'static str),

    #[error("got {redshifts} redshifts for {spectra} spectra")]
    RedshiftCount { redshifts: usize, spectra: usize },

    #[error("wavelengths are already in the {0} frame")]
    AlreadyInFrame(&'static str),

    #[error("uncertainty array is not set")]
    UndefinedUncertainty,

    #[error("continuum is not set")]
    MissingContinuum,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown transition '{0}'")]
    UnknownTransition(String),
}

pub type Result<T> = std::result::Result<T, SpecError>;
