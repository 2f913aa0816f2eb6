//! Physical units and frame conversions.
//!
//! Wavelengths are carried as plain `f64` arrays tagged with a
//! [`WavelengthUnit`]; every conversion formula below works in Angstrom and
//! converts at the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Speed of light in km/s.
pub const C_KMS: f64 = 299_792.458;

/// Below this wavelength (Angstrom, air) no refraction correction is applied.
const AIRVAC_THRESHOLD: f64 = 2000.0;

// ---------------------------------------------------------------------------
// Wavelength units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WavelengthUnit {
    #[default]
    Angstrom,
    Nanometer,
    Micron,
    Meter,
}

impl WavelengthUnit {
    /// Multiplicative factor taking a value in this unit to Angstrom.
    pub fn to_angstrom(self) -> f64 {
        match self {
            WavelengthUnit::Angstrom => 1.0,
            WavelengthUnit::Nanometer => 10.0,
            WavelengthUnit::Micron => 1.0e4,
            WavelengthUnit::Meter => 1.0e10,
        }
    }

    /// Convert `value` expressed in `self` into `target`.
    pub fn convert(self, value: f64, target: WavelengthUnit) -> f64 {
        value * self.to_angstrom() / target.to_angstrom()
    }
}

impl fmt::Display for WavelengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WavelengthUnit::Angstrom => "Angstrom",
            WavelengthUnit::Nanometer => "nm",
            WavelengthUnit::Micron => "micron",
            WavelengthUnit::Meter => "m",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Flux units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FluxUnit {
    /// Normalized or otherwise unitless flux.
    #[default]
    Dimensionless,
    /// erg / s / cm^2 / Angstrom
    FLambda,
    /// erg / s / cm^2 / Hz
    FNu,
    Jansky,
    Counts,
}

impl fmt::Display for FluxUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FluxUnit::Dimensionless => "",
            FluxUnit::FLambda => "erg / (Angstrom cm2 s)",
            FluxUnit::FNu => "erg / (cm2 Hz s)",
            FluxUnit::Jansky => "Jy",
            FluxUnit::Counts => "ct",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Air <-> vacuum
// ---------------------------------------------------------------------------

fn refraction_factor(wave_aa: f64) -> f64 {
    let sigma_sq = (1.0e4 / wave_aa).powi(2);
    1.0 + 5.792105e-2 / (238.0185 - sigma_sq) + 1.67918e-3 / (57.362 - sigma_sq)
}

/// Air wavelength (Angstrom) to vacuum. Wavelengths below 2000 Angstrom are
/// returned unchanged.
pub fn air_to_vac(wave_aa: f64) -> f64 {
    if wave_aa < AIRVAC_THRESHOLD {
        wave_aa
    } else {
        wave_aa * refraction_factor(wave_aa)
    }
}

/// Vacuum wavelength (Angstrom) to air, the numerical inverse of
/// [`air_to_vac`].
///
/// The cut is placed at the vacuum image of the 2000 Angstrom air threshold,
/// so `vac_to_air(air_to_vac(w)) == w` on both sides of it. Vacuum values in
/// `[2000, air_to_vac(2000))` have no air counterpart and are left unchanged.
pub fn vac_to_air(wave_aa: f64) -> f64 {
    if wave_aa < air_to_vac(AIRVAC_THRESHOLD) {
        return wave_aa;
    }
    // The refraction factor varies by ~1e-7 over the correction itself, so a
    // handful of fixed-point steps reach machine precision.
    let mut air = wave_aa / refraction_factor(wave_aa);
    for _ in 0..6 {
        air = wave_aa / refraction_factor(air);
    }
    air
}

// ---------------------------------------------------------------------------
// Velocity <-> wavelength
// ---------------------------------------------------------------------------

/// Velocity (km/s) of `wave` relative to `wave_ref` (non-relativistic).
pub fn velocity_offset(wave: f64, wave_ref: f64) -> f64 {
    (wave - wave_ref) / wave_ref * C_KMS
}

/// Wavelength at velocity `v` (km/s) relative to `wave_ref`.
pub fn wavelength_from_velocity(v: f64, wave_ref: f64) -> f64 {
    wave_ref * (1.0 + v / C_KMS)
}

/// Redshift obtained by shifting a system at `z` by `v` km/s.
pub fn z_from_v(z: f64, v: f64) -> f64 {
    z + v * (1.0 + z) / C_KMS
}

/// Natural-log wavelength step corresponding to a velocity pixel of `dv` km/s.
pub fn dlnlambda(dv: f64) -> f64 {
    (1.0 + dv / C_KMS).ln()
}
