use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};
use crate::units::{self, FluxUnit, WavelengthUnit};

// ---------------------------------------------------------------------------
// MetadataValue – a single free-form metadata entry
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (header cards, provenance columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum metadata
// ---------------------------------------------------------------------------

/// Reference frame of the wavelength array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AirVac {
    #[serde(rename = "air")]
    Air,
    #[default]
    #[serde(rename = "vac")]
    Vacuum,
}

impl AirVac {
    pub fn as_str(self) -> &'static str {
        match self {
            AirVac::Air => "air",
            AirVac::Vacuum => "vac",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrumMeta {
    /// Wavelength frame; vacuum unless stated otherwise.
    #[serde(default)]
    pub airvac: AirVac,
    /// Continuum control points `(wavelength, continuum)`, sorted by wavelength.
    #[serde(default)]
    pub contpoints: Vec<(f64, f64)>,
    /// Instrument / file provenance.
    #[serde(default)]
    pub instrument: Option<String>,
    /// Anything else carried along from the input file.
    #[serde(default)]
    pub extra: BTreeMap<String, MetadataValue>,
}

// ---------------------------------------------------------------------------
// Spectrum – one 1-D spectrum
// ---------------------------------------------------------------------------

/// A single 1-D spectrum.
///
/// Flux is stored as observed. When `normalized` is set, [`Spectrum::flux`]
/// and [`Spectrum::sigma`] return the continuum-divided view, so
/// [`Spectrum::unnormalize`] restores the original values exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub(crate) wave: Vec<f64>,
    pub(crate) flux: Vec<f64>,
    pub(crate) sigma: Option<Vec<f64>>,
    pub(crate) continuum: Option<Vec<f64>>,
    /// `true` marks a valid pixel.
    pub(crate) mask: Vec<bool>,
    pub(crate) normalized: bool,
    pub(crate) wave_unit: WavelengthUnit,
    pub(crate) flux_unit: FluxUnit,
    pub(crate) meta: SpectrumMeta,
}

fn check_len(name: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(SpecError::ShapeMismatch {
            name,
            expected,
            got,
        });
    }
    Ok(())
}

fn check_monotonic(wave: &[f64]) -> Result<()> {
    match wave.windows(2).position(|w| !(w[1] > w[0])) {
        Some(i) => Err(SpecError::NotMonotonic { index: i + 1 }),
        None => Ok(()),
    }
}

fn check_sigma(sigma: &[f64]) -> Result<()> {
    match sigma.iter().position(|&s| s < 0.0) {
        Some(i) => Err(SpecError::InvalidParameter(format!(
            "negative uncertainty at pixel {i}"
        ))),
        None => Ok(()),
    }
}

impl Spectrum {
    /// Build a spectrum from `(wavelength, flux[, sigma])` in Angstrom with
    /// dimensionless flux. Use [`Spectrum::with_units`] to tag real units.
    pub fn new(wave: Vec<f64>, flux: Vec<f64>, sigma: Option<Vec<f64>>) -> Result<Self> {
        let n = wave.len();
        check_len("flux", n, flux.len())?;
        check_monotonic(&wave)?;
        if let Some(sig) = &sigma {
            check_len("sigma", n, sig.len())?;
            check_sigma(sig)?;
        }
        Ok(Spectrum {
            wave,
            flux,
            sigma,
            continuum: None,
            mask: vec![true; n],
            normalized: false,
            wave_unit: WavelengthUnit::Angstrom,
            flux_unit: FluxUnit::Dimensionless,
            meta: SpectrumMeta::default(),
        })
    }

    pub fn from_tuple(arrays: (Vec<f64>, Vec<f64>, Option<Vec<f64>>)) -> Result<Self> {
        let (wave, flux, sigma) = arrays;
        Self::new(wave, flux, sigma)
    }

    pub fn with_units(mut self, wave_unit: WavelengthUnit, flux_unit: FluxUnit) -> Self {
        self.wave_unit = wave_unit;
        self.flux_unit = flux_unit;
        self
    }

    pub fn with_continuum(mut self, continuum: Vec<f64>) -> Result<Self> {
        self.set_continuum(continuum)?;
        Ok(self)
    }

    pub fn with_meta(mut self, meta: SpectrumMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Fully independent deep copy.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    // -- accessors --

    /// Allocated number of pixels (valid or not).
    pub fn len(&self) -> usize {
        self.wave.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }

    /// Number of valid (unmasked) pixels.
    pub fn npix(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wave
    }

    /// Flux, divided by the continuum when the spectrum is normalized.
    pub fn flux(&self) -> Cow<'_, [f64]> {
        match (&self.continuum, self.normalized) {
            (Some(co), true) => Cow::Owned(divide(&self.flux, co)),
            _ => Cow::Borrowed(&self.flux),
        }
    }

    /// Uncertainty, or `None` when it was never set. Follows the same
    /// normalization view as [`Spectrum::flux`].
    pub fn sigma(&self) -> Option<Cow<'_, [f64]>> {
        let sig = self.sigma.as_ref()?;
        Some(match (&self.continuum, self.normalized) {
            (Some(co), true) => Cow::Owned(divide(sig, co)),
            _ => Cow::Borrowed(sig.as_slice()),
        })
    }

    /// Stored flux regardless of normalization.
    pub fn raw_flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn raw_sigma(&self) -> Option<&[f64]> {
        self.sigma.as_deref()
    }

    pub fn continuum(&self) -> Option<&[f64]> {
        self.continuum.as_deref()
    }

    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn sig_is_set(&self) -> bool {
        self.sigma.is_some()
    }

    pub fn co_is_set(&self) -> bool {
        self.continuum.is_some()
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized
    }

    pub fn wave_unit(&self) -> WavelengthUnit {
        self.wave_unit
    }

    /// Flux unit of [`Spectrum::flux`]; dimensionless while normalized.
    pub fn flux_unit(&self) -> FluxUnit {
        if self.normalized {
            FluxUnit::Dimensionless
        } else {
            self.flux_unit
        }
    }

    pub fn meta(&self) -> &SpectrumMeta {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut SpectrumMeta {
        &mut self.meta
    }

    /// Smallest wavelength among valid pixels.
    pub fn wvmin(&self) -> Option<f64> {
        self.valid_waves().next()
    }

    /// Largest wavelength among valid pixels.
    pub fn wvmax(&self) -> Option<f64> {
        self.valid_waves().next_back()
    }

    fn valid_waves(&self) -> impl DoubleEndedIterator<Item = f64> + '_ {
        self.wave
            .iter()
            .zip(&self.mask)
            .filter(|(_, &m)| m)
            .map(|(&w, _)| w)
    }

    // -- assignment --

    pub fn set_wavelength(&mut self, wave: Vec<f64>, unit: WavelengthUnit) -> Result<()> {
        check_len("wavelength", self.len(), wave.len())?;
        check_monotonic(&wave)?;
        self.wave = wave;
        self.wave_unit = unit;
        Ok(())
    }

    /// Replace the stored (un-normalized) flux.
    pub fn set_flux(&mut self, flux: Vec<f64>, unit: FluxUnit) -> Result<()> {
        check_len("flux", self.len(), flux.len())?;
        self.flux = flux;
        self.flux_unit = unit;
        Ok(())
    }

    /// Replace the uncertainty; it takes the flux unit.
    pub fn set_sigma(&mut self, sigma: Vec<f64>) -> Result<()> {
        check_len("sigma", self.len(), sigma.len())?;
        check_sigma(&sigma)?;
        self.sigma = Some(sigma);
        Ok(())
    }

    /// Replace the continuum; it takes the flux unit.
    pub fn set_continuum(&mut self, continuum: Vec<f64>) -> Result<()> {
        check_len("continuum", self.len(), continuum.len())?;
        self.continuum = Some(continuum);
        Ok(())
    }

    pub fn set_mask(&mut self, mask: Vec<bool>) -> Result<()> {
        check_len("mask", self.len(), mask.len())?;
        self.mask = mask;
        Ok(())
    }

    // -- normalization --

    /// Attach `continuum` and switch to the normalized view.
    pub fn normalize(&mut self, continuum: Vec<f64>) -> Result<()> {
        self.set_continuum(continuum)?;
        self.normalized = true;
        Ok(())
    }

    /// Return to the un-normalized view; the stored flux is untouched.
    pub fn unnormalize(&mut self) {
        if !self.normalized {
            debug!("unnormalize called on a spectrum that is not normalized");
        }
        self.normalized = false;
    }

    /// New spectrum whose stored flux is the normalized flux, with no
    /// continuum attached and `normalized == false`.
    pub fn normalized_spec(&self) -> Result<Spectrum> {
        let co = self.continuum.as_ref().ok_or(SpecError::MissingContinuum)?;
        let mut out = self.clone();
        out.flux = divide(&self.flux, co);
        out.sigma = self.sigma.as_ref().map(|s| divide(s, co));
        out.continuum = None;
        out.normalized = false;
        out.flux_unit = FluxUnit::Dimensionless;
        Ok(out)
    }

    // -- reference frames --

    /// Convert air wavelengths to vacuum.
    pub fn airtovac(&mut self) -> Result<()> {
        if self.meta.airvac == AirVac::Vacuum {
            warn!("wavelengths already in vacuum; not converting");
            return Err(SpecError::AlreadyInFrame("vacuum"));
        }
        self.map_angstrom(units::air_to_vac)?;
        self.meta.airvac = AirVac::Vacuum;
        Ok(())
    }

    /// Convert vacuum wavelengths to air.
    pub fn vactoair(&mut self) -> Result<()> {
        if self.meta.airvac == AirVac::Air {
            warn!("wavelengths already in air; not converting");
            return Err(SpecError::AlreadyInFrame("air"));
        }
        self.map_angstrom(units::vac_to_air)?;
        self.meta.airvac = AirVac::Air;
        Ok(())
    }

    /// Apply `f` in Angstrom. Fails without touching the spectrum if the
    /// mapped grid is no longer strictly increasing.
    fn map_angstrom(&mut self, f: fn(f64) -> f64) -> Result<()> {
        let to_aa = self.wave_unit.to_angstrom();
        let mapped: Vec<f64> = self.wave.iter().map(|w| f(w * to_aa) / to_aa).collect();
        check_monotonic(&mapped)?;
        self.wave = mapped;
        Ok(())
    }

    // -- pixel lookup --

    /// Index of the pixel nearest to `wave`, clipped to the array.
    pub fn nearest_pixel(&self, wave: f64) -> usize {
        let n = self.wave.len();
        let idx = self.wave.partition_point(|&w| w < wave);
        if idx == 0 {
            return 0;
        }
        if idx >= n {
            return n.saturating_sub(1);
        }
        if (wave - self.wave[idx - 1]) <= (self.wave[idx] - wave) {
            idx - 1
        } else {
            idx
        }
    }

    /// Inclusive pixel range `(pixmin, pixmax)` covering `[lo, hi]`.
    ///
    /// Bounds outside the spectrum are clipped to the first/last pixel.
    pub fn pix_range(&self, lo: f64, hi: f64) -> (usize, usize) {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        if let (Some(&first), Some(&last)) = (self.wave.first(), self.wave.last()) {
            if lo < first || hi > last {
                warn!(
                    "window [{lo:.3}, {hi:.3}] extends beyond coverage [{first:.3}, {last:.3}]; clipping"
                );
            }
        }
        (self.nearest_pixel(lo), self.nearest_pixel(hi))
    }

    /// Sorted, de-duplicated pixel indices covering one or more closed
    /// wavelength intervals.
    pub fn pix_minmax(&self, windows: &[(f64, f64)]) -> Vec<usize> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut covered = vec![false; self.len()];
        for &(lo, hi) in windows {
            let (pmin, pmax) = self.pix_range(lo, hi);
            covered[pmin..=pmax].iter_mut().for_each(|c| *c = true);
        }
        covered
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(|(i, _)| i)
            .collect()
    }

    /// Pixel indices inside a velocity window around a transition at
    /// redshift `z`.
    pub fn pix_minmax_velocity(&self, z: f64, wrest: f64, vlo: f64, vhi: f64) -> Vec<usize> {
        let wvobs = wrest * (1.0 + z);
        self.pix_minmax(&[(
            units::wavelength_from_velocity(vlo, wvobs),
            units::wavelength_from_velocity(vhi, wvobs),
        )])
    }

    /// Velocity (km/s) of every pixel relative to the observed wavelength
    /// `wv_obs` (same unit as the spectrum).
    pub fn relative_vel(&self, wv_obs: f64) -> Vec<f64> {
        self.wave
            .iter()
            .map(|&w| units::velocity_offset(w, wv_obs))
            .collect()
    }
}

pub(crate) fn divide(num: &[f64], den: &[f64]) -> Vec<f64> {
    num.iter().zip(den).map(|(n, d)| n / d).collect()
}
