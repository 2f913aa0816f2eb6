//! Line measurements over a window of a spectrum with a local continuum:
//! equivalent width, apparent optical depth column density, and simple
//! window statistics.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::data::model::Spectrum;
use crate::error::{Result, SpecError};
use crate::processing::rebin::pixel_edges;
use crate::units::{self, WavelengthUnit};

use super::absline::LimitFlag;
use super::linelist::Transition;

/// `log10(m_e c / (pi e^2))` for N in cm^-2, wavelength in Angstrom and
/// velocity in km/s.
const LOG_AODM_CONSTANT: f64 = 14.5761;

/// Normalized flux below which a pixel is saturated.
const SATURATION_FLOOR: f64 = 0.05;

/// A measurement is an upper limit below this many sigma.
const DETECTION_NSIG: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwMeasurement {
    /// Rest-frame equivalent width, in the spectrum's wavelength unit.
    pub ew: f64,
    /// `None` when the spectrum carries no uncertainty.
    pub sig_ew: Option<f64>,
    /// Pixels that contributed.
    pub npix: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AodmMeasurement {
    /// Column density in cm^-2.
    pub n: f64,
    pub sig_n: Option<f64>,
    pub log_n: f64,
    pub sig_log_n: Option<f64>,
    /// Indices of saturated pixels whose optical depth was clipped.
    pub saturated: Vec<usize>,
    pub limit: LimitFlag,
    pub npix: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: f64,
    pub median: f64,
    /// Standard deviation of flux about the continuum.
    pub stddev: f64,
    pub s2n: f64,
    pub npix: usize,
}

fn check_continuum(spec: &Spectrum, continuum: &[f64]) -> Result<()> {
    if continuum.len() != spec.len() {
        return Err(SpecError::ShapeMismatch {
            name: "continuum",
            expected: spec.len(),
            got: continuum.len(),
        });
    }
    Ok(())
}

/// Pixels of `pix` that are unmasked with finite flux and positive continuum.
fn usable(spec: &Spectrum, flux: &[f64], continuum: &[f64], pix: Vec<usize>) -> Vec<usize> {
    let total = pix.len();
    let good: Vec<usize> = pix
        .into_iter()
        .filter(|&i| spec.mask()[i] && flux[i].is_finite() && continuum[i] > 0.0)
        .collect();
    if good.len() < total {
        warn!("skipping {} unusable pixels in the window", total - good.len());
    }
    good
}

/// Boxcar equivalent width between `wvlim` (observed frame, spectrum units)
/// for a system at redshift `z`:
/// `EW = sum (1 - flux/continuum) * dlambda / (1 + z)`.
pub fn equivalent_width(
    spec: &Spectrum,
    continuum: &[f64],
    wvlim: (f64, f64),
    z: f64,
) -> Result<EwMeasurement> {
    check_continuum(spec, continuum)?;
    if spec.len() < 2 {
        return Err(SpecError::InvalidParameter(
            "need at least 2 pixels for an equivalent width".into(),
        ));
    }
    let flux = spec.flux();
    let sigma = spec.sigma();
    let pix = usable(spec, &flux, continuum, spec.pix_minmax(&[wvlim]));

    let edges = pixel_edges(spec.wavelength());
    let mut ew = 0.0;
    let mut var = 0.0;
    for &i in &pix {
        let dw = edges[i + 1] - edges[i];
        ew += (1.0 - flux[i] / continuum[i]) * dw;
        if let Some(sig) = &sigma {
            var += (dw * sig[i] / continuum[i]).powi(2);
        }
    }
    let zfac = 1.0 + z;
    debug!("EW over {} pixels: {ew:.4} (observed)", pix.len());
    Ok(EwMeasurement {
        ew: ew / zfac,
        sig_ew: sigma.map(|_| var.sqrt() / zfac),
        npix: pix.len(),
    })
}

/// Apparent optical depth column density for `transition` at redshift `z`,
/// integrated over the velocity window `vlim` (km/s).
///
/// A pixel is saturated when its normalized flux is below 0.05 or below a
/// fifth of its normalized uncertainty. Its optical depth is clipped to
/// `ln(1 / max(0.05, sigma/5))`, its index is reported, and the result
/// becomes a lower limit. A column below three sigma (or non-positive) is
/// reported as an upper limit at three sigma.
pub fn aodm(
    spec: &Spectrum,
    continuum: &[f64],
    vlim: (f64, f64),
    z: f64,
    transition: &Transition,
) -> Result<AodmMeasurement> {
    check_continuum(spec, continuum)?;
    if !(transition.oscillator_strength > 0.0 && transition.wrest > 0.0) {
        return Err(SpecError::InvalidParameter(format!(
            "transition '{}' lacks atomic data",
            transition.name
        )));
    }
    if spec.len() < 2 {
        return Err(SpecError::InvalidParameter(
            "need at least 2 pixels for a column density".into(),
        ));
    }

    let wrest = WavelengthUnit::Angstrom.convert(transition.wrest, spec.wave_unit());
    let wvobs = wrest * (1.0 + z);
    let flux = spec.flux();
    let sigma = spec.sigma();
    let pix = usable(
        spec,
        &flux,
        continuum,
        spec.pix_minmax_velocity(z, wrest, vlim.0, vlim.1),
    );

    let edges = pixel_edges(spec.wavelength());
    let cst = 10f64.powf(LOG_AODM_CONSTANT) / (transition.oscillator_strength * transition.wrest);

    let mut n = 0.0;
    let mut var = 0.0;
    let mut saturated = Vec::new();
    for &i in &pix {
        let dv = units::velocity_offset(edges[i + 1], wvobs) - units::velocity_offset(edges[i], wvobs);
        let fx = flux[i] / continuum[i];
        let sig = sigma.as_ref().map(|s| s[i] / continuum[i]);
        let floor = sig.map_or(SATURATION_FLOOR, |s| SATURATION_FLOOR.max(s / 5.0));
        let fx_eff = if fx < SATURATION_FLOOR || sig.is_some_and(|s| fx <= s / 5.0) {
            saturated.push(i);
            floor
        } else {
            fx
        };
        n += cst * (1.0 / fx_eff).ln() * dv;
        if let Some(s) = sig {
            var += (dv * cst * s / fx_eff).powi(2);
        }
    }
    if !saturated.is_empty() {
        warn!(
            "{}: {} saturated pixels; column density is a lower limit",
            transition.name,
            saturated.len()
        );
    }

    let sig_n = sigma.as_ref().map(|_| var.sqrt());
    let detected = n > 0.0 && sig_n.map_or(true, |s| n >= DETECTION_NSIG * s);
    let (limit, log_n) = if !saturated.is_empty() {
        (LimitFlag::LowerLimit, n.log10())
    } else if detected {
        (LimitFlag::Normal, n.log10())
    } else {
        // An upper limit is set by the noise, so it needs a positive sigma_N.
        match sig_n.filter(|&s| s > 0.0) {
            Some(s) => (LimitFlag::UpperLimit, (DETECTION_NSIG * s).log10()),
            None => {
                warn!("{}: no detection and no uncertainty to bound it", transition.name);
                return Err(SpecError::UndefinedUncertainty);
            }
        }
    };
    let sig_log_n = sig_n
        .filter(|_| n != 0.0)
        .map(|s| s / (n.abs() * std::f64::consts::LN_10));
    debug!("AODM {}: N = {n:.4e} over {} pixels", transition.name, pix.len());

    Ok(AodmMeasurement {
        n,
        sig_n,
        log_n,
        sig_log_n,
        saturated,
        limit,
        npix: pix.len(),
    })
}

/// Mean and median flux in `wvlim`, the scatter about `continuum`, and the
/// resulting signal-to-noise `median / stddev`.
pub fn window_stats(spec: &Spectrum, continuum: &[f64], wvlim: (f64, f64)) -> Result<WindowStats> {
    check_continuum(spec, continuum)?;
    let flux = spec.flux();
    let pix: Vec<usize> = spec
        .pix_minmax(&[wvlim])
        .into_iter()
        .filter(|&i| spec.mask()[i] && flux[i].is_finite())
        .collect();
    if pix.is_empty() {
        return Err(SpecError::InvalidParameter("window contains no valid pixels".into()));
    }

    let k = pix.len() as f64;
    let mean = pix.iter().map(|&i| flux[i]).sum::<f64>() / k;
    let mut values: Vec<f64> = pix.iter().map(|&i| flux[i]).collect();
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    };
    let resid: Vec<f64> = pix.iter().map(|&i| flux[i] - continuum[i]).collect();
    let rmean = resid.iter().sum::<f64>() / k;
    let stddev = (resid.iter().map(|r| (r - rmean).powi(2)).sum::<f64>() / k).sqrt();

    Ok(WindowStats {
        mean,
        median,
        stddev,
        s2n: median / stddev,
        npix: pix.len(),
    })
}
