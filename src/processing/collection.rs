//! Operations on collections of spectra: collating, shifting to a common
//! rest-frame grid, stacking, and splicing.

use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::data::batch::SpectrumBatch;
use crate::data::model::{Spectrum, SpectrumMeta};
use crate::error::{Result, SpecError};
use crate::units;

/// Bundle spectra into a batch, each keeping its own grid.
pub fn collate(spectra: Vec<Spectrum>) -> Result<SpectrumBatch> {
    let batch = SpectrumBatch::from_list(spectra)?;
    debug!("collated {} spectra, {} pixels", batch.nspec(), batch.totpix());
    Ok(batch)
}

/// Shift every spectrum to its rest frame and rebin all of them onto one
/// log-linear grid with constant velocity pixels of `dv_kms`.
///
/// The grid starts at the smallest rest wavelength in the batch and steps by
/// `ln(1 + dv/c)` up to the largest. Uncertainties are propagated.
pub fn rebin_to_rest(batch: &SpectrumBatch, redshifts: &[f64], dv_kms: f64) -> Result<SpectrumBatch> {
    if redshifts.len() != batch.nspec() {
        return Err(SpecError::RedshiftCount {
            redshifts: redshifts.len(),
            spectra: batch.nspec(),
        });
    }
    if !(dv_kms > 0.0) {
        return Err(SpecError::InvalidParameter(format!(
            "velocity pixel width must be positive, got {dv_kms}"
        )));
    }
    let unit = batch.spectra()[0].wave_unit();
    if let Some(sp) = batch.iter().find(|sp| sp.wave_unit() != unit) {
        return Err(SpecError::IncompatibleWavelengthUnits(unit, sp.wave_unit()));
    }

    let mut minwv = f64::INFINITY;
    let mut maxwv = f64::NEG_INFINITY;
    for (sp, z) in batch.iter().zip(redshifts) {
        if let (Some(lo), Some(hi)) = (sp.wvmin(), sp.wvmax()) {
            minwv = minwv.min(lo / (1.0 + z));
            maxwv = maxwv.max(hi / (1.0 + z));
        }
    }
    if !(maxwv > minwv) || minwv <= 0.0 {
        return Err(SpecError::InvalidParameter(
            "batch has no usable rest-frame coverage".into(),
        ));
    }

    let dlnlam = units::dlnlambda(dv_kms);
    let (lnmin, lnmax) = (minwv.ln(), maxwv.ln());
    let npix = ((lnmax - lnmin) / dlnlam).ceil() as usize;
    let grid: Vec<f64> = (0..npix)
        .map(|i| (lnmin + i as f64 * dlnlam).exp())
        .collect();
    info!(
        "rest-frame grid: {npix} pixels of {dv_kms} km/s from {:.3} to {:.3}",
        minwv, maxwv
    );

    let rebinned = batch
        .iter()
        .zip(redshifts)
        .map(|(sp, z)| {
            let mut rest = sp.clone();
            for w in &mut rest.wave {
                *w /= 1.0 + z;
            }
            rest.rebin(&grid, true)
        })
        .collect::<Result<Vec<_>>>()?;
    SpectrumBatch::from_list(rebinned)
}

/// How [`smash_spectra`] combines pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMethod {
    #[default]
    Average,
    Median,
}

impl FromStr for CombineMethod {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "average" | "mean" => Ok(CombineMethod::Average),
            "median" => Ok(CombineMethod::Median),
            other => Err(SpecError::InvalidParameter(format!(
                "unknown combine method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for CombineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombineMethod::Average => write!(f, "average"),
            CombineMethod::Median => write!(f, "median"),
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Combine a batch on a common grid into one spectrum.
///
/// Each output pixel combines the valid, finite input pixels at that
/// position; a pixel with none is NaN and masked. With every input carrying
/// an uncertainty the output uncertainty is `sqrt(sum sigma^2) / k` for the
/// average, scaled by `sqrt(pi/2)` for the median.
pub fn smash_spectra(batch: &SpectrumBatch, method: CombineMethod) -> Result<Spectrum> {
    if batch.nspec() < 2 {
        return Err(SpecError::EmptyBatch("only one spectrum; nothing to combine"));
    }
    batch.check_common_grid()?;
    let first = &batch.spectra()[0];
    let flux_unit = first.flux_unit();
    if let Some(sp) = batch.iter().find(|sp| sp.flux_unit() != flux_unit) {
        return Err(SpecError::IncompatibleFluxUnits(flux_unit, sp.flux_unit()));
    }

    let fluxes: Vec<_> = batch.iter().map(Spectrum::flux).collect();
    let sigmas: Option<Vec<_>> = batch.iter().map(Spectrum::sigma).collect();
    let npix = first.len();
    let sig_scale = match method {
        CombineMethod::Average => 1.0,
        CombineMethod::Median => std::f64::consts::FRAC_PI_2.sqrt(),
    };

    let mut flux = Vec::with_capacity(npix);
    let mut sigma = Vec::with_capacity(npix);
    let mut mask = Vec::with_capacity(npix);
    let mut values = Vec::with_capacity(batch.nspec());
    for i in 0..npix {
        values.clear();
        let mut var = 0.0;
        for (s, sp) in batch.iter().enumerate() {
            let f = fluxes[s][i];
            if sp.mask()[i] && f.is_finite() {
                values.push(f);
                if let Some(sig) = &sigmas {
                    var += sig[s][i] * sig[s][i];
                }
            }
        }
        let k = values.len();
        if k == 0 {
            flux.push(f64::NAN);
            sigma.push(f64::NAN);
            mask.push(false);
            continue;
        }
        flux.push(match method {
            CombineMethod::Average => values.iter().sum::<f64>() / k as f64,
            CombineMethod::Median => median(&mut values),
        });
        sigma.push(sig_scale * var.sqrt() / k as f64);
        mask.push(true);
    }
    debug!("combined {} spectra ({method}) over {npix} pixels", batch.nspec());

    let mut out = Spectrum::new(first.wavelength().to_vec(), flux, None)?
        .with_units(first.wave_unit(), flux_unit)
        .with_meta(SpectrumMeta {
            airvac: first.meta().airvac,
            ..SpectrumMeta::default()
        });
    if sigmas.is_some() {
        out.sigma = Some(sigma);
    }
    out.mask = mask;
    Ok(out)
}

/// Splice `b` onto `a`: all of `a`'s pixels are kept, and `b` contributes
/// only pixels outside `a`'s wavelength range. `scale` multiplies `b`'s flux,
/// uncertainty and continuum.
pub fn splice_two(a: &Spectrum, b: &Spectrum, scale: Option<f64>) -> Result<Spectrum> {
    if a.wave_unit() != b.wave_unit() {
        return Err(SpecError::IncompatibleWavelengthUnits(a.wave_unit(), b.wave_unit()));
    }
    if a.flux_unit() != b.flux_unit() {
        return Err(SpecError::IncompatibleFluxUnits(a.flux_unit(), b.flux_unit()));
    }
    // An empty `a` puts every pixel of `b` below it.
    let (a_lo, a_hi) = match (a.wavelength().first(), a.wavelength().last()) {
        (Some(&lo), Some(&hi)) => (lo, hi),
        _ => (f64::INFINITY, f64::INFINITY),
    };
    let scale = scale.unwrap_or(1.0);

    let below: Vec<usize> = (0..b.len()).filter(|&i| b.wavelength()[i] < a_lo).collect();
    let above: Vec<usize> = (0..b.len()).filter(|&i| b.wavelength()[i] > a_hi).collect();
    debug!(
        "splicing {} + {} pixels; {} of b overlap a",
        a.len(),
        b.len(),
        b.len() - below.len() - above.len()
    );

    let join = |va: &[f64], vb: &[f64], sb: f64| -> Vec<f64> {
        below
            .iter()
            .map(|&i| vb[i] * sb)
            .chain(va.iter().copied())
            .chain(above.iter().map(|&i| vb[i] * sb))
            .collect()
    };

    let sigma = match (a.sigma(), b.sigma()) {
        (Some(sa), Some(sb)) => Some(join(&sa[..], &sb[..], scale)),
        (None, None) => None,
        _ => {
            warn!("only one spectrum has an uncertainty; spliced result has none");
            None
        }
    };
    let continuum = match (a.continuum(), b.continuum(), a.is_normalized() || b.is_normalized()) {
        (Some(ca), Some(cb), false) => Some(join(ca, cb, scale)),
        _ => None,
    };
    let mask = below
        .iter()
        .map(|&i| b.mask()[i])
        .chain(a.mask().iter().copied())
        .chain(above.iter().map(|&i| b.mask()[i]))
        .collect();

    let mut out = Spectrum::new(
        join(a.wavelength(), b.wavelength(), 1.0),
        join(&a.flux()[..], &b.flux()[..], scale),
        sigma,
    )?
    .with_units(a.wave_unit(), a.flux_unit())
    .with_meta(if a.is_empty() { b.meta() } else { a.meta() }.clone());
    out.continuum = continuum;
    out.mask = mask;
    Ok(out)
}

impl SpectrumBatch {
    /// Splice all spectra together in batch order.
    pub fn stitch(&self) -> Result<Spectrum> {
        let mut spectra = self.iter();
        let mut out = match spectra.next() {
            Some(sp) => sp.clone(),
            None => return Err(SpecError::EmptyBatch("nothing to stitch")),
        };
        for sp in spectra {
            out = splice_two(&out, sp, None)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::FluxUnit;
    use approx::assert_relative_eq;

    fn ramp(start: f64, step: f64, n: usize, level: f64) -> Spectrum {
        let wave = (0..n).map(|i| start + i as f64 * step).collect();
        Spectrum::new(wave, vec![level; n], Some(vec![0.1; n])).unwrap()
    }

    #[test]
    fn test_collate_totpix() {
        let batch = collate(vec![ramp(3000.0, 1.0, 100, 1.0), ramp(8000.0, 2.0, 57, 1.0)]).unwrap();
        assert_eq!(batch.nspec(), 2);
        assert_eq!(batch.totpix(), 157);
    }

    #[test]
    fn test_rebin_to_rest_checks_redshift_count() {
        let batch = collate(vec![ramp(3000.0, 1.0, 100, 1.0), ramp(3000.0, 1.0, 100, 1.0)]).unwrap();
        assert_eq!(
            rebin_to_rest(&batch, &[2.0], 100.0),
            Err(SpecError::RedshiftCount {
                redshifts: 1,
                spectra: 2
            })
        );
    }

    #[test]
    fn test_rebin_to_rest_grid() {
        let batch = collate(vec![
            ramp(3000.0, 0.5, 4000, 1.0),
            ramp(3500.0, 0.5, 4000, 2.0),
        ])
        .unwrap();
        let rest = rebin_to_rest(&batch, &[2.0, 2.5], 50.0).unwrap();
        let grid = rest.spectra()[0].wavelength();
        assert_eq!(rest.spectra()[1].wavelength(), grid);
        assert_relative_eq!(grid[0], 1000.0, max_relative = 1e-12);
        assert_relative_eq!(grid[1] / grid[0], 1.0 + 50.0 / units::C_KMS, max_relative = 1e-12);
        let maxrest = (3000.0 + 3999.0 * 0.5) / 3.0;
        assert!(*grid.last().unwrap() <= maxrest);
        assert!(rest.check_common_grid().is_ok());
    }

    #[test]
    fn test_smash_average_and_median() {
        let batch = collate(vec![
            ramp(4000.0, 1.0, 50, 1.0),
            ramp(4000.0, 1.0, 50, 2.0),
            ramp(4000.0, 1.0, 50, 6.0),
        ])
        .unwrap();
        let avg = smash_spectra(&batch, CombineMethod::Average).unwrap();
        assert_eq!(avg.len(), 50);
        assert_relative_eq!(avg.raw_flux()[10], 3.0);
        assert_relative_eq!(avg.sigma().unwrap()[10], (0.03f64).sqrt() / 3.0, max_relative = 1e-12);

        let med = smash_spectra(&batch, CombineMethod::Median).unwrap();
        assert_eq!(med.raw_flux()[10], 2.0);
    }

    #[test]
    fn test_smash_guards() {
        let batch = collate(vec![ramp(4000.0, 1.0, 50, 1.0), ramp(4000.5, 1.0, 50, 1.0)]).unwrap();
        assert_eq!(
            smash_spectra(&batch, CombineMethod::Average),
            Err(SpecError::IncompatibleGrids { index: 1 })
        );
        let single = collate(vec![ramp(4000.0, 1.0, 50, 1.0)]).unwrap();
        assert!(smash_spectra(&single, CombineMethod::Average).is_err());
    }

    #[test]
    fn test_smash_skips_masked_pixels() {
        let mut a = ramp(4000.0, 1.0, 5, 1.0);
        a.set_mask(vec![true, false, true, true, true]).unwrap();
        let b = ramp(4000.0, 1.0, 5, 3.0);
        let out = smash_spectra(&collate(vec![a, b]).unwrap(), CombineMethod::Average).unwrap();
        assert_eq!(out.raw_flux()[0], 2.0);
        assert_eq!(out.raw_flux()[1], 3.0);
    }

    #[test]
    fn test_combine_method_parse() {
        assert_eq!("Median".parse::<CombineMethod>().unwrap(), CombineMethod::Median);
        assert!("mode".parse::<CombineMethod>().is_err());
    }

    #[test]
    fn test_splice_two_counts() {
        let a = ramp(5000.0, 1.0, 1001, 1.0);
        let b = ramp(5800.5, 1.0, 1201, 2.0);
        let out = splice_two(&a, &b, None).unwrap();
        assert_eq!(out.len(), 1001 + 1201 - 200);
        assert!(out.wavelength().windows(2).all(|w| w[1] > w[0]));
        assert_eq!(out.raw_flux()[1000], 1.0);
        assert_eq!(out.raw_flux()[1001], 2.0);
        assert!(out.sig_is_set());

        // b extending on both sides of a.
        let wide = ramp(4000.25, 0.5, 6000, 3.0);
        let out = splice_two(&a, &wide, Some(0.5)).unwrap();
        assert_eq!(out.wvmin(), Some(4000.25));
        assert_eq!(out.raw_flux()[0], 1.5);
        assert_eq!(out.len(), 1001 + 6000 - 2000);
    }

    #[test]
    fn test_splice_onto_empty_applies_scale() {
        let empty = Spectrum::new(Vec::new(), Vec::new(), Some(Vec::new())).unwrap();
        let b = ramp(6000.0, 1.0, 10, 4.0);
        let out = splice_two(&empty, &b, Some(0.25)).unwrap();
        assert_eq!(out.wavelength(), b.wavelength());
        assert!(out.raw_flux().iter().all(|&f| f == 1.0));
        assert!(out.sigma().unwrap().iter().all(|&s| s == 0.025));
        assert_eq!(splice_two(&empty, &b, None).unwrap(), b);
    }

    #[test]
    fn test_splice_unit_mismatch() {
        let a = ramp(5000.0, 1.0, 10, 1.0);
        let b = ramp(6000.0, 1.0, 10, 1.0).with_units(a.wave_unit(), FluxUnit::FLambda);
        assert!(matches!(
            splice_two(&a, &b, None),
            Err(SpecError::IncompatibleFluxUnits(..))
        ));
    }

    #[test]
    fn test_stitch_matches_repeated_splice() {
        let a = ramp(5000.0, 1.0, 100, 1.0);
        let b = ramp(5050.5, 1.0, 100, 2.0);
        let c = ramp(5120.5, 1.0, 100, 3.0);
        let expected = splice_two(&splice_two(&a, &b, None).unwrap(), &c, None).unwrap();
        let batch = collate(vec![a, b, c]).unwrap();
        assert_eq!(batch.stitch().unwrap(), expected);
    }
}
