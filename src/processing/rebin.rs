//! Flux-conserving resampling onto an arbitrary monotonic wavelength grid.
//!
//! The flux density is integrated into a cumulative profile over the input
//! pixel edges, that profile is evaluated at the output pixel edges, and the
//! differences are divided by the covered width. Integrated flux over any
//! sub-range covered by both grids is therefore preserved.

use log::{debug, warn};

use crate::data::model::Spectrum;
use crate::error::{Result, SpecError};

/// Pixel boundaries for a pixel-centre grid: midpoints between neighbours,
/// with the outer edges mirrored half a pixel beyond the end centres.
pub(crate) fn pixel_edges(centres: &[f64]) -> Vec<f64> {
    let n = centres.len();
    let mut edges = Vec::with_capacity(n + 1);
    edges.push(centres[0] - (centres[1] - centres[0]) / 2.0);
    edges.extend(centres.windows(2).map(|w| (w[0] + w[1]) / 2.0));
    edges.push(centres[n - 1] + (centres[n - 1] - centres[n - 2]) / 2.0);
    edges
}

/// Running integral of a per-pixel quantity, linear within each pixel.
struct Cumulative<'a> {
    edges: &'a [f64],
    values: Vec<f64>,
}

impl<'a> Cumulative<'a> {
    fn build(edges: &'a [f64], contributions: impl Iterator<Item = f64>) -> Self {
        let mut values = Vec::with_capacity(edges.len());
        let mut total = 0.0;
        values.push(total);
        for c in contributions {
            total += c;
            values.push(total);
        }
        Cumulative { edges, values }
    }

    fn at(&self, x: f64) -> f64 {
        let n = self.edges.len();
        if x <= self.edges[0] {
            return self.values[0];
        }
        if x >= self.edges[n - 1] {
            return self.values[n - 1];
        }
        let i = self.edges.partition_point(|&e| e <= x);
        let (x0, x1) = (self.edges[i - 1], self.edges[i]);
        let t = (x - x0) / (x1 - x0);
        self.values[i - 1] + t * (self.values[i] - self.values[i - 1])
    }

    /// Integral over each consecutive pair of `bounds`.
    fn differences(&self, bounds: &[f64]) -> Vec<f64> {
        let at: Vec<f64> = bounds.iter().map(|&b| self.at(b)).collect();
        at.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

fn check_grid(new_wave: &[f64]) -> Result<()> {
    if new_wave.len() < 2 {
        return Err(SpecError::InvalidParameter(
            "rebin grid needs at least 2 pixels".into(),
        ));
    }
    match new_wave.windows(2).position(|w| !(w[1] > w[0])) {
        Some(i) => Err(SpecError::NotMonotonic { index: i + 1 }),
        None => Ok(()),
    }
}

impl Spectrum {
    /// Resample onto `new_wave` (same unit as this spectrum), conserving
    /// integrated flux density.
    ///
    /// Non-finite or masked input pixels carry zero weight. Output pixels
    /// with no input coverage get NaN flux and are masked. With `do_sig`
    /// the variance is integrated the same way; if no uncertainty is set the
    /// result simply has none. An attached continuum is resampled alongside.
    ///
    /// Cost is O((N + M) log N) for N input and M output pixels.
    pub fn rebin(&self, new_wave: &[f64], do_sig: bool) -> Result<Spectrum> {
        check_grid(new_wave)?;
        if self.len() < 2 {
            return Err(SpecError::InvalidParameter(
                "cannot rebin a spectrum with fewer than 2 pixels".into(),
            ));
        }

        let good: Vec<bool> = self
            .flux
            .iter()
            .zip(&self.mask)
            .map(|(f, &m)| m && f.is_finite())
            .collect();
        let nbad = good.iter().filter(|&&g| !g).count();
        if nbad > 0 {
            warn!("ignoring {nbad} masked or non-finite flux pixels while rebinning");
        }

        let edges = pixel_edges(&self.wave);
        let widths: Vec<f64> = edges.windows(2).map(|w| w[1] - w[0]).collect();
        let new_edges = pixel_edges(new_wave);

        let weight = Cumulative::build(
            &edges,
            widths.iter().zip(&good).map(|(&dw, &g)| if g { dw } else { 0.0 }),
        );
        let covered = weight.differences(&new_edges);
        let valid: Vec<bool> = covered
            .iter()
            .zip(new_edges.windows(2))
            .map(|(&c, e)| c > 1e-12 * (e[1] - e[0]))
            .collect();

        let integrate = |values: &[f64], square: bool| -> Vec<f64> {
            let profile = Cumulative::build(
                &edges,
                values
                    .iter()
                    .zip(&widths)
                    .zip(&good)
                    .map(|((&v, &dw), &g)| match (g && v.is_finite(), square) {
                        (false, _) => 0.0,
                        (true, false) => v * dw,
                        (true, true) => v * v * dw * dw,
                    }),
            );
            let diffs = profile.differences(&new_edges);
            diffs
                .iter()
                .zip(&covered)
                .zip(&valid)
                .map(|((&d, &c), &ok)| match (ok, square) {
                    (false, _) => f64::NAN,
                    (true, false) => d / c,
                    (true, true) => (d / (c * c)).sqrt(),
                })
                .collect()
        };

        let flux = integrate(&self.flux, false);
        let sigma = match (&self.sigma, do_sig) {
            (Some(sig), true) => Some(integrate(sig, true)),
            (None, true) => {
                warn!("rebin asked to propagate uncertainty but none is set");
                None
            }
            _ => None,
        };
        let continuum = self.continuum.as_ref().map(|co| integrate(co, false));

        debug!(
            "rebinned {} -> {} pixels ({} without coverage)",
            self.len(),
            new_wave.len(),
            valid.iter().filter(|&&v| !v).count()
        );

        Ok(Spectrum {
            wave: new_wave.to_vec(),
            flux,
            sigma,
            continuum,
            mask: valid,
            normalized: self.normalized,
            wave_unit: self.wave_unit,
            flux_unit: self.flux_unit,
            meta: self.meta.clone(),
        })
    }
}
