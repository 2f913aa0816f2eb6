//! Continuum models: a smooth curve through sparse control points, and the
//! straight-line local continuum used by window measurements.

use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::data::model::Spectrum;
use crate::error::{Result, SpecError};

// ---------------------------------------------------------------------------
// Natural cubic spline through control points
// ---------------------------------------------------------------------------

/// Second derivatives of the natural cubic spline through `(x, y)`.
fn spline_second_derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }
    // Thomas algorithm on the interior rows; m[0] = m[n-1] = 0.
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let mut diag = vec![0.0; n];
    let mut rhs = vec![0.0; n];
    for i in 1..n - 1 {
        diag[i] = 2.0 * (h[i - 1] + h[i]);
        rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
    }
    for i in 2..n - 1 {
        let w = h[i - 1] / diag[i - 1];
        diag[i] -= w * h[i - 1];
        rhs[i] -= w * rhs[i - 1];
    }
    for i in (1..n - 1).rev() {
        m[i] = (rhs[i] - h[i] * m[i + 1]) / diag[i];
    }
    m
}

/// Interpolate a continuum through control points `(x, y)` onto `wave`.
///
/// Uses a natural cubic spline for three or more points, a straight line for
/// two and a constant for one. Outside the outermost control points the
/// boundary value is held constant.
pub fn interp_continuum(x: &[f64], y: &[f64], wave: &[f64]) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(SpecError::ShapeMismatch {
            name: "continuum control y",
            expected: x.len(),
            got: y.len(),
        });
    }
    if x.is_empty() {
        return Err(SpecError::InvalidParameter("no continuum control points".into()));
    }
    if let Some(i) = x.windows(2).position(|w| !(w[1] > w[0])) {
        return Err(SpecError::NotMonotonic { index: i + 1 });
    }

    let n = x.len();
    let m = spline_second_derivatives(x, y);
    let eval = |w: f64| -> f64 {
        if w <= x[0] {
            return y[0];
        }
        if w >= x[n - 1] {
            return y[n - 1];
        }
        let i = x.partition_point(|&xi| xi <= w) - 1;
        let h = x[i + 1] - x[i];
        let a = (x[i + 1] - w) / h;
        let b = (w - x[i]) / h;
        a * y[i] + b * y[i + 1] + ((a * a * a - a) * m[i] + (b * b * b - b) * m[i + 1]) * h * h / 6.0
    };
    Ok(wave.iter().map(|&w| eval(w)).collect())
}

fn split_points(points: &[(f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    points.iter().copied().unzip()
}

impl Spectrum {
    /// Store continuum control points in the metadata and rebuild the
    /// continuum from them. Points are sorted by wavelength.
    pub fn set_continuum_points(&mut self, mut points: Vec<(f64, f64)>) -> Result<()> {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (x, y) = split_points(&points);
        let co = interp_continuum(&x, &y, &self.wave)?;
        self.set_continuum(co)?;
        debug!("continuum rebuilt from {} control points", points.len());
        self.meta.contpoints = points;
        Ok(())
    }

    /// Multiply the continuum by `1 + noise`, with per-pixel noise drawn from
    /// a normal distribution of standard deviation `rel_var`.
    pub fn perturb_continuum(&mut self, rel_var: f64, seed: u64) -> Result<()> {
        let normal = Normal::new(0.0, rel_var).map_err(|e| {
            SpecError::InvalidParameter(format!("continuum perturbation {rel_var}: {e}"))
        })?;
        let co = self.continuum.as_mut().ok_or(SpecError::MissingContinuum)?;
        let mut rng = StdRng::seed_from_u64(seed);
        for c in co.iter_mut() {
            *c *= 1.0 + normal.sample(&mut rng);
        }
        Ok(())
    }

    /// Rebuild the continuum from the stored control points, discarding any
    /// perturbation.
    pub fn reset_continuum(&mut self) -> Result<()> {
        if self.meta.contpoints.is_empty() {
            return Err(SpecError::MissingContinuum);
        }
        let (x, y) = split_points(&self.meta.contpoints);
        let co = interp_continuum(&x, &y, &self.wave)?;
        self.set_continuum(co)
    }
}

// ---------------------------------------------------------------------------
// Local linear continuum
// ---------------------------------------------------------------------------

/// Straight-line continuum through two points, as picked around a line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalContinuum {
    pub slope: f64,
    pub intercept: f64,
}

impl LocalContinuum {
    pub fn through(p1: (f64, f64), p2: (f64, f64)) -> Result<Self> {
        let dx = p2.0 - p1.0;
        if dx == 0.0 || !dx.is_finite() {
            return Err(SpecError::InvalidParameter(
                "local continuum needs two distinct wavelengths".into(),
            ));
        }
        let slope = (p2.1 - p1.1) / dx;
        Ok(LocalContinuum {
            slope,
            intercept: p1.1 - slope * p1.0,
        })
    }

    pub fn at(&self, wave: f64) -> f64 {
        self.intercept + self.slope * wave
    }

    pub fn evaluate(&self, wave: &[f64]) -> Vec<f64> {
        wave.iter().map(|&w| self.at(w)).collect()
    }
}
