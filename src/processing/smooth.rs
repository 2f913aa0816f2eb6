//! Box, Gaussian and inverse-variance smoothing.
//!
//! All kernels are truncated at the array ends and renormalized over the
//! weights that remain, so there is no wrap-around. Masked or non-finite
//! pixels get zero weight.

use log::debug;

use crate::data::model::Spectrum;
use crate::error::{Result, SpecError};

/// FWHM / sigma for a Gaussian.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3;

/// Symmetric kernel: weight at offset `k` is `weights[k + half]`.
struct Kernel {
    half: usize,
    weights: Vec<f64>,
}

impl Kernel {
    /// Box of `width` pixels, reaching at most `max_half` pixels to either
    /// side. Even widths are centred by giving the two end taps half weight.
    fn boxcar(width: usize, max_half: usize) -> Self {
        let half = (width / 2).min(max_half);
        let mut weights = vec![1.0; 2 * half + 1];
        if width % 2 == 0 && half == width / 2 {
            weights[0] = 0.5;
            weights[2 * half] = 0.5;
        }
        Kernel { half, weights }
    }

    fn gaussian(sigma_pix: f64, max_half: usize) -> Self {
        let half = ((4.0 * sigma_pix).ceil().min(max_half as f64) as usize).max(1);
        let weights = (0..=2 * half)
            .map(|j| {
                let k = j as f64 - half as f64;
                (-0.5 * (k / sigma_pix).powi(2)).exp()
            })
            .collect();
        Kernel { half, weights }
    }

    /// Convolve `values`, and optionally propagate `sigma`, skipping pixels
    /// where `good` is false. Pixels with no usable neighbours keep their
    /// input value.
    fn apply(
        &self,
        values: &[f64],
        sigma: Option<&[f64]>,
        good: &[bool],
    ) -> (Vec<f64>, Option<Vec<f64>>) {
        let n = values.len();
        let mut out = Vec::with_capacity(n);
        let mut out_sig = sigma.map(|_| Vec::with_capacity(n));

        for i in 0..n {
            let lo = i.saturating_sub(self.half);
            let hi = i.saturating_add(self.half).min(n - 1);
            let mut wsum = 0.0;
            let mut acc = 0.0;
            let mut var = 0.0;
            for j in lo..=hi {
                if !good[j] {
                    continue;
                }
                let w = self.weights[j + self.half - i];
                wsum += w;
                acc += w * values[j];
                if let Some(sig) = sigma {
                    var += w * w * sig[j] * sig[j];
                }
            }
            if wsum > 0.0 {
                out.push(acc / wsum);
                if let Some(os) = out_sig.as_mut() {
                    os.push(var.sqrt() / wsum);
                }
            } else {
                out.push(values[i]);
                if let (Some(os), Some(sig)) = (out_sig.as_mut(), sigma) {
                    os.push(sig[i]);
                }
            }
        }
        (out, out_sig)
    }
}

impl Spectrum {
    /// Widest reach a kernel can use on this spectrum.
    fn max_half_width(&self) -> usize {
        self.len().saturating_sub(1)
    }

    fn good_pixels(&self) -> Vec<bool> {
        self.flux
            .iter()
            .zip(&self.mask)
            .map(|(f, &m)| m && f.is_finite())
            .collect()
    }

    /// Boxcar smoothing over `nbox` pixels.
    ///
    /// With `preserve` the wavelength grid is kept and each pixel becomes the
    /// running mean of its neighbours. Without it, every `nbox` consecutive
    /// pixels are averaged into one (trailing pixels that do not fill a block
    /// are dropped) and the uncertainty is divided by `sqrt(nbox)`.
    pub fn box_smooth(&self, nbox: usize, preserve: bool) -> Result<Spectrum> {
        if nbox == 0 {
            return Err(SpecError::InvalidParameter("box width must be >= 1".into()));
        }
        if preserve {
            let good = self.good_pixels();
            let kernel = Kernel::boxcar(nbox, self.max_half_width());
            let (flux, sigma) = kernel.apply(&self.flux, self.sigma.as_deref(), &good);
            let mut out = self.clone();
            out.flux = flux;
            out.sigma = sigma;
            return Ok(out);
        }

        let new_npix = self.len() / nbox;
        if new_npix < 2 {
            return Err(SpecError::InvalidParameter(format!(
                "box width {nbox} leaves fewer than 2 pixels from {}",
                self.len()
            )));
        }
        let block_mean = |values: &[f64]| -> Vec<f64> {
            values[..new_npix * nbox]
                .chunks_exact(nbox)
                .map(|c| c.iter().sum::<f64>() / nbox as f64)
                .collect()
        };
        let norm = (nbox as f64).sqrt();
        debug!("box smoothing {} pixels into {new_npix}", self.len());

        Ok(Spectrum {
            wave: block_mean(&self.wave),
            flux: block_mean(&self.flux),
            sigma: self
                .sigma
                .as_ref()
                .map(|s| block_mean(s).into_iter().map(|v| v / norm).collect()),
            continuum: self.continuum.as_ref().map(|c| block_mean(c)),
            mask: self.mask[..new_npix * nbox]
                .chunks_exact(nbox)
                .map(|c| c.iter().all(|&m| m))
                .collect(),
            normalized: self.normalized,
            wave_unit: self.wave_unit,
            flux_unit: self.flux_unit,
            meta: self.meta.clone(),
        })
    }

    /// Convolve with a Gaussian of full width at half maximum `fwhm_pix`
    /// pixels. The grid is unchanged.
    pub fn gauss_smooth(&self, fwhm_pix: f64) -> Result<Spectrum> {
        if !(fwhm_pix.is_finite() && fwhm_pix > 0.0) {
            return Err(SpecError::InvalidParameter(format!(
                "Gaussian FWHM must be positive, got {fwhm_pix}"
            )));
        }
        let kernel = Kernel::gaussian(fwhm_pix / FWHM_PER_SIGMA, self.max_half_width());
        let good = self.good_pixels();
        let (flux, sigma) = kernel.apply(&self.flux, self.sigma.as_deref(), &good);
        let mut out = self.clone();
        out.flux = flux;
        out.sigma = sigma;
        Ok(out)
    }

    /// As [`Spectrum::gauss_smooth`] with the FWHM in wavelength units,
    /// converted through the median pixel width.
    pub fn gauss_smooth_wavelength(&self, fwhm: f64) -> Result<Spectrum> {
        if self.len() < 2 {
            return Err(SpecError::InvalidParameter(
                "need at least 2 pixels to estimate the pixel width".into(),
            ));
        }
        let mut dw: Vec<f64> = self.wave.windows(2).map(|w| w[1] - w[0]).collect();
        dw.sort_by(f64::total_cmp);
        let median = dw[dw.len() / 2];
        self.gauss_smooth(fwhm / median)
    }

    /// Inverse-variance weighted running mean over `[i - half_width,
    /// i + half_width]`. Pixels with zero, negative or undefined uncertainty
    /// are skipped; the new uncertainty is `1 / sqrt(sum(ivar))`.
    pub fn ivar_smooth(&self, half_width: usize) -> Result<Spectrum> {
        let sig = self.sigma.as_ref().ok_or(SpecError::UndefinedUncertainty)?;
        let n = self.len();
        let ivar: Vec<f64> = sig
            .iter()
            .zip(&self.flux)
            .zip(&self.mask)
            .map(|((&s, f), &m)| {
                if m && f.is_finite() && s.is_finite() && s > 0.0 {
                    1.0 / (s * s)
                } else {
                    0.0
                }
            })
            .collect();

        let mut flux = Vec::with_capacity(n);
        let mut sigma = Vec::with_capacity(n);
        for i in 0..n {
            let lo = i.saturating_sub(half_width);
            let hi = i.saturating_add(half_width).min(n - 1);
            let (wsum, acc) = (lo..=hi)
                .filter(|&j| ivar[j] > 0.0)
                .fold((0.0, 0.0), |(w, a), j| (w + ivar[j], a + ivar[j] * self.flux[j]));
            if wsum > 0.0 {
                flux.push(acc / wsum);
                sigma.push(1.0 / wsum.sqrt());
            } else {
                flux.push(self.flux[i]);
                sigma.push(sig[i]);
            }
        }

        let mut out = self.clone();
        out.flux = flux;
        out.sigma = Some(sigma);
        Ok(out)
    }
}
