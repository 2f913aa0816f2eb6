use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::data::model::Spectrum;
use crate::error::{Result, SpecError};

impl Spectrum {
    /// New spectrum with Gaussian noise added to the flux.
    ///
    /// The noise amplitude per pixel is the uncertainty array, or `1 / s2n`
    /// everywhere when `s2n` is given (which also becomes the new
    /// uncertainty). The same `seed` always gives the same realisation.
    pub fn add_noise(&self, seed: u64, s2n: Option<f64>) -> Result<Spectrum> {
        let sigma: Vec<f64> = match s2n {
            Some(s) if s > 0.0 => vec![1.0 / s; self.len()],
            Some(s) => {
                return Err(SpecError::InvalidParameter(format!(
                    "signal-to-noise must be positive, got {s}"
                )))
            }
            None => self
                .sigma
                .clone()
                .ok_or(SpecError::UndefinedUncertainty)?,
        };

        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = self.clone();
        for (f, s) in out.flux.iter_mut().zip(&sigma) {
            let z: f64 = StandardNormal.sample(&mut rng);
            *f += z * s;
        }
        out.sigma = Some(sigma);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn flat(n: usize, sigma: Option<f64>) -> Spectrum {
        let wave = (0..n).map(|i| 5000.0 + i as f64).collect();
        Spectrum::new(wave, vec![1.0; n], sigma.map(|s| vec![s; n])).unwrap()
    }

    #[test]
    fn test_add_noise_is_seeded() {
        let spec = flat(5000, Some(0.1));
        let a = spec.add_noise(12, None).unwrap();
        let b = spec.add_noise(12, None).unwrap();
        let c = spec.add_noise(13, None).unwrap();
        assert_eq!(a.raw_flux(), b.raw_flux());
        assert_ne!(a.raw_flux(), c.raw_flux());
        assert_eq!(spec.raw_flux()[0], 1.0);

        let n = a.len() as f64;
        let mean = a.raw_flux().iter().sum::<f64>() / n;
        let std = (a.raw_flux().iter().map(|f| (f - mean).powi(2)).sum::<f64>() / n).sqrt();
        assert_abs_diff_eq!(mean, 1.0, epsilon = 0.01);
        assert_abs_diff_eq!(std, 0.1, epsilon = 0.01);
    }

    #[test]
    fn test_add_noise_with_s2n() {
        let spec = flat(100, None);
        assert_eq!(spec.add_noise(19, None), Err(SpecError::UndefinedUncertainty));
        let noisy = spec.add_noise(19, Some(10.0)).unwrap();
        assert_eq!(noisy.sigma().unwrap()[0], 0.1);
        assert!(spec.add_noise(19, Some(0.0)).is_err());
    }
}
