use crate::error::{Result, SpecError};

use super::model::Spectrum;

// ---------------------------------------------------------------------------
// SpectrumBatch – an ordered collection of spectra
// ---------------------------------------------------------------------------

/// Ordered collection of spectra. Each member keeps its own wavelength grid;
/// operations that need a shared grid check for it explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumBatch {
    spectra: Vec<Spectrum>,
    /// Index of the currently selected spectrum.
    select: usize,
}

impl SpectrumBatch {
    pub fn from_list(spectra: Vec<Spectrum>) -> Result<Self> {
        if spectra.is_empty() {
            return Err(SpecError::EmptyBatch("cannot build a batch from zero spectra"));
        }
        Ok(SpectrumBatch { spectra, select: 0 })
    }

    /// Number of spectra.
    pub fn nspec(&self) -> usize {
        self.spectra.len()
    }

    /// Number of distinct valid pixel wavelengths across the batch.
    ///
    /// Spectra on independent grids contribute all their valid pixels, so
    /// this is the sum of their `npix`. Pixels at the same wavelength are
    /// counted once: a rest-frame batch sharing one grid counts that grid
    /// once, and so do two exposures taken on an identical instrument grid.
    /// Use `spectra().iter().map(Spectrum::npix).sum()` for the per-spectrum
    /// total.
    pub fn totpix(&self) -> usize {
        let mut waves: Vec<f64> = self
            .spectra
            .iter()
            .flat_map(|sp| {
                let to_aa = sp.wave_unit().to_angstrom();
                sp.wavelength()
                    .iter()
                    .zip(sp.mask())
                    .filter(|(_, &m)| m)
                    .map(move |(w, _)| w * to_aa)
            })
            .collect();
        waves.sort_by(f64::total_cmp);
        waves.dedup();
        waves.len()
    }

    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    pub fn get(&self, idx: usize) -> Option<&Spectrum> {
        self.spectra.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Spectrum> {
        self.spectra.iter()
    }

    pub fn into_spectra(self) -> Vec<Spectrum> {
        self.spectra
    }

    pub fn select(&self) -> usize {
        self.select
    }

    pub fn set_select(&mut self, idx: usize) -> Result<()> {
        if idx >= self.spectra.len() {
            return Err(SpecError::InvalidParameter(format!(
                "select index {idx} out of range for {} spectra",
                self.spectra.len()
            )));
        }
        self.select = idx;
        Ok(())
    }

    pub fn selected(&self) -> &Spectrum {
        &self.spectra[self.select]
    }

    pub fn selected_mut(&mut self) -> &mut Spectrum {
        &mut self.spectra[self.select]
    }

    /// Smallest valid wavelength across the batch.
    pub fn wvmin(&self) -> Option<f64> {
        self.spectra
            .iter()
            .filter_map(Spectrum::wvmin)
            .min_by(f64::total_cmp)
    }

    /// Largest valid wavelength across the batch.
    pub fn wvmax(&self) -> Option<f64> {
        self.spectra
            .iter()
            .filter_map(Spectrum::wvmax)
            .max_by(f64::total_cmp)
    }

    /// Fails with [`SpecError::IncompatibleGrids`] naming the first spectrum
    /// whose wavelength array (or unit) differs from the first one.
    pub fn check_common_grid(&self) -> Result<()> {
        let first = &self.spectra[0];
        for (i, sp) in self.spectra.iter().enumerate().skip(1) {
            if sp.wave_unit() != first.wave_unit() || sp.wavelength() != first.wavelength() {
                return Err(SpecError::IncompatibleGrids { index: i });
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a SpectrumBatch {
    type Item = &'a Spectrum;
    type IntoIter = std::slice::Iter<'a, Spectrum>;

    fn into_iter(self) -> Self::IntoIter {
        self.spectra.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(start: f64, n: usize) -> Spectrum {
        let wave = (0..n).map(|i| start + i as f64).collect();
        Spectrum::new(wave, vec![1.0; n], None).unwrap()
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(
            SpectrumBatch::from_list(Vec::new()),
            Err(SpecError::EmptyBatch(_))
        ));
    }

    #[test]
    fn test_totpix_counts_valid_pixels() {
        let mut a = flat(1000.0, 10);
        let mut mask = vec![true; 10];
        mask[0] = false;
        mask[9] = false;
        a.set_mask(mask).unwrap();
        let batch = SpectrumBatch::from_list(vec![a, flat(2000.0, 5)]).unwrap();
        assert_eq!(batch.nspec(), 2);
        assert_eq!(batch.totpix(), 13);
        assert_eq!(batch.wvmin(), Some(1001.0));

        let shared = SpectrumBatch::from_list(vec![flat(1000.0, 10), flat(1000.0, 10)]).unwrap();
        // Same grid twice, as for two exposures on one instrument.
        assert_eq!(shared.totpix(), 10);
        assert_eq!(shared.spectra().iter().map(Spectrum::npix).sum::<usize>(), 20);
        assert_eq!(batch.wvmax(), Some(2004.0));
    }

    #[test]
    fn test_common_grid() {
        let batch = SpectrumBatch::from_list(vec![flat(1000.0, 10), flat(1000.0, 10)]).unwrap();
        assert!(batch.check_common_grid().is_ok());

        let batch = SpectrumBatch::from_list(vec![flat(1000.0, 10), flat(1000.5, 10)]).unwrap();
        assert_eq!(
            batch.check_common_grid(),
            Err(SpecError::IncompatibleGrids { index: 1 })
        );
    }

    #[test]
    fn test_select() {
        let mut batch = SpectrumBatch::from_list(vec![flat(1000.0, 10), flat(3000.0, 4)]).unwrap();
        batch.set_select(1).unwrap();
        assert_eq!(batch.selected().len(), 4);
        assert!(batch.set_select(2).is_err());
    }
}
