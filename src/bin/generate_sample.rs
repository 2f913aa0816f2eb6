//! Writes `sample_spectra.parquet`: synthetic quasar spectra with absorption
//! systems, noise and a known continuum, for trying out `spectool`.

use std::path::Path;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use spectral_engine::analysis::linelist::{LineList, TransitionTable};
use spectral_engine::data::loader::save_file;
use spectral_engine::units::{self, FluxUnit, WavelengthUnit};
use spectral_engine::{MetadataValue, Spectrum, SpectrumMeta};

/// Doppler parameter of every synthetic component (km/s).
const B_KMS: f64 = 15.0;

/// Gaussian optical-depth profile of one line, peak `tau0`, in velocity space.
fn optical_depth(wave: f64, wvobs: f64, tau0: f64) -> f64 {
    let v = units::velocity_offset(wave, wvobs);
    tau0 * (-(v / B_KMS).powi(2)).exp()
}

/// Power-law quasar continuum with a broad Lyman-alpha emission line.
fn continuum(wave: f64, zem: f64) -> f64 {
    let lya = 1215.6701 * (1.0 + zem);
    let power_law = (wave / 5000.0).powf(-1.5);
    power_law * (1.0 + 2.0 * (-((wave - lya) / 40.0).powi(2)).exp())
}

fn generate_spectrum(
    llist: &TransitionTable,
    zem: f64,
    systems: &[(f64, f64)],
    s2n: f64,
    seed: u64,
) -> Result<Spectrum> {
    let dlnlam = units::dlnlambda(2.5);
    let (wvmin, wvmax) = (3200.0_f64, 9200.0_f64);
    let npix = ((wvmax / wvmin).ln() / dlnlam) as usize;
    let wave: Vec<f64> = (0..npix).map(|i| wvmin * (i as f64 * dlnlam).exp()).collect();

    let co: Vec<f64> = wave.iter().map(|&w| continuum(w, zem)).collect();
    let flux: Vec<f64> = wave
        .iter()
        .zip(&co)
        .map(|(&w, &c)| {
            let tau: f64 = systems
                .iter()
                .flat_map(|&(z, strength)| {
                    llist.transitions().iter().map(move |t| {
                        optical_depth(w, t.wrest * (1.0 + z), strength * t.oscillator_strength)
                    })
                })
                .sum();
            c * (-tau).exp()
        })
        .collect();
    let sigma: Vec<f64> = co.iter().map(|c| c / s2n).collect();

    let mut meta = SpectrumMeta::default();
    meta.extra.insert("zem".into(), MetadataValue::Float(zem));
    meta.extra.insert("s2n".into(), MetadataValue::Float(s2n));
    meta.extra.insert("nsys".into(), MetadataValue::Integer(systems.len() as i64));

    let clean = Spectrum::new(wave, flux, Some(sigma))?
        .with_units(WavelengthUnit::Angstrom, FluxUnit::FLambda)
        .with_continuum(co)?
        .with_meta(meta);
    Ok(clean.add_noise(seed, None)?)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(42);
    let llist = TransitionTable::strong();

    let quasars = [("J0101+0101", 2.4), ("J0202-0202", 2.9), ("J0303+0303", 3.3)];
    let s2n_levels = [10.0, 30.0];

    let mut spectra = Vec::new();
    for &(name, zem) in &quasars {
        for &s2n in &s2n_levels {
            // Two intervening systems between z = 1.7 and the quasar.
            let systems: Vec<(f64, f64)> = (0..2)
                .map(|_| (rng.gen_range(1.7..zem - 0.05), rng.gen_range(1.0..8.0)))
                .collect();
            let mut spec = generate_spectrum(&llist, zem, &systems, s2n, rng.gen())?;
            spec.meta_mut()
                .extra
                .insert("object".into(), MetadataValue::String(name.to_string()));
            spectra.push(spec);
        }
    }

    let output_path = Path::new("sample_spectra.parquet");
    save_file(output_path, &spectra).context("writing sample spectra")?;

    println!(
        "Wrote {} spectra ({} pixels each) to {}",
        spectra.len(),
        spectra.first().map_or(0, |s| s.len()),
        output_path.display()
    );
    Ok(())
}
