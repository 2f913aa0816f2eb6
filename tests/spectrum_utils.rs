//! End-to-end checks of the spectrum utilities on synthetic spectra.

use approx::{assert_abs_diff_eq, assert_relative_eq};

use spectral_engine::analysis::linelist::LineList;
use spectral_engine::analysis::measure;
use spectral_engine::config::StackConfig;
use spectral_engine::data::loader::{load_file, save_file};
use spectral_engine::units::{self, C_KMS};
use spectral_engine::{
    collate, rebin_to_rest, smash_spectra, splice_two, AbsLineSet, AirVac, CombineMethod,
    LimitFlag, SpecError, Spectrum, SpectrumBatch, TransitionTable,
};

/// Rest wavelength that ends up as the blue edge of the stacked grid.
const REST_MIN: f64 = 986.021738877745;

fn linear(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|i| start + i as f64 * step).collect()
}

fn constant(wave: Vec<f64>, value: f64, sig: f64) -> Spectrum {
    let n = wave.len();
    Spectrum::new(wave, vec![value; n], Some(vec![sig; n])).unwrap()
}

/// Two quasars at z = 2.1 and 2.2 whose rest-frame coverage spans 3715.5
/// velocity pixels of 100 km/s.
fn two_quasars() -> (Spectrum, Spectrum) {
    let rest_max = REST_MIN * (3715.5 * units::dlnlambda(100.0)).exp();
    let a = constant(linear(3.1 * REST_MIN, 0.5, 10206), 1.0, 0.1);
    let b_end = 3.2 * rest_max;
    let b = constant(linear(b_end - 0.7 * 10172.0, 0.7, 10173), 3.0, 0.2);
    (a, b)
}

#[test]
fn test_collate_and_rest_frame_stack() {
    let (a, b) = two_quasars();
    let batch = collate(vec![a, b]).unwrap();
    assert_eq!(batch.nspec(), 2);
    assert_eq!(batch.totpix(), 20379);

    assert_eq!(
        smash_spectra(&batch, CombineMethod::Average),
        Err(SpecError::IncompatibleGrids { index: 1 })
    );

    let rest = rebin_to_rest(&batch, &[2.1, 2.2], 100.0).unwrap();
    assert_eq!(rest.totpix(), 3716);
    assert_relative_eq!(rest.wvmin().unwrap(), REST_MIN, max_relative = 1e-5);

    let grid = rest.spectra()[0].wavelength();
    assert_eq!(grid.len(), 3716);
    let dv = units::velocity_offset(grid[1], grid[0]);
    assert_relative_eq!(dv, 100.0, max_relative = 1e-3);

    let stack = smash_spectra(&rest, CombineMethod::Average).unwrap();
    assert_eq!(stack.len(), 3716);

    // Blue end only seen by the z=2.1 quasar, red end only by z=2.2.
    let blue = stack.nearest_pixel(1000.0);
    let mid = stack.nearest_pixel(1500.0);
    let red = stack.nearest_pixel(3000.0);
    assert_relative_eq!(stack.flux()[blue], 1.0, max_relative = 1e-10);
    assert_relative_eq!(stack.flux()[mid], 2.0, max_relative = 1e-10);
    assert_relative_eq!(stack.flux()[red], 3.0, max_relative = 1e-10);
    assert_eq!(stack.npix(), 3716);

    let sa = rest.spectra()[0].sigma().unwrap()[mid];
    let sb = rest.spectra()[1].sigma().unwrap()[mid];
    assert_relative_eq!(
        stack.sigma().unwrap()[mid],
        (sa * sa + sb * sb).sqrt() / 2.0,
        max_relative = 1e-12
    );
}

#[test]
fn test_rest_frame_redshift_count() {
    let (a, b) = two_quasars();
    let batch = collate(vec![a, b]).unwrap();
    assert_eq!(
        rebin_to_rest(&batch, &[2.1], 100.0),
        Err(SpecError::RedshiftCount { redshifts: 1, spectra: 2 })
    );
    assert!(matches!(
        SpectrumBatch::from_list(Vec::new()),
        Err(SpecError::EmptyBatch(_))
    ));
}

#[test]
fn test_air_vacuum_round_trip() {
    let wave = linear(3000.0, 1.5, 4001);
    let mut spec = constant(wave.clone(), 1.0, 0.1);
    assert_eq!(spec.airtovac(), Err(SpecError::AlreadyInFrame("vacuum")));

    spec.meta_mut().airvac = AirVac::Air;
    spec.airtovac().unwrap();
    assert_eq!(spec.meta().airvac, AirVac::Vacuum);
    assert!(spec.wavelength().iter().zip(&wave).all(|(v, a)| v > a));
    // Roughly 1.4 Angstrom at 5000 Angstrom.
    assert_abs_diff_eq!(spec.wavelength()[1333] - wave[1333], 1.39, epsilon = 0.02);

    spec.vactoair().unwrap();
    for (back, orig) in spec.wavelength().iter().zip(&wave) {
        assert_relative_eq!(*back, *orig, max_relative = 1e-10);
    }
}

#[test]
fn test_air_vacuum_round_trip_across_2000() {
    // Air to vacuum and back on a grid that straddles the 2000 Angstrom cut.
    let air = linear(1995.0, 0.2, 50);
    let mut spec = constant(air.clone(), 1.0, 0.1);
    spec.meta_mut().airvac = AirVac::Air;
    spec.airtovac().unwrap();
    assert_eq!(spec.wavelength()[24], air[24]);
    assert!(spec.wavelength()[25] > 2000.6);
    spec.vactoair().unwrap();
    for (back, orig) in spec.wavelength().iter().zip(&air) {
        assert_relative_eq!(*back, *orig, max_relative = 1e-12);
    }

    // Vacuum to air and back, stepping over [2000, 2000.65).
    let vac = linear(1990.9, 1.0, 40);
    let mut spec = constant(vac.clone(), 1.0, 0.1);
    spec.vactoair().unwrap();
    assert!(spec.wavelength().windows(2).all(|w| w[1] > w[0]));
    spec.airtovac().unwrap();
    for (back, orig) in spec.wavelength().iter().zip(&vac) {
        assert_relative_eq!(*back, *orig, max_relative = 1e-12);
    }
}

#[test]
fn test_vactoair_rejects_unorderable_grid() {
    // Vacuum pixels between 2000 and 2000.65 Angstrom would land above
    // their converted red neighbours.
    let vac = linear(1995.0, 0.2, 50);
    let mut spec = constant(vac.clone(), 1.0, 0.1);
    assert!(matches!(spec.vactoair(), Err(SpecError::NotMonotonic { .. })));
    assert_eq!(spec.wavelength(), vac.as_slice());
    assert_eq!(spec.meta().airvac, AirVac::Vacuum);
}

#[test]
fn test_normalize_is_reversible() {
    let wave = linear(4000.0, 1.0, 200);
    let flux: Vec<f64> = wave.iter().map(|w| 3.0 + (w / 37.0).sin()).collect();
    let co: Vec<f64> = wave.iter().map(|w| 3.0 + w * 1e-4).collect();
    let mut spec = Spectrum::new(wave, flux.clone(), Some(vec![0.3; 200])).unwrap();

    spec.normalize(co.clone()).unwrap();
    assert!(spec.is_normalized());
    assert_relative_eq!(spec.flux()[10], flux[10] / co[10]);
    assert_relative_eq!(spec.sigma().unwrap()[10], 0.3 / co[10]);

    spec.unnormalize();
    assert_eq!(spec.flux().as_ref(), flux.as_slice());
}

#[test]
fn test_rebin_conserves_flux() {
    let wave = linear(5000.0, 0.1, 2001);
    let flux: Vec<f64> = wave
        .iter()
        .map(|w| 1.0 + 5.0 * (-((w - 5100.0) / 3.0).powi(2) / 2.0).exp())
        .collect();
    let spec = Spectrum::new(wave, flux, None).unwrap();
    let coarse = spec.rebin(&linear(5010.0, 0.73, 247), false).unwrap();

    // Line flux above the unit continuum.
    let integral = |s: &Spectrum, lo: f64, hi: f64| -> f64 {
        let w = s.wavelength();
        (1..w.len() - 1)
            .filter(|&i| w[i] > lo && w[i] < hi)
            .map(|i| (s.flux()[i] - 1.0) * 0.5 * (w[i + 1] - w[i - 1]))
            .sum()
    };
    let before = integral(&spec, 5080.0, 5120.0);
    let after = integral(&coarse, 5080.0, 5120.0);
    assert_relative_eq!(after, before, max_relative = 1e-3);
}

#[test]
fn test_splice_keeps_first_spectrum() {
    let a = constant(linear(4000.0, 1.0, 1001), 1.0, 0.1);
    let b = constant(linear(4500.0, 1.0, 1501), 2.0, 0.1);
    let spliced = splice_two(&a, &b, Some(0.5)).unwrap();
    assert_eq!(spliced.len(), 2001);
    assert_eq!(spliced.flux()[1000], 1.0);
    assert_eq!(spliced.flux()[1001], 1.0);
    assert_eq!(spliced.wavelength()[1001], 5001.0);

    let batch = collate(vec![a, b]).unwrap();
    let stitched = batch.stitch().unwrap();
    assert_eq!(stitched.len(), 2001);
    assert_eq!(stitched.flux()[2000], 2.0);
}

#[test]
fn test_box_smooth_linear_ramp() {
    let wave = linear(6000.0, 1.0, 100);
    let flux: Vec<f64> = (0..100).map(|i| i as f64).collect();
    let spec = Spectrum::new(wave, flux.clone(), None).unwrap();

    let smooth = spec.box_smooth(5, true).unwrap();
    assert_eq!(smooth.len(), 100);
    for i in 2..98 {
        assert_relative_eq!(smooth.flux()[i], flux[i], max_relative = 1e-12);
    }

    let binned = spec.box_smooth(5, false).unwrap();
    assert_eq!(binned.len(), 20);
    assert_relative_eq!(binned.flux()[0], 2.0);
    assert_relative_eq!(binned.wavelength()[0], 6002.0);
}

#[test]
fn test_gaussian_absorption_measurements() {
    let llist = TransitionTable::strong();
    let civ = llist.get("CIV 1548").unwrap().clone();
    let z = 2.0;
    let wvobs = civ.wrest * (1.0 + z);

    let wave = linear(wvobs - 15.0, 0.02, 1501);
    let (depth, width) = (0.4, 0.5);
    let flux: Vec<f64> = wave
        .iter()
        .map(|w| 1.0 - depth * (-((w - wvobs) / width).powi(2) / 2.0).exp())
        .collect();
    let spec = Spectrum::new(wave, flux, Some(vec![0.01; 1501])).unwrap();
    let co = vec![1.0; spec.len()];

    let ew = measure::equivalent_width(&spec, &co, (wvobs - 5.0, wvobs + 5.0), z).unwrap();
    let expected = depth * width * (2.0 * std::f64::consts::PI).sqrt() / (1.0 + z);
    assert_relative_eq!(ew.ew, expected, max_relative = 1e-3);

    let mut system = AbsLineSet::new(z, (-300.0, 300.0));
    system.init_lines(&llist, spec.wvmin().unwrap(), spec.wvmax().unwrap());
    let names: Vec<&str> = system.lines().iter().map(|l| l.transition.name.as_str()).collect();
    assert_eq!(names, ["CIV 1548", "CIV 1550"]);

    let line = system.grab_line_mut(civ.wrest).unwrap();
    let m = line.measure_aodm(&spec, &co).unwrap();
    assert_eq!(m.limit, LimitFlag::Normal);
    assert!(m.saturated.is_empty());
    assert!(line.log_n.unwrap() > 13.0 && line.log_n.unwrap() < 15.0);

    let restew = line.measure_restew(&spec, &co).unwrap();
    // +/-300 km/s is +/-4.6 Angstrom observed.
    assert_relative_eq!(restew.ew, expected, max_relative = 1e-3);
}

#[test]
fn test_velocity_helpers() {
    let spec = constant(linear(4640.0, 0.05, 200), 1.0, 0.1);
    let wvobs = 4644.612;
    let vel = spec.relative_vel(wvobs);
    assert_abs_diff_eq!(vel[0], (4640.0 - wvobs) / wvobs * C_KMS, epsilon = 1e-9);

    let pix = spec.pix_minmax_velocity(2.0, 1548.204, -100.0, 100.0);
    assert!(!pix.is_empty());
    for &i in &pix[1..pix.len() - 1] {
        assert!(vel[i].abs() <= 100.0);
    }
    assert_abs_diff_eq!(units::z_from_v(2.0, 0.0), 2.0);
}

#[test]
fn test_stack_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = two_quasars();
    let pa = dir.path().join("a.parquet");
    let pb = dir.path().join("b.json");
    save_file(&pa, &[a]).unwrap();
    save_file(&pb, &[b]).unwrap();

    let cfg_path = dir.path().join("stack.json");
    std::fs::write(
        &cfg_path,
        format!(
            r#"{{"inputs": [{:?}, {:?}], "redshifts": [2.1, 2.2], "method": "median"}}"#,
            pa.to_str().unwrap(),
            pb.to_str().unwrap()
        ),
    )
    .unwrap();
    let cfg = StackConfig::from_path(&cfg_path).unwrap();

    let mut spectra = Vec::new();
    for path in &cfg.inputs {
        spectra.extend(load_file(path).unwrap());
    }
    let rest = rebin_to_rest(&collate(spectra).unwrap(), &cfg.redshifts, cfg.dv_kms).unwrap();
    let stack = smash_spectra(&rest, cfg.method).unwrap();
    assert_eq!(stack.len(), 3716);
    let mid = stack.nearest_pixel(1500.0);
    assert_relative_eq!(stack.flux()[mid], 2.0, max_relative = 1e-10);
}
