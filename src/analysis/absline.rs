//! Absorption lines under analysis and their bookkeeping flags.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::data::model::Spectrum;
use crate::error::{Result, SpecError};
use crate::units::{self, WavelengthUnit};

use super::linelist::{LineList, Transition};
use super::measure::{self, AodmMeasurement, EwMeasurement};

/// Two lines are the same line when their rest wavelengths agree this
/// closely (Angstrom).
const WREST_TOL: f64 = 1e-4;

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// What kind of column-density value a measurement represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LimitFlag {
    #[default]
    Normal,
    LowerLimit,
    UpperLimit,
}

/// Kinematic sample a line contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KinematicClass {
    LowIon,
    HighIon,
}

impl KinematicClass {
    fn bit(self) -> u8 {
        match self {
            KinematicClass::LowIon => 0b01,
            KinematicClass::HighIon => 0b10,
        }
    }
}

/// Set of [`KinematicClass`] memberships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KinematicFlags(u8);

impl KinematicFlags {
    pub fn contains(self, class: KinematicClass) -> bool {
        self.0 & class.bit() != 0
    }

    pub fn toggle(&mut self, class: KinematicClass) {
        self.0 ^= class.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Per-line analysis flags. The defaults mean "include, no blend, normal
/// measurement, no kinematic sample".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFlags {
    pub do_analysis: bool,
    pub blend: bool,
    pub limit: LimitFlag,
    pub kinematics: KinematicFlags,
}

impl Default for AnalysisFlags {
    fn default() -> Self {
        Self {
            do_analysis: true,
            blend: false,
            limit: LimitFlag::Normal,
            kinematics: KinematicFlags::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// AbsorptionLine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionLine {
    pub transition: Transition,
    pub z: f64,
    /// Velocity window in km/s relative to the line centre.
    pub vlim: (f64, f64),
    /// Observed-frame wavelength window (Angstrom); overrides `vlim` for EW.
    pub wvlim: Option<(f64, f64)>,
    pub flags: AnalysisFlags,
    pub ew: Option<f64>,
    pub sig_ew: Option<f64>,
    pub log_n: Option<f64>,
    pub sig_log_n: Option<f64>,
}

impl AbsorptionLine {
    pub fn new(transition: Transition, z: f64) -> Self {
        AbsorptionLine {
            transition,
            z,
            vlim: (-150.0, 150.0),
            wvlim: None,
            flags: AnalysisFlags::default(),
            ew: None,
            sig_ew: None,
            log_n: None,
            sig_log_n: None,
        }
    }

    /// Look up `name` in `llist`.
    pub fn from_linelist<L: LineList + ?Sized>(llist: &L, name: &str, z: f64) -> Result<Self> {
        let transition = llist
            .get(name)
            .ok_or_else(|| SpecError::UnknownTransition(name.to_string()))?;
        Ok(Self::new(transition.clone(), z))
    }

    pub fn wrest(&self) -> f64 {
        self.transition.wrest
    }

    /// Observed wavelength of the line centre (Angstrom).
    pub fn wvobs(&self) -> f64 {
        self.transition.wrest * (1.0 + self.z)
    }

    /// Observed wavelength window: `wvlim` when set, else `vlim` mapped
    /// through the line centre.
    pub fn observed_window(&self) -> (f64, f64) {
        self.wvlim.unwrap_or_else(|| {
            let wvobs = self.wvobs();
            (
                units::wavelength_from_velocity(self.vlim.0, wvobs),
                units::wavelength_from_velocity(self.vlim.1, wvobs),
            )
        })
    }

    /// Rest-frame equivalent width over [`AbsorptionLine::observed_window`].
    /// The window is in Angstrom and converted to the spectrum's unit.
    pub fn measure_restew(&mut self, spec: &Spectrum, continuum: &[f64]) -> Result<EwMeasurement> {
        let (lo, hi) = self.observed_window();
        let to_unit = |w: f64| WavelengthUnit::Angstrom.convert(w, spec.wave_unit());
        let m = measure::equivalent_width(spec, continuum, (to_unit(lo), to_unit(hi)), self.z)?;
        self.ew = Some(m.ew);
        self.sig_ew = m.sig_ew;
        info!("{} z={:.5}: rest EW = {:.4} +/- {:?}", self.transition.name, self.z, m.ew, m.sig_ew);
        Ok(m)
    }

    /// AODM column density over `vlim`; also records the limit type.
    pub fn measure_aodm(&mut self, spec: &Spectrum, continuum: &[f64]) -> Result<AodmMeasurement> {
        let m = measure::aodm(spec, continuum, self.vlim, self.z, &self.transition)?;
        self.log_n = Some(m.log_n);
        self.sig_log_n = m.sig_log_n;
        self.flags.limit = m.limit;
        info!(
            "{} z={:.5}: logN = {:.3} +/- {:?} ({:?})",
            self.transition.name, self.z, m.log_n, m.sig_log_n, m.limit
        );
        Ok(m)
    }

    pub fn toggle_analysis(&mut self) {
        self.flags.do_analysis = !self.flags.do_analysis;
    }

    pub fn toggle_blend(&mut self) {
        self.flags.blend = !self.flags.blend;
    }

    pub fn toggle_kinematics(&mut self, class: KinematicClass) {
        self.flags.kinematics.toggle(class);
    }

    pub fn set_limit(&mut self, limit: LimitFlag) {
        self.flags.limit = limit;
    }
}

// ---------------------------------------------------------------------------
// AbsLineSet – lines of one absorption system
// ---------------------------------------------------------------------------

/// The lines of one absorption system at a common redshift, unique by rest
/// wavelength.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbsLineSet {
    pub z: f64,
    /// Default velocity window for new lines.
    pub vlim: (f64, f64),
    lines: Vec<AbsorptionLine>,
}

impl AbsLineSet {
    pub fn new(z: f64, vlim: (f64, f64)) -> Self {
        AbsLineSet {
            z,
            vlim,
            lines: Vec::new(),
        }
    }

    /// Create lines for every transition of `llist` whose observed
    /// wavelength falls strictly inside the spectrum coverage (Angstrom).
    pub fn init_lines<L: LineList + ?Sized>(&mut self, llist: &L, wvmin: f64, wvmax: f64) {
        let zfac = 1.0 + self.z;
        for t in llist.in_rest_range(wvmin / zfac, wvmax / zfac) {
            self.generate_line(t.clone());
        }
        debug!("{} lines in coverage at z={:.5}", self.lines.len(), self.z);
    }

    pub fn lines(&self) -> &[AbsorptionLine] {
        &self.lines
    }

    fn position(&self, wrest: f64) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| (l.wrest() - wrest).abs() < WREST_TOL)
    }

    pub fn grab_line(&self, wrest: f64) -> Option<&AbsorptionLine> {
        self.position(wrest).map(|i| &self.lines[i])
    }

    pub fn grab_line_mut(&mut self, wrest: f64) -> Option<&mut AbsorptionLine> {
        let i = self.position(wrest)?;
        Some(&mut self.lines[i])
    }

    /// Add a line for `transition` unless one with the same rest wavelength
    /// exists. Returns whether a line was added.
    pub fn generate_line(&mut self, transition: Transition) -> bool {
        if self.position(transition.wrest).is_some() {
            return false;
        }
        let mut line = AbsorptionLine::new(transition, self.z);
        line.vlim = self.vlim;
        self.lines.push(line);
        true
    }

    pub fn remove_line(&mut self, wrest: f64) -> Option<AbsorptionLine> {
        let i = self.position(wrest)?;
        Some(self.lines.remove(i))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Set the lower (`upper == false`) or upper velocity bound of all lines.
    pub fn set_vlim_all(&mut self, v: f64, upper: bool) {
        for line in &mut self.lines {
            if upper {
                line.vlim.1 = v;
            } else {
                line.vlim.0 = v;
            }
        }
    }

    /// Move the system to a new redshift, shifted by `v` km/s.
    pub fn shift_velocity(&mut self, v: f64) {
        self.z = units::z_from_v(self.z, v);
        for line in &mut self.lines {
            line.z = self.z;
        }
    }

    /// Lines flagged for analysis.
    pub fn analysed(&self) -> impl Iterator<Item = &AbsorptionLine> {
        self.lines.iter().filter(|l| l.flags.do_analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::linelist::TransitionTable;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_flags() {
        let line = AbsorptionLine::new(Transition::new("CIV 1548", 1548.2040, 0.1899), 2.0);
        assert!(line.flags.do_analysis);
        assert!(!line.flags.blend);
        assert_eq!(line.flags.limit, LimitFlag::Normal);
        assert!(line.flags.kinematics.is_empty());
    }

    #[test]
    fn test_kinematic_toggles_are_independent() {
        let mut line = AbsorptionLine::new(Transition::new("CII 1334", 1334.5323, 0.1278), 1.0);
        line.toggle_kinematics(KinematicClass::LowIon);
        line.toggle_kinematics(KinematicClass::HighIon);
        assert_eq!(line.flags.kinematics.bits(), 0b11);
        line.toggle_kinematics(KinematicClass::LowIon);
        assert!(!line.flags.kinematics.contains(KinematicClass::LowIon));
        assert!(line.flags.kinematics.contains(KinematicClass::HighIon));
        line.toggle_blend();
        line.toggle_analysis();
        line.set_limit(LimitFlag::UpperLimit);
        assert!(line.flags.blend && !line.flags.do_analysis);
        assert_eq!(line.flags.limit, LimitFlag::UpperLimit);
    }

    #[test]
    fn test_from_linelist() {
        let llist = TransitionTable::strong();
        let line = AbsorptionLine::from_linelist(&llist, "MgII 2796", 0.5).unwrap();
        assert_relative_eq!(line.wvobs(), 2796.3542 * 1.5);
        assert_eq!(
            AbsorptionLine::from_linelist(&llist, "nope", 0.5),
            Err(SpecError::UnknownTransition("nope".into()))
        );
    }

    #[test]
    fn test_line_set_bookkeeping() {
        let llist = TransitionTable::strong();
        let mut set = AbsLineSet::new(2.0, (-200.0, 200.0));
        set.init_lines(&llist, 4100.0, 4700.0);
        // Rest coverage 1366.7 - 1566.7 Angstrom.
        let names: Vec<&str> = set.lines().iter().map(|l| l.transition.name.as_str()).collect();
        assert_eq!(names, ["SiIV 1393", "SiIV 1402", "SiII 1526", "CIV 1548", "CIV 1550"]);

        assert!(!set.generate_line(llist.get("CIV 1548").unwrap().clone()));
        assert_eq!(set.grab_line(1548.2040).unwrap().vlim, (-200.0, 200.0));

        set.grab_line_mut(1548.2040).unwrap().toggle_analysis();
        assert_eq!(set.analysed().count(), 4);

        set.set_vlim_all(-80.0, false);
        assert!(set.lines().iter().all(|l| l.vlim.0 == -80.0));

        assert!(set.remove_line(1393.7602).is_some());
        assert!(set.remove_line(1393.7602).is_none());
        assert_eq!(set.lines().len(), 4);

        set.shift_velocity(100.0);
        assert!(set.z > 2.0);
        assert!(set.lines().iter().all(|l| l.z == set.z));
    }

    #[test]
    fn test_measure_updates_line() {
        let mut line = AbsorptionLine::new(Transition::new("HI 1215", 1215.6701, 0.4164), 0.0);
        let wave: Vec<f64> = (0..400).map(|i| 1211.0 + i as f64 * 0.025).collect();
        let flux: Vec<f64> = wave
            .iter()
            .map(|&w| if (w - 1215.6701).abs() < 0.2 { 0.6 } else { 1.0 })
            .collect();
        let spec = Spectrum::new(wave, flux, Some(vec![0.02; 400])).unwrap();
        let co = vec![1.0; 400];

        line.vlim = (-100.0, 100.0);
        let ew = line.measure_restew(&spec, &co).unwrap();
        assert_eq!(line.ew, Some(ew.ew));
        assert!(ew.ew > 0.0);

        let n = line.measure_aodm(&spec, &co).unwrap();
        assert_eq!(line.log_n, Some(n.log_n));
        assert_eq!(line.flags.limit, LimitFlag::Normal);
    }
}
