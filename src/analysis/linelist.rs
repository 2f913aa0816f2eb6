use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transition – atomic data for one line
// ---------------------------------------------------------------------------

/// Atomic data for one transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Label such as `"CIV 1548"`.
    pub name: String,
    /// Rest wavelength in vacuum Angstrom.
    pub wrest: f64,
    /// Oscillator strength.
    #[serde(alias = "f")]
    pub oscillator_strength: f64,
}

impl Transition {
    pub fn new(name: impl Into<String>, wrest: f64, oscillator_strength: f64) -> Self {
        Transition {
            name: name.into(),
            wrest,
            oscillator_strength,
        }
    }
}

// ---------------------------------------------------------------------------
// LineList – the line-list collaborator
// ---------------------------------------------------------------------------

/// Source of transitions for line identification and column densities.
pub trait LineList {
    fn list_name(&self) -> &str;

    fn transitions(&self) -> &[Transition];

    fn get(&self, name: &str) -> Option<&Transition> {
        self.transitions().iter().find(|t| t.name == name)
    }

    /// Transition whose rest wavelength is closest to `wrest`, if within `tol`.
    fn by_wrest(&self, wrest: f64, tol: f64) -> Option<&Transition> {
        self.transitions()
            .iter()
            .filter(|t| (t.wrest - wrest).abs() <= tol)
            .min_by(|a, b| (a.wrest - wrest).abs().total_cmp(&(b.wrest - wrest).abs()))
    }

    /// Transitions with rest wavelength strictly inside `(lo, hi)`.
    fn in_rest_range(&self, lo: f64, hi: f64) -> Vec<&Transition> {
        self.transitions()
            .iter()
            .filter(|t| t.wrest > lo && t.wrest < hi)
            .collect()
    }
}

/// In-memory line list, sorted by rest wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionTable {
    pub name: String,
    transitions: Vec<Transition>,
}

impl TransitionTable {
    pub fn new(name: impl Into<String>, mut transitions: Vec<Transition>) -> Self {
        transitions.sort_by(|a, b| a.wrest.total_cmp(&b.wrest));
        TransitionTable {
            name: name.into(),
            transitions,
        }
    }

    /// Strong UV/optical absorption lines commonly seen in quasar spectra.
    pub fn strong() -> Self {
        let lines = [
            ("HI 972", 972.5368, 0.0290),
            ("HI 1025", 1025.7223, 0.07912),
            ("OVI 1031", 1031.9261, 0.1325),
            ("OVI 1037", 1037.6167, 0.0658),
            ("HI 1215", 1215.6701, 0.4164),
            ("SiII 1260", 1260.4221, 1.18),
            ("CII 1334", 1334.5323, 0.1278),
            ("SiIV 1393", 1393.7602, 0.513),
            ("SiIV 1402", 1402.7729, 0.254),
            ("SiII 1526", 1526.7070, 0.133),
            ("CIV 1548", 1548.2040, 0.1899),
            ("CIV 1550", 1550.7810, 0.09475),
            ("AlII 1670", 1670.7886, 1.74),
            ("FeII 2382", 2382.7652, 0.320),
            ("FeII 2600", 2600.1725, 0.239),
            ("MgII 2796", 2796.3542, 0.6155),
            ("MgII 2803", 2803.5314, 0.3058),
        ];
        TransitionTable::new(
            "Strong",
            lines
                .iter()
                .map(|&(name, wrest, f)| Transition::new(name, wrest, f))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

impl LineList for TransitionTable {
    fn list_name(&self) -> &str {
        &self.name
    }

    fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}
