//! Absorption-line analysis on normalized spectra.

pub mod absline;
pub mod linelist;
pub mod measure;
