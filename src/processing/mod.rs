//! Operations that produce new spectra: resampling, smoothing, continuum
//! handling, noise injection, and batch combination.

pub mod collection;
pub mod continuum;
pub mod noise;
pub mod rebin;
pub mod smooth;
