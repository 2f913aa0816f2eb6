//! Stacking pipeline configuration, read from JSON.
//!
//! ```json
//! {
//!   "inputs": ["qso_a.parquet", "qso_b.parquet"],
//!   "redshifts": [2.1, 2.2],
//!   "dv_kms": 100.0,
//!   "method": "median",
//!   "output": "stack.parquet"
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::processing::collection::CombineMethod;

fn default_dv_kms() -> f64 {
    100.0
}

/// Inputs and parameters for collate → rebin_to_rest → smash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Spectrum files, loaded in order.
    pub inputs: Vec<PathBuf>,
    /// One redshift per loaded spectrum, in load order.
    pub redshifts: Vec<f64>,
    /// Rest-frame pixel width in km/s.
    #[serde(default = "default_dv_kms")]
    pub dv_kms: f64,
    #[serde(default)]
    pub method: CombineMethod,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl StackConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: StackConfig = serde_json::from_str(&text).context("parsing stack config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing stack config")?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Every input file holds at least one spectrum, so there must be at
    /// least as many redshifts as inputs. The exact count is checked once
    /// the spectra are loaded.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            bail!("stack config lists no input files");
        }
        if self.redshifts.len() < self.inputs.len() {
            bail!(
                "{} redshifts given for {} input files",
                self.redshifts.len(),
                self.inputs.len()
            );
        }
        if let Some(z) = self.redshifts.iter().find(|&&z| !(z > -1.0)) {
            bail!("invalid redshift {z}");
        }
        if !(self.dv_kms.is_finite() && self.dv_kms > 0.0) {
            bail!("dv_kms must be positive, got {}", self.dv_kms);
        }
        Ok(())
    }
}
