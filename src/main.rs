//! `spectool`: batch utilities for 1-D spectra.
//!
//! Subcommands:
//! - `info`: summarize the spectra in a file
//! - `rebin`: resample onto a linear or constant-velocity grid
//! - `stack`: shift to the rest frame and combine (collate → rebin → smash)
//! - `splice`: join spectra covering different wavelength ranges
//! - `smooth`: boxcar, Gaussian or inverse-variance smoothing
//! - `ew`: rest-frame equivalent width in a wavelength window
//! - `aodm`: apparent optical depth column density for one transition

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use spectral_engine::analysis::absline::AbsorptionLine;
use spectral_engine::analysis::linelist::TransitionTable;
use spectral_engine::analysis::measure;
use spectral_engine::config::StackConfig;
use spectral_engine::data::loader::{load_file, load_linelist, save_file};
use spectral_engine::processing::collection::{collate, rebin_to_rest, smash_spectra, splice_two};
use spectral_engine::{units, CombineMethod, Spectrum};

#[derive(Parser, Debug)]
#[command(name = "spectool")]
#[command(about = "Rebin, stack, splice, smooth and measure 1-D spectra")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize every spectrum in a file
    Info {
        input: PathBuf,
    },

    /// Resample onto a new wavelength grid
    Rebin {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// First pixel centre (spectrum wavelength units)
        #[arg(long)]
        start: f64,

        /// Last pixel centre
        #[arg(long)]
        stop: f64,

        /// Linear pixel width
        #[arg(long, conflicts_with = "dv")]
        step: Option<f64>,

        /// Constant velocity pixel width in km/s
        #[arg(long)]
        dv: Option<f64>,

        /// Skip uncertainty propagation
        #[arg(long)]
        no_sig: bool,
    },

    /// Shift spectra to the rest frame and combine them
    Stack {
        /// JSON stack configuration; other flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Spectrum files (when no config is given)
        inputs: Vec<PathBuf>,

        /// One redshift per spectrum, in load order
        #[arg(short, long, value_delimiter = ',')]
        redshifts: Vec<f64>,

        /// Rest-frame pixel width in km/s
        #[arg(long)]
        dv: Option<f64>,

        /// average or median
        #[arg(short, long)]
        method: Option<CombineMethod>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Splice spectra, in order, into one
    Splice {
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        output: PathBuf,

        /// Multiply every spectrum after the first by this factor
        #[arg(long)]
        scale: Option<f64>,
    },

    /// Smooth every spectrum in a file
    Smooth {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "gauss")]
        kernel: Kernel,

        /// Box width or half-width in pixels, or Gaussian FWHM in pixels
        #[arg(short, long)]
        width: f64,

        /// Block-average the box kernel onto a coarser grid
        #[arg(long)]
        rebin: bool,
    },

    /// Rest-frame equivalent width
    Ew {
        input: PathBuf,

        /// Observed-frame window lower edge
        #[arg(long)]
        lo: f64,

        /// Observed-frame window upper edge
        #[arg(long)]
        hi: f64,

        #[arg(short, long, default_value = "0")]
        z: f64,

        /// Spectrum index within the file
        #[arg(long, default_value = "0")]
        index: usize,

        /// Flux is already normalized; use a unit continuum
        #[arg(long)]
        normalized: bool,
    },

    /// Apparent optical depth column density
    Aodm {
        input: PathBuf,

        /// Transition name, e.g. "CIV 1548"
        #[arg(short, long)]
        line: String,

        #[arg(short, long)]
        z: f64,

        #[arg(long, default_value = "-150", allow_hyphen_values = true)]
        vmin: f64,

        #[arg(long, default_value = "150", allow_hyphen_values = true)]
        vmax: f64,

        /// JSON or CSV line list (built-in strong lines otherwise)
        #[arg(long)]
        linelist: Option<PathBuf>,

        #[arg(long, default_value = "0")]
        index: usize,

        #[arg(long)]
        normalized: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kernel {
    Boxcar,
    Gauss,
    Ivar,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Command::Info { input } => cmd_info(&input),
        Command::Rebin {
            input,
            output,
            start,
            stop,
            step,
            dv,
            no_sig,
        } => cmd_rebin(&input, &output, start, stop, step, dv, !no_sig),
        Command::Stack {
            config,
            inputs,
            redshifts,
            dv,
            method,
            output,
        } => {
            let mut cfg = match config {
                Some(path) => StackConfig::from_path(&path)?,
                None => StackConfig {
                    inputs: Vec::new(),
                    redshifts: Vec::new(),
                    dv_kms: 100.0,
                    method: CombineMethod::default(),
                    output: None,
                },
            };
            if !inputs.is_empty() {
                cfg.inputs = inputs;
            }
            if !redshifts.is_empty() {
                cfg.redshifts = redshifts;
            }
            if let Some(dv) = dv {
                cfg.dv_kms = dv;
            }
            if let Some(method) = method {
                cfg.method = method;
            }
            if output.is_some() {
                cfg.output = output;
            }
            cfg.validate()?;
            cmd_stack(&cfg)
        }
        Command::Splice {
            inputs,
            output,
            scale,
        } => cmd_splice(&inputs, &output, scale),
        Command::Smooth {
            input,
            output,
            kernel,
            width,
            rebin,
        } => cmd_smooth(&input, &output, kernel, width, !rebin),
        Command::Ew {
            input,
            lo,
            hi,
            z,
            index,
            normalized,
        } => {
            let spec = load_one(&input, index)?;
            let continuum = continuum_of(&spec, normalized)?;
            let m = measure::equivalent_width(&spec, &continuum, (lo, hi), z)?;
            match m.sig_ew {
                Some(sig) => println!("EW_rest = {:.5} +/- {:.5} ({} pixels)", m.ew, sig, m.npix),
                None => println!("EW_rest = {:.5} ({} pixels)", m.ew, m.npix),
            }
            Ok(())
        }
        Command::Aodm {
            input,
            line,
            z,
            vmin,
            vmax,
            linelist,
            index,
            normalized,
        } => {
            let spec = load_one(&input, index)?;
            let continuum = continuum_of(&spec, normalized)?;
            let llist = match linelist {
                Some(path) => load_linelist(&path)?,
                None => TransitionTable::strong(),
            };
            let mut absline = AbsorptionLine::from_linelist(&llist, &line, z)?;
            absline.vlim = (vmin, vmax);
            let m = absline.measure_aodm(&spec, &continuum)?;
            println!(
                "{line}: logN = {:.3} +/- {} [{:?}], {} pixels, {} saturated",
                m.log_n,
                m.sig_log_n
                    .map_or_else(|| "n/a".to_string(), |s| format!("{s:.3}")),
                m.limit,
                m.npix,
                m.saturated.len()
            );
            Ok(())
        }
    }
}

fn load_one(path: &Path, index: usize) -> Result<Spectrum> {
    let mut spectra = load_file(path)?;
    if index >= spectra.len() {
        bail!("{} holds {} spectra, no index {index}", path.display(), spectra.len());
    }
    Ok(spectra.swap_remove(index))
}

fn continuum_of(spec: &Spectrum, normalized: bool) -> Result<Vec<f64>> {
    match (spec.continuum(), normalized) {
        (_, true) => Ok(vec![1.0; spec.len()]),
        (Some(co), false) => Ok(co.to_vec()),
        (None, false) => bail!("spectrum has no continuum; pass --normalized if flux is already normalized"),
    }
}

fn cmd_info(input: &Path) -> Result<()> {
    let spectra = load_file(input)?;
    println!("{}: {} spectra", input.display(), spectra.len());
    for (i, spec) in spectra.iter().enumerate() {
        let range = match (spec.wvmin(), spec.wvmax()) {
            (Some(lo), Some(hi)) => format!("{lo:.3} - {hi:.3} {}", spec.wave_unit()),
            _ => "no valid pixels".to_string(),
        };
        println!(
            "[{i}] {} pixels ({} valid), {range}, airvac={}, sig={}, co={}",
            spec.len(),
            spec.npix(),
            spec.meta().airvac.as_str(),
            spec.sig_is_set(),
            spec.co_is_set()
        );
        for (key, value) in &spec.meta().extra {
            println!("      {key} = {value}");
        }
    }
    Ok(())
}

fn cmd_rebin(
    input: &Path,
    output: &Path,
    start: f64,
    stop: f64,
    step: Option<f64>,
    dv: Option<f64>,
    do_sig: bool,
) -> Result<()> {
    if !(stop > start && start > 0.0) {
        bail!("invalid grid range {start} - {stop}");
    }
    let grid: Vec<f64> = match (step, dv) {
        (Some(step), _) if step > 0.0 => {
            let n = ((stop - start) / step).floor() as usize + 1;
            (0..n).map(|i| start + i as f64 * step).collect()
        }
        (None, Some(dv)) if dv > 0.0 => {
            let dlnlam = units::dlnlambda(dv);
            let n = ((stop / start).ln() / dlnlam).floor() as usize + 1;
            (0..n).map(|i| start * (i as f64 * dlnlam).exp()).collect()
        }
        _ => bail!("give a positive --step or --dv"),
    };
    info!("rebinning onto {} pixels", grid.len());

    let rebinned = load_file(input)?
        .iter()
        .map(|spec| spec.rebin(&grid, do_sig))
        .collect::<Result<Vec<_>, _>>()?;
    save_file(output, &rebinned)
}

fn cmd_stack(cfg: &StackConfig) -> Result<()> {
    let mut spectra = Vec::new();
    for path in &cfg.inputs {
        spectra.extend(load_file(path)?);
    }
    let batch = collate(spectra)?;
    let rest = rebin_to_rest(&batch, &cfg.redshifts, cfg.dv_kms)
        .context("shifting spectra to the rest frame")?;
    let stack = smash_spectra(&rest, cfg.method)?;
    println!(
        "stacked {} spectra ({}) onto {} pixels, {:.3} - {:.3}",
        rest.nspec(),
        cfg.method,
        stack.len(),
        stack.wvmin().unwrap_or(f64::NAN),
        stack.wvmax().unwrap_or(f64::NAN)
    );
    if let Some(output) = &cfg.output {
        save_file(output, std::slice::from_ref(&stack))?;
    }
    Ok(())
}

fn cmd_splice(inputs: &[PathBuf], output: &Path, scale: Option<f64>) -> Result<()> {
    let mut spectra = Vec::new();
    for path in inputs {
        spectra.extend(load_file(path)?);
    }
    let mut parts = spectra.iter();
    let mut spliced = match parts.next() {
        Some(first) => first.clone(),
        None => bail!("nothing to splice"),
    };
    for spec in parts {
        spliced = splice_two(&spliced, spec, scale)?;
    }
    println!("spliced {} spectra into {} pixels", spectra.len(), spliced.len());
    save_file(output, std::slice::from_ref(&spliced))
}

fn cmd_smooth(input: &Path, output: &Path, kernel: Kernel, width: f64, preserve: bool) -> Result<()> {
    if !(width.is_finite() && width > 0.0) {
        bail!("--width must be a positive number, got {width}");
    }
    let smoothed = load_file(input)?
        .iter()
        .map(|spec| match kernel {
            Kernel::Boxcar => spec.box_smooth(width.round() as usize, preserve),
            Kernel::Gauss => spec.gauss_smooth(width),
            Kernel::Ivar => spec.ivar_smooth(width.round() as usize),
        })
        .collect::<Result<Vec<_>, _>>()?;
    save_file(output, &smoothed)
}
