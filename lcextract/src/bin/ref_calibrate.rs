//! Reference star noise calibration
//!
//! Re-bins a reference star sample by archive reference magnitude, sigma clips
//! the lightcurve scatter in each bin, and fits the noise curve used by
//! `lc_extract` to the clipped median scatter.
//!
//! With `--candidates` the sample is first (re)built by querying ZTF for each
//! candidate star; otherwise an existing sample CSV is used.
//!
//! Usage:
//! ```bash
//! cargo run --release --bin ref_calibrate -- --sample data/calibration/reference_sample.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lcextract::reference::{gather_sample, load_candidates, ReferenceSample};
use lcextract::retrieval::ZtfClient;
use lcextract::shared_args::SharedArgs;
use lcextract::storage::{NoLightcurveList, OidCache};

#[derive(Parser, Debug)]
#[command(
    name = "ref_calibrate",
    about = "Calibrate lightcurve noise against reference stars and fit the noise model",
    long_about = None
)]
struct Args {
    /// Reference sample CSV, read for calibration and written when gathering
    #[arg(long)]
    sample: PathBuf,

    /// Candidate stars CSV (Name,RA,DEC,Description,Mag) to build the sample from
    #[arg(long)]
    candidates: Option<PathBuf>,

    /// Output calibration table CSV
    #[arg(long)]
    out_table: Option<PathBuf>,

    /// Output noise model JSON
    #[arg(long)]
    out_model: Option<PathBuf>,

    /// Also write the noise model as flat CSV
    #[arg(long)]
    out_model_csv: Option<PathBuf>,

    /// Query the archive for reference magnitudes missing from the OID cache
    #[arg(long, default_value_t = false)]
    refresh_refs: bool,

    #[command(flatten)]
    shared: SharedArgs,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.shared.load_config()?;
    let store = args.shared.store();
    let mut oid_cache = OidCache::load(store.oid_list_path())?;
    let client = ZtfClient::new(&config.filter_selection);

    let mut sample = match &args.candidates {
        Some(path) => {
            let candidates = load_candidates(path)
                .with_context(|| format!("Failed to read candidates {}", path.display()))?;
            let mut no_lightcurve = NoLightcurveList::load(store.no_lightcurve_path())?;
            log::info!("Gathering reference sample from {} candidates", candidates.len());
            gather_sample(
                &candidates,
                &client,
                &store,
                &config,
                &oid_cache,
                &mut no_lightcurve,
            )?
        }
        None => ReferenceSample::load_csv(&args.sample)
            .with_context(|| format!("Failed to read sample {}", args.sample.display()))?,
    };

    let missing = sample.fill_reference_mags(&oid_cache);
    if !missing.is_empty() {
        if args.refresh_refs {
            let added = client.refresh_cache(&mut oid_cache, &missing)?;
            log::info!("Added {added} reference records to the OID cache");
            sample.fill_reference_mags(&oid_cache);
        } else {
            log::warn!(
                "{} stars have no cached reference magnitude and are left out",
                missing.len()
            );
        }
    }

    let calibration = sample
        .calibrate_and_fit(&config.calibration)
        .context("Calibration failed")?;
    sample.save_csv(&args.sample)?;

    let table_path = args.out_table.unwrap_or_else(|| store.calibration_table_path());
    let model_path = args.out_model.unwrap_or_else(|| store.noise_model_path());
    calibration.table.save_csv(&table_path)?;
    calibration.model.save_json(&model_path)?;
    if let Some(path) = &args.out_model_csv {
        calibration.model.save_csv(path)?;
    }

    println!("{:>8} {:>6} {:>6} {:>10} {:>10}", "mag", "filter", "used", "median_sd", "sd_sd");
    for row in calibration.table.rows() {
        println!(
            "{:>8.2} {:>6} {:>6} {:>10.5} {:>10.5}",
            row.mag, row.filter, row.used_samples, row.median_of_sd, row.sd_of_sd
        );
    }
    println!();
    println!("Calibration table written to {}", table_path.display());
    println!("Noise model written to {}", model_path.display());
    Ok(())
}
