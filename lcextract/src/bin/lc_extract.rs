//! Lightcurve summary and outlier search over an object list
//!
//! For every object in the list this tool queries each configured archive
//! (through the on-disk cache), prints the per-filter summary statistics, and
//! reports measurements lying outside the reference noise band. With
//! `--check-outliers` each accepted outlier is also compared with the other
//! objects detected in the same exposure.
//!
//! Usage:
//! ```bash
//! RUST_LOG=info cargo run --bin lc_extract -- --objects objects.csv --refresh-refs
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use lcextract::field_check::check_outliers;
use lcextract::object::load_object_list;
use lcextract::report::{self, ArchiveSummary};
use lcextract::retrieval::{CachedSource, ZtfClient};
use lcextract::shared_args::{load_noise_model, SharedArgs};
use lcextract::storage::{OidCache, OBJECT_GROUP};
use lcextract::ObjectAnalyzer;
use lightcurve::archive::ZTF;

#[derive(Parser, Debug)]
#[command(
    name = "lc_extract",
    about = "Summarise archive lightcurves and flag outliers for a list of objects",
    long_about = None
)]
struct Args {
    /// Object list CSV with columns Name,RA,DEC,Description
    #[arg(long)]
    objects: PathBuf,

    /// Noise model JSON (defaults to the calibration output in the cache directory)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Query the archive for reference magnitudes missing from the OID cache
    #[arg(long, default_value_t = false)]
    refresh_refs: bool,

    /// Compare each accepted outlier with the field objects of its exposure
    #[arg(long, default_value_t = false)]
    check_outliers: bool,

    /// Write per-archive statistics and verdicts of every object as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,

    #[command(flatten)]
    shared: SharedArgs,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = args.shared.load_config()?;
    let store = args.shared.store();
    let model_path = args.model.clone().unwrap_or_else(|| store.noise_model_path());
    let model = load_noise_model(&model_path)?;
    let objects = load_object_list(&args.objects)
        .with_context(|| format!("Failed to read object list {}", args.objects.display()))?;
    let mut oid_cache = OidCache::load(store.oid_list_path())?;

    let client = ZtfClient::new(&config.filter_selection);
    let source = CachedSource::new(&client, store.clone(), OBJECT_GROUP, &config.filter_selection);

    println!();
    println!("Lightcurve data extract");
    println!("-----------------------");

    let mut with_outliers = 0;
    let mut analysed = Vec::new();
    for object in &objects {
        println!("{}", report::object_header(object));

        let results = {
            let analyzer = ObjectAnalyzer::new(&config, &source, &oid_cache, &model)?;
            analyzer.analyze(object)
        };

        let mut flagged = false;
        for (archive, analysis) in results {
            let Some(mut analysis) = analysis else {
                println!("{}", report::no_data_line(archive));
                continue;
            };

            if args.refresh_refs {
                let missing = analysis.resolve_references(&oid_cache);
                if !missing.is_empty() {
                    client.refresh_cache(&mut oid_cache, &missing)?;
                    analysis.resolve_references(&oid_cache);
                }
            }

            if args.check_outliers && archive.code == ZTF.code && analysis.outliers_exist() {
                let checked = check_outliers(
                    &mut analysis,
                    object.position(),
                    &client,
                    &config.field_check,
                );
                log::info!("{checked} outliers of {} checked against the field", object.name);
            }

            println!(
                "{}",
                report::summary_table(archive, &analysis.stats, &config.filter_selection)
            );
            for line in report::verdict_lines(object, &analysis) {
                println!("{line}");
            }
            flagged |= analysis.outliers_exist();
            analysed.push((object, analysis));
        }
        if flagged {
            with_outliers += 1;
        }
    }

    if let Some(path) = &args.summary_json {
        let summaries: Vec<ArchiveSummary> = analysed
            .iter()
            .map(|(object, analysis)| ArchiveSummary::new(object, analysis))
            .collect();
        report::write_json_summary(path, &summaries)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    log::info!(
        "{} of {} objects have accepted outliers",
        with_outliers,
        objects.len()
    );
    Ok(())
}
