use anyhow::Context;
use clap::Parser;
use lightcurve::{LightcurveConfig, NoiseModelCoefficients};
use std::path::{Path, PathBuf};

use crate::storage::LightcurveStore;

/// Parse a filter selection such as "gr", rejecting characters no archive knows
fn parse_filters(s: &str) -> Result<String, String> {
    let s = s.trim();
    match s.chars().find(|&f| !lightcurve::archive::is_known_filter(f)) {
        Some(bad) => Err(format!("Unknown filter '{}' in '{}'", bad, s)),
        None => Ok(s.to_string()),
    }
}

/// Common arguments shared by the lightcurve tools
#[derive(Parser, Debug, Clone)]
pub struct SharedArgs {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Root of the data directory holding cached lightcurves and lookup lists
    #[arg(long, default_value = "data")]
    pub cache: PathBuf,

    /// Override the configured filter selection (e.g. "gr")
    #[arg(long, value_parser = parse_filters)]
    pub filters: Option<String>,
}

impl SharedArgs {
    /// Load and validate the configuration, applying command-line overrides.
    ///
    /// # Returns
    /// * `Ok(LightcurveConfig)` - Validated configuration
    /// * `Err(anyhow::Error)` - File unreadable or a setting out of range
    pub fn load_config(&self) -> anyhow::Result<LightcurveConfig> {
        let mut config = LightcurveConfig::load_or_default(self.config.as_ref())?;
        if let Some(filters) = &self.filters {
            config.filter_selection = filters.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn store(&self) -> LightcurveStore {
        LightcurveStore::with_path(self.cache.clone())
    }
}

/// Load the fitted noise model used to classify outliers.
///
/// A missing file points the user at `ref_calibrate`, which writes the model.
pub fn load_noise_model(path: &Path) -> anyhow::Result<NoiseModelCoefficients> {
    if !path.exists() {
        anyhow::bail!(
            "No noise model at {}; run ref_calibrate to fit one or pass --model",
            path.display()
        );
    }
    NoiseModelCoefficients::load_json(path)
        .with_context(|| format!("Failed to load noise model from {}", path.display()))
}
