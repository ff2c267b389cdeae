use anyhow::{Context, Result};
use std::fs;

use crate::config::Config;
use crate::store::schema::{MARKET_DATA_DIR, METRICS_DIR, STATISTICS_DIR};
use crate::types::models::FilterVariant;

/// Creates the output directories of the data layout. Existing data is
/// left untouched.
pub fn init_layout(config: &Config) -> Result<()> {
    tracing::info!("Initializing data layout under {}", config.data_path.display());

    let mut dirs = vec![
        config.path(METRICS_DIR),
        config.path(STATISTICS_DIR),
        config.path(MARKET_DATA_DIR),
    ];
    for variant in FilterVariant::all() {
        dirs.push(config.processed_holders_dir(variant));
    }

    for dir in dirs {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    Ok(())
}
