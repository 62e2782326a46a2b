//! Reading configuration documents from disk

use super::run_config::{RawConfig, RunConfig};
use crate::error::{ErrorCode, QapError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Load, normalize and freeze the run configuration at `path`
pub async fn load_run_config(path: &Path) -> Result<Arc<RunConfig>> {
    debug!("Loading run configuration from {}", path.display());

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        QapError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("cannot read configuration file {}", path.display()),
            None,
        )
        .with_source(e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&content)
        .map_err(|e| QapError::from(e).with_context(path.display()))?;
    let config = raw.normalize()?;

    info!(
        "Run '{}': {} processors, {} sessions at once, {:.1} GB, cluster {}",
        config.run_name,
        config.num_processors,
        config.num_sessions_at_once,
        config.available_memory_gb,
        config.cluster_system
    );
    Ok(Arc::new(config))
}
