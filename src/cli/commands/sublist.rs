//! `qapflow sublist`

use crate::error::{ErrorCode, QapError};
use crate::session::gather_raw_data;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Subject ids listed one per line; blank lines and `#` comments are skipped
fn read_inclusion(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        QapError::config_with_code(
            ErrorCode::CONFIG_NOT_FOUND,
            format!("cannot read inclusion list {}", path.display()),
            None,
        )
        .with_source(e)
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub async fn run_sublist_command(
    site_folder: &Path,
    output: Option<&Path>,
    include: Option<&Path>,
) -> Result<()> {
    let inclusion = include.map(read_inclusion).transpose()?;
    let folder = site_folder.to_path_buf();
    let list =
        tokio::task::spawn_blocking(move || gather_raw_data(&folder, inclusion.as_deref()))
            .await??;
    let yaml = list.to_yaml_string()?;

    match output {
        Some(path) => {
            tokio::fs::write(path, yaml)
                .await
                .map_err(|e| QapError::sink_io(e, path))?;
            info!("Wrote {} scan(s) to {}", list.scan_count(), path.display());
        }
        None => print!("{}", yaml),
    }
    Ok(())
}
