//! Output sink
//!
//! Writes the final table to the output directory. Any failure here is fatal
//! to the run and is not retried.

use super::graph::{DotGraphRenderer, ExecutionPlan, GraphRenderer};
use super::report::{HtmlReportGenerator, ReportGenerator};
use crate::aggregation::{AggregateTable, MetricRecord};
use crate::config::RunConfig;
use crate::error::{ErrorCode, QapError, Result};
use crate::session::ScanKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ID_COLUMNS: [&str; 4] = ["Participant", "Session", "Series", "Site"];

pub fn table_file_name(kind: ScanKind) -> String {
    format!("qap_{}.csv", kind.as_str())
}

pub const FAILURES_FILE: &str = "qap_failures.csv";

pub struct OutputSink {
    report: Arc<dyn ReportGenerator>,
    graph: Arc<dyn GraphRenderer>,
}

impl OutputSink {
    pub fn new(report: Arc<dyn ReportGenerator>, graph: Arc<dyn GraphRenderer>) -> Self {
        Self { report, graph }
    }

    /// Sink with the built-in HTML report and DOT graph
    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(
            Arc::new(HtmlReportGenerator::new()?),
            Arc::new(DotGraphRenderer),
        ))
    }

    /// Write every enabled output, returning the files written
    pub async fn emit(&self, table: &AggregateTable, config: &RunConfig) -> Result<Vec<PathBuf>> {
        let dir = &config.output_directory;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| QapError::sink_io(e, dir))?;

        let mut written = Vec::new();
        for kind in ScanKind::ALL {
            let records = table.records(kind);
            if records.is_empty() {
                continue;
            }
            let bytes = metrics_csv(records, &table.metric_names(kind))?;
            written.push(write(dir, &table_file_name(kind), bytes).await?);
        }

        if !table.failures.is_empty() {
            written.push(write(dir, FAILURES_FILE, failures_csv(table)?).await?);
        }

        if config.flags.write_report {
            let bytes = self.report.render(table, config).await?;
            written.push(write(dir, self.report.file_name(), bytes).await?);
        }

        if config.flags.write_graph {
            let plan = ExecutionPlan::from_table(table);
            let bytes = self.graph.render(&plan)?;
            written.push(write(dir, self.graph.file_name(), bytes).await?);
        }

        info!("Wrote {} output file(s) to {}", written.len(), dir.display());
        Ok(written)
    }
}

async fn write(dir: &Path, name: &str, bytes: Vec<u8>) -> Result<PathBuf> {
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| QapError::sink_io(e, &path))?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

fn csv_error(err: csv::Error) -> QapError {
    QapError::sink_with_code(ErrorCode::SINK_SERIALIZATION_ERROR, "cannot encode table", None)
        .with_source(err)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| csv_error(e.into_error().into()))
}

fn id_fields(record: &MetricRecord) -> [String; 4] {
    let id = &record.key.id;
    [
        id.subject.clone(),
        id.session.clone(),
        id.scan.clone(),
        record.site.clone().unwrap_or_default(),
    ]
}

/// One row per unit; a metric a unit did not report is left blank
fn metrics_csv(records: &[MetricRecord], columns: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let header = ID_COLUMNS.iter().map(|c| c.to_string()).chain(columns.iter().cloned());
    writer.write_record(header).map_err(csv_error)?;
    for record in records {
        let values = columns.iter().map(|c| {
            record
                .metrics
                .get(c)
                .map(|v| v.to_string())
                .unwrap_or_default()
        });
        let row = id_fields(record).into_iter().chain(values);
        writer.write_record(row).map_err(csv_error)?;
    }
    finish(writer)
}

fn failures_csv(table: &AggregateTable) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(ID_COLUMNS.iter().chain(&["Scan Type", "Failure", "Stage", "Message"]))
        .map_err(csv_error)?;
    for failure in &table.failures {
        let id = &failure.key.id;
        writer
            .write_record([
                id.subject.as_str(),
                id.session.as_str(),
                id.scan.as_str(),
                failure.site.as_deref().unwrap_or(""),
                failure.key.kind.as_str(),
                failure.kind.as_str(),
                failure.stage.map(|s| s.as_str()).unwrap_or(""),
                failure.message.as_str(),
            ])
            .map_err(csv_error)?;
    }
    finish(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{FailureKind, FailureRecord};
    use crate::pipeline::Stage;
    use crate::session::{AnalysisUnit, UnitId, UnitKey, Window};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn unit(kind: ScanKind, subject: &str) -> AnalysisUnit {
        AnalysisUnit {
            key: UnitKey {
                kind,
                id: UnitId::new(subject, "ses1", "scan_1"),
            },
            site: Some("site_a".into()),
            path: PathBuf::from("/x"),
            window: Window::default(),
            exclude_zeros: false,
        }
    }

    fn config(dir: &TempDir, flags: &str) -> RunConfig {
        RunConfig::from_yaml_str(&format!(
            "num_processors: 1\nnum_sessions_at_once: 1\navailable_memory: 1\n\
             cluster_system: None\noutput_directory: {}\nworking_directory: {}\n{}",
            dir.path().join("out").display(),
            dir.path().join("work").display(),
            flags
        ))
        .unwrap()
    }

    fn table() -> AggregateTable {
        AggregateTable {
            anatomical: vec![
                MetricRecord::new(
                    &unit(ScanKind::Anatomical, "sub1"),
                    BTreeMap::from([("snr".to_string(), 4.5), ("efc".to_string(), 0.25)]),
                ),
                MetricRecord::new(
                    &unit(ScanKind::Anatomical, "sub2"),
                    BTreeMap::from([("snr".to_string(), 3.0)]),
                ),
            ],
            functional: vec![],
            failures: vec![FailureRecord::new(
                &unit(ScanKind::Functional, "sub3"),
                FailureKind::RangeError,
                "start index 9 is beyond the scan length 4",
            )
            .at_stage(Stage::Trim)],
        }
    }

    #[tokio::test]
    async fn test_emit_writes_tables_per_kind() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        let written = OutputSink::with_defaults()
            .unwrap()
            .emit(&table(), &config)
            .await
            .unwrap();

        let out = dir.path().join("out");
        assert_eq!(written, vec![out.join("qap_anatomical.csv"), out.join(FAILURES_FILE)]);
        let anat = std::fs::read_to_string(out.join("qap_anatomical.csv")).unwrap();
        let lines: Vec<&str> = anat.lines().collect();
        assert_eq!(lines[0], "Participant,Session,Series,Site,efc,snr");
        assert_eq!(lines[1], "sub1,ses1,scan_1,site_a,0.25,4.5");
        assert_eq!(lines[2], "sub2,ses1,scan_1,site_a,,3");
        assert!(!out.join("qap_functional.csv").exists());

        let failures = std::fs::read_to_string(out.join(FAILURES_FILE)).unwrap();
        assert!(failures.contains("sub3,ses1,scan_1,site_a,functional,RangeError,trim,"));
    }

    #[tokio::test]
    async fn test_report_and_graph_follow_flags() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "write_report: true\nwrite_graph: true\n");
        OutputSink::with_defaults()
            .unwrap()
            .emit(&table(), &config)
            .await
            .unwrap();
        let out = dir.path().join("out");
        assert!(out.join("qap_report.html").exists());
        assert!(out.join("qap_execution_graph.dot").exists());
    }

    #[tokio::test]
    async fn test_empty_table_writes_nothing_but_directory() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        let written = OutputSink::with_defaults()
            .unwrap()
            .emit(&AggregateTable::default(), &config)
            .await
            .unwrap();
        assert!(written.is_empty());
        assert!(dir.path().join("out").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_output_is_sink_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let config = config(&dir, "");
        std::fs::create_dir_all(&config.output_directory).unwrap();
        std::fs::set_permissions(&config.output_directory, std::fs::Permissions::from_mode(0o500))
            .unwrap();
        // Root ignores directory permissions
        if std::fs::write(config.output_directory.join("write_check"), b"").is_ok() {
            return;
        }

        let err = OutputSink::with_defaults()
            .unwrap()
            .emit(&table(), &config)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(err.code(), ErrorCode::SINK_PERMISSION_DENIED);
    }
}
