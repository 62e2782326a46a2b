//! HTML run report

use crate::aggregation::AggregateTable;
use crate::config::RunConfig;
use crate::error::{ErrorCode, QapError, Result};
use crate::session::ScanKind;
use async_trait::async_trait;
use serde::Serialize;
use tera::{Context, Tera};

/// Renders the final table into a report document
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// File name of the report inside the output directory
    fn file_name(&self) -> &str;

    async fn render(&self, table: &AggregateTable, config: &RunConfig) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct KindSection {
    name: &'static str,
    columns: Vec<String>,
    rows: Vec<ReportRow>,
}

#[derive(Debug, Serialize)]
struct ReportRow {
    unit: String,
    site: String,
    values: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FailureRow {
    unit: String,
    kind: String,
    stage: String,
    message: String,
}

fn sections(table: &AggregateTable) -> Vec<KindSection> {
    ScanKind::ALL
        .iter()
        .filter(|kind| !table.records(**kind).is_empty())
        .map(|kind| {
            let columns = table.metric_names(*kind);
            let rows = table
                .records(*kind)
                .iter()
                .map(|record| ReportRow {
                    unit: record.key.id.to_string(),
                    site: record.site.clone().unwrap_or_default(),
                    values: columns
                        .iter()
                        .map(|c| record.metrics.get(c).map(|v| format!("{:.4}", v)).unwrap_or_default())
                        .collect(),
                })
                .collect();
            KindSection {
                name: kind.as_str(),
                columns,
                rows,
            }
        })
        .collect()
}

/// Built-in single page HTML report
pub struct HtmlReportGenerator {
    engine: Tera,
}

impl HtmlReportGenerator {
    pub fn new() -> Result<Self> {
        let mut engine = Tera::default();
        engine
            .add_raw_template("qap_report.html", REPORT_TEMPLATE)
            .map_err(render_error)?;
        Ok(Self { engine })
    }
}

fn render_error(err: tera::Error) -> QapError {
    QapError::sink_with_code(ErrorCode::SINK_RENDER_ERROR, "cannot render report", None)
        .with_source(err)
}

#[async_trait]
impl ReportGenerator for HtmlReportGenerator {
    fn file_name(&self) -> &str {
        "qap_report.html"
    }

    async fn render(&self, table: &AggregateTable, config: &RunConfig) -> Result<Vec<u8>> {
        let failures: Vec<FailureRow> = table
            .failures
            .iter()
            .map(|f| FailureRow {
                unit: f.key.to_string(),
                kind: f.kind.to_string(),
                stage: f.stage.map(|s| s.to_string()).unwrap_or_default(),
                message: f.message.clone(),
            })
            .collect();

        let mut context = Context::new();
        context.insert("run_name", &config.run_name);
        context.insert(
            "generated_at",
            &chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        );
        context.insert("total_records", &table.total_records());
        context.insert("sections", &sections(table));
        context.insert("failures", &failures);

        let html = self
            .engine
            .render("qap_report.html", &context)
            .map_err(render_error)?;
        Ok(html.into_bytes())
    }
}

const REPORT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>QAP report: {{ run_name }}</title>
<style>
body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; margin-bottom: 2em; }
th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: right; }
th:first-child, td:first-child, td.site { text-align: left; }
.failure td { text-align: left; color: #a00; }
</style>
</head>
<body>
<h1>QAP report: {{ run_name }}</h1>
<p>Generated {{ generated_at }}. {{ total_records }} unit(s) scored, {{ failures | length }} failed.</p>
{% for section in sections %}
<h2>{{ section.name | capitalize }} scans</h2>
<table>
<tr><th>Unit</th><th>Site</th>{% for column in section.columns %}<th>{{ column }}</th>{% endfor %}</tr>
{% for row in section.rows %}<tr><td>{{ row.unit }}</td><td class="site">{{ row.site }}</td>{% for value in row.values %}<td>{{ value }}</td>{% endfor %}</tr>
{% endfor %}</table>
{% endfor %}
{% if failures %}
<h2>Failures</h2>
<table class="failure">
<tr><th>Unit</th><th>Kind</th><th>Stage</th><th>Message</th></tr>
{% for f in failures %}<tr class="failure"><td>{{ f.unit }}</td><td>{{ f.kind }}</td><td>{{ f.stage }}</td><td>{{ f.message }}</td></tr>
{% endfor %}</table>
{% endif %}
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{FailureKind, FailureRecord, MetricRecord};
    use crate::session::{AnalysisUnit, UnitId, UnitKey, Window};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

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

    #[tokio::test]
    async fn test_report_lists_records_and_failures() {
        let table = AggregateTable {
            anatomical: vec![MetricRecord::new(
                &unit(ScanKind::Anatomical, "sub1"),
                BTreeMap::from([("snr".to_string(), 12.5)]),
            )],
            functional: vec![],
            failures: vec![FailureRecord::new(
                &unit(ScanKind::Anatomical, "sub2"),
                FailureKind::InputError,
                "cannot access <scan>",
            )],
        };
        let config: RunConfig = RunConfig::from_yaml_str(
            "num_processors: 1\nnum_sessions_at_once: 1\navailable_memory: 1\n\
             cluster_system: None\noutput_directory: /o\nworking_directory: /w\nrun_name: pilot\n",
        )
        .unwrap();

        let html = HtmlReportGenerator::new()
            .unwrap()
            .render(&table, &config)
            .await
            .unwrap();
        let html = String::from_utf8(html).unwrap();

        assert!(html.contains("QAP report: pilot"));
        assert!(html.contains("Anatomical scans"));
        assert!(!html.contains("Functional scans"));
        assert!(html.contains("12.5000"));
        assert!(html.contains("InputError"));
        // Messages are escaped
        assert!(html.contains("&lt;scan&gt;"));
    }
}
