//! Output sink and external renderers

pub mod graph;
pub mod report;
pub mod sink;

pub use graph::{DotGraphRenderer, ExecutionPlan, GraphRenderer, PlanNode};
pub use report::{HtmlReportGenerator, ReportGenerator};
pub use sink::{table_file_name, OutputSink, FAILURES_FILE};
