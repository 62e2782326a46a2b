//! Execution plan graph
//!
//! Units are independent, so the plan is a fan-out from resolution to every
//! unit and a fan-in to aggregation.

use crate::aggregation::AggregateTable;
use crate::error::Result;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{Graph, NodeIndex};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Resolve,
    Unit { label: String, succeeded: bool },
    Aggregate,
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanNode::Resolve => f.write_str("resolve"),
            PlanNode::Unit { label, succeeded } => {
                write!(f, "{} ({})", label, if *succeeded { "done" } else { "failed" })
            }
            PlanNode::Aggregate => f.write_str("aggregate"),
        }
    }
}

pub struct ExecutionPlan {
    graph: Graph<PlanNode, ()>,
    resolve: NodeIndex,
    aggregate: NodeIndex,
}

impl ExecutionPlan {
    pub fn from_table(table: &AggregateTable) -> Self {
        let mut graph = Graph::new();
        let resolve = graph.add_node(PlanNode::Resolve);
        let aggregate = graph.add_node(PlanNode::Aggregate);
        let mut plan = Self {
            graph,
            resolve,
            aggregate,
        };

        let mut units: Vec<(String, bool)> = table
            .anatomical
            .iter()
            .chain(&table.functional)
            .map(|r| (r.key.to_string(), true))
            .chain(table.failures.iter().map(|f| (f.key.to_string(), false)))
            .collect();
        units.sort();
        for (label, succeeded) in units {
            plan.add_unit(label, succeeded);
        }
        plan
    }

    fn add_unit(&mut self, label: String, succeeded: bool) {
        let node = self.graph.add_node(PlanNode::Unit { label, succeeded });
        self.graph.add_edge(self.resolve, node, ());
        self.graph.add_edge(node, self.aggregate, ());
    }

    pub fn unit_count(&self) -> usize {
        self.graph.node_count() - 2
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn to_dot(&self) -> String {
        // Edge labels are disabled, so edges only need a displayable placeholder
        let graph = self.graph.map(|_, node| node, |_, _| "");
        format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

/// Renders the execution plan into a graph document
pub trait GraphRenderer: Send + Sync {
    /// File name of the graph inside the output directory
    fn file_name(&self) -> &str;

    fn render(&self, plan: &ExecutionPlan) -> Result<Vec<u8>>;
}

/// Graphviz DOT output
#[derive(Debug, Default)]
pub struct DotGraphRenderer;

impl GraphRenderer for DotGraphRenderer {
    fn file_name(&self) -> &str {
        "qap_execution_graph.dot"
    }

    fn render(&self, plan: &ExecutionPlan) -> Result<Vec<u8>> {
        Ok(plan.to_dot().into_bytes())
    }
}
