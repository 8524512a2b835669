//! Renderings of a computed dependency graph.
//!
//! The JSON form is stable and intended for tooling; the dot form can be fed
//! to graphviz.

use std::fmt::Write as _;
use std::str::FromStr;

use serde::Serialize;

use crate::core::chain::{ChainBuilder, StepHandle};
use crate::core::item::ItemType;
use crate::resolver::graph::{DependencyGraph, EdgeKind, EdgeReason};

/// Output format for a graph dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpFormat {
    #[default]
    Text,
    Json,
    Dot,
}

impl FromStr for DumpFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(DumpFormat::Text),
            "json" => Ok(DumpFormat::Json),
            "dot" | "graphviz" => Ok(DumpFormat::Dot),
            _ => Err(format!(
                "invalid graph format '{}'; expected 'text', 'json', or 'dot'",
                s
            )),
        }
    }
}

/// Serializable snapshot of a graph together with its step declarations.
#[derive(Debug, Clone, Serialize)]
pub struct GraphDump {
    pub fingerprint: String,
    pub finals: Vec<String>,
    pub items: Vec<ItemType>,
    pub stages: Vec<StageDump>,
    pub edges: Vec<EdgeDump>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageDump {
    pub index: usize,
    pub steps: Vec<StepDump>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepDump {
    pub name: String,
    pub produces: Vec<String>,
    pub consumes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeDump {
    pub from: String,
    pub to: String,
    pub items: Vec<EdgeReason>,
}

impl GraphDump {
    /// Capture `graph`, looking up step declarations in `chain`.
    pub fn new(chain: &ChainBuilder, graph: &DependencyGraph) -> Self {
        let name = |h: StepHandle| graph.step_name(h).unwrap_or_default().to_string();

        let stages = graph
            .stages()
            .iter()
            .map(|stage| StageDump {
                index: stage.index(),
                steps: stage
                    .steps()
                    .iter()
                    .filter_map(|h| chain.step(*h))
                    .map(|step| StepDump {
                        name: step.name().to_string(),
                        produces: step.produces().iter().map(|p| p.item.to_string()).collect(),
                        consumes: step
                            .consumes()
                            .iter()
                            .map(|c| {
                                let mut label = c.item.to_string();
                                if !c.is_required() {
                                    label.push('?');
                                }
                                if c.is_destructive() {
                                    label.push('!');
                                }
                                label
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();

        let edges = graph
            .edges()
            .into_iter()
            .map(|e| EdgeDump {
                from: name(e.from),
                to: name(e.to),
                items: e.reasons,
            })
            .collect();

        GraphDump {
            fingerprint: graph.fingerprint(),
            finals: graph.finals().iter().map(|f| f.to_string()).collect(),
            items: chain.items().iter().collect(),
            stages,
            edges,
        }
    }

    /// Render in the requested format.
    pub fn render(&self, format: DumpFormat) -> String {
        match format {
            DumpFormat::Text => self.to_text(),
            DumpFormat::Json => self.to_json(),
            DumpFormat::Dot => self.to_dot(),
        }
    }

    /// Human-readable stage listing.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for stage in &self.stages {
            let _ = writeln!(out, "stage {}:", stage.index);
            for step in &stage.steps {
                let _ = write!(out, "  {}", step.name);
                if !step.consumes.is_empty() {
                    let _ = write!(out, " <- {}", step.consumes.join(", "));
                }
                if !step.produces.is_empty() {
                    let _ = write!(out, " -> {}", step.produces.join(", "));
                }
                out.push('\n');
            }
        }
        let _ = writeln!(out, "fingerprint: {}", self.fingerprint);
        out
    }

    /// Pretty JSON document.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Graphviz digraph with one cluster per stage.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph buildchain {\n    rankdir=LR;\n    node [shape=box];\n");
        for stage in &self.stages {
            let _ = writeln!(out, "    subgraph cluster_{} {{", stage.index);
            let _ = writeln!(out, "        label=\"stage {}\";", stage.index);
            for step in &stage.steps {
                let _ = writeln!(out, "        {};", quote(&step.name));
            }
            out.push_str("    }\n");
        }
        for edge in &self.edges {
            let label: Vec<&str> = edge.items.iter().map(|r| r.item.as_str()).collect();
            let style = if edge
                .items
                .iter()
                .all(|r| r.kind == EdgeKind::ReadBeforeDestroy)
            {
                ", style=dashed"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "    {} -> {} [label={}{}];",
                quote(&edge.from),
                quote(&edge.to),
                quote(&label.join(", ")),
                style
            );
        }
        out.push_str("}\n");
        out
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
