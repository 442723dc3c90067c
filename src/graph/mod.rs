//! Graph factory.
//!
//! Projects the resolved pipeline model, extends relationships, and tool
//! detections into nodes and typed, evidence-bearing edges.

pub mod edges;
pub mod flow;
pub mod nodes;

use serde::Serialize;

use crate::model::SourceSpan;

pub use edges::{Edge, EdgeKind, EdgeMetadata};
pub use nodes::{Node, NodeKind};

/// What kind of source text an evidence entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceCategory {
    Declaration,
    ToolInvocation,
    ArtifactReference,
    IncludeDirective,
    StageOrder,
}

/// A located text snippet justifying a detection or an edge.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceEntry {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    pub snippet: String,
    pub category: EvidenceCategory,
}

impl EvidenceEntry {
    pub fn at(span: &SourceSpan, snippet: impl Into<String>, category: EvidenceCategory) -> Self {
        Self {
            file: span.file.clone(),
            line_start: span.line,
            line_end: span.line,
            snippet: snippet.into(),
            category,
        }
    }
}

/// Node id helpers shared by node and edge construction.
pub(crate) fn pipeline_node_id(file_path: &str) -> String {
    format!("pipeline:{file_path}")
}

pub(crate) fn stage_node_id(name: &str) -> String {
    format!("stage:{name}")
}

pub(crate) fn job_node_id(name: &str) -> String {
    format!("job:{name}")
}

pub(crate) fn template_node_id(name: &str) -> String {
    format!("template:{name}")
}

pub(crate) fn include_node_id(descriptor: &str) -> String {
    format!("include:{descriptor}")
}
