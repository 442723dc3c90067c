use indexmap::IndexMap;
use serde::Serialize;

use crate::detect::JobDetections;
use crate::model::{Pipeline, SourceSpan};

use super::{job_node_id, pipeline_node_id, stage_node_id};

/// Type tag plus the type-specific fields of a graph node.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Pipeline {
        file_path: String,
        stage_count: usize,
        job_count: usize,
    },
    Stage {
        order: usize,
        job_names: Vec<String>,
    },
    Job {
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        hidden: bool,
        has_terraform: bool,
        has_helm: bool,
        needs_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        when: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        allow_failure: Option<bool>,
    },
}

/// One graph node.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub location: SourceSpan,
    /// Free-form annotations for downstream consumers
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, serde_json::Value>,
}

/// One node per pipeline, stage, and job, in that order.
pub fn create_nodes(
    pipeline: &Pipeline,
    detections: &IndexMap<String, JobDetections>,
) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(1 + pipeline.stages.len() + pipeline.jobs.len());

    nodes.push(Node {
        id: pipeline_node_id(&pipeline.file_path),
        name: pipeline.file_path.clone(),
        kind: NodeKind::Pipeline {
            file_path: pipeline.file_path.clone(),
            stage_count: pipeline.stages.len(),
            job_count: pipeline.jobs.len(),
        },
        location: pipeline.span.clone(),
        metadata: IndexMap::new(),
    });

    for stage in &pipeline.stages {
        nodes.push(Node {
            id: stage_node_id(&stage.name),
            name: stage.name.clone(),
            kind: NodeKind::Stage {
                order: stage.order,
                job_names: stage.job_names.clone(),
            },
            location: pipeline.span.clone(),
            metadata: IndexMap::new(),
        });
    }

    for job in pipeline.jobs.values() {
        let detection = detections.get(&job.name);
        nodes.push(Node {
            id: job_node_id(&job.name),
            name: job.name.clone(),
            kind: NodeKind::Job {
                stage: job.stage.clone(),
                hidden: job.hidden,
                has_terraform: detection.is_some_and(|d| d.terraform.is_some()),
                has_helm: detection.is_some_and(|d| d.helm.is_some()),
                needs_count: job.needs.len(),
                when: job.when.clone(),
                allow_failure: job.allow_failure,
            },
            location: job.span.clone(),
            metadata: IndexMap::new(),
        });
    }

    nodes
}
