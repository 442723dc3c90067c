//! Cross-tool data-flow inference.
//!
//! Terraform -> Helm artifact-flow edges are not declared anywhere in the
//! source document; they follow from combining dependency declarations with
//! tool detections. Only *direct* `needs`/`dependencies` references are
//! considered, never the transitive closure.

use std::collections::HashSet;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::detect::{terraform, JobDetections};
use crate::ids::IdProvider;
use crate::model::{Job, Pipeline};

use super::edges::{Edge, EdgeKind, EdgeMetadata};
use super::{job_node_id, EvidenceCategory, EvidenceEntry};

pub const FLOW_TERRAFORM_TO_HELM: &str = "terraform_to_helm";

static OUTPUT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:terraform|terragrunt)\s+output\b|\bTF_OUTPUT|\bTERRAFORM_OUTPUT").unwrap()
});

/// Infers Terraform -> Helm artifact-flow edges.
///
/// An edge exists iff a Helm-detected job directly references a
/// Terraform-detected job via `needs` or `dependencies`, and that Terraform
/// job either produces outputs in its script or declares a `terraform`
/// artifact report. Confidence: 95 with both signals, 85 with only the
/// script signal, 80 with only the report.
pub fn infer_terraform_to_helm(
    pipeline: &Pipeline,
    detections: &IndexMap<String, JobDetections>,
    ids: &mut dyn IdProvider,
    edges: &mut Vec<Edge>,
) {
    for consumer in pipeline.jobs.values() {
        if detections
            .get(&consumer.name)
            .and_then(|d| d.helm.as_ref())
            .is_none()
        {
            continue;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let direct_refs = consumer
            .needs
            .iter()
            .map(|need| need.job.as_str())
            .chain(consumer.dependencies.iter().map(String::as_str));

        for producer_name in direct_refs {
            if !seen.insert(producer_name) {
                continue;
            }
            if detections
                .get(producer_name)
                .and_then(|d| d.terraform.as_ref())
                .is_none()
            {
                continue;
            }
            let Some(producer) = pipeline.jobs.get(producer_name) else {
                continue;
            };

            let script_signal = terraform::has_output_signal(producer);
            let report_signal = producer
                .artifacts
                .as_ref()
                .is_some_and(|a| a.has_report("terraform"));

            let confidence = match (script_signal, report_signal) {
                (true, true) => 95,
                (true, false) => 85,
                (false, true) => 80,
                (false, false) => continue,
            };

            let mut evidence = Vec::new();
            if script_signal {
                evidence.push(EvidenceEntry::at(
                    &producer.span,
                    output_snippet(producer),
                    EvidenceCategory::ToolInvocation,
                ));
            }
            if report_signal {
                evidence.push(EvidenceEntry::at(
                    &producer.span,
                    "artifacts:\n  reports:\n    terraform".to_string(),
                    EvidenceCategory::ArtifactReference,
                ));
            }

            let mut metadata = EdgeMetadata {
                implicit: true,
                confidence,
                evidence,
                artifact_paths: None,
                flow_type: Some(FLOW_TERRAFORM_TO_HELM),
                optional: None,
            };
            if let Some(artifacts) = &producer.artifacts {
                if !artifacts.paths.is_empty() {
                    metadata.artifact_paths = Some(artifacts.paths.clone());
                }
            }

            edges.push(Edge {
                id: ids.next_id("artifact-flow"),
                source: job_node_id(producer_name),
                target: job_node_id(&consumer.name),
                kind: EdgeKind::ArtifactFlow,
                label: format!(
                    "terraform outputs flow from {} to {}",
                    producer_name, consumer.name
                ),
                metadata,
            });
        }
    }
}

/// First script line carrying the output signal, for evidence.
fn output_snippet(job: &Job) -> String {
    let text = job.full_script_text();
    text.lines()
        .find(|line| OUTPUT_LINE.is_match(line))
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "terraform output".to_string())
}
