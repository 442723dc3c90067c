use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::detect::JobDetections;
use crate::ids::IdProvider;
use crate::model::{Job, Pipeline};

use super::{
    flow, include_node_id, job_node_id, pipeline_node_id, stage_node_id, template_node_id,
    EvidenceCategory, EvidenceEntry,
};

/// The eight edge categories of the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    StageOrder,
    Needs,
    /// Legacy `dependencies:` declarations
    #[serde(rename = "dependencies")]
    Dependency,
    Extends,
    ArtifactFlow,
    Includes,
    UsesTerraform,
    UsesHelm,
}

impl EdgeKind {
    fn id_tag(self) -> &'static str {
        match self {
            EdgeKind::StageOrder => "stage-order",
            EdgeKind::Needs => "needs",
            EdgeKind::Dependency => "dependencies",
            EdgeKind::Extends => "extends",
            EdgeKind::ArtifactFlow => "artifact-flow",
            EdgeKind::Includes => "includes",
            EdgeKind::UsesTerraform => "uses-terraform",
            EdgeKind::UsesHelm => "uses-helm",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeMetadata {
    /// True for edges inferred by the engine rather than declared in source
    pub implicit: bool,
    /// Integer percentage in [0, 100]
    pub confidence: u8,
    pub evidence: Vec<EvidenceEntry>,
    /// Artifact paths flowing along this edge, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl EdgeMetadata {
    fn declared(confidence: u8, evidence: Vec<EvidenceEntry>) -> Self {
        Self {
            implicit: false,
            confidence,
            evidence,
            artifact_paths: None,
            flow_type: None,
            optional: None,
        }
    }

    fn implicit(confidence: u8, evidence: Vec<EvidenceEntry>) -> Self {
        Self {
            implicit: true,
            ..Self::declared(confidence, evidence)
        }
    }
}

/// One typed, evidence-bearing edge.
#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub label: String,
    pub metadata: EdgeMetadata,
}

/// Builds every edge category for one pipeline.
///
/// `original_extends` carries each job's pre-resolution extends list, since
/// the extends resolver strips the field from merged jobs.
pub fn create_edges_for_pipeline(
    pipeline: &Pipeline,
    original_extends: &IndexMap<String, Vec<String>>,
    detections: &IndexMap<String, JobDetections>,
    ids: &mut dyn IdProvider,
) -> Vec<Edge> {
    let mut edges = Vec::new();

    stage_order_edges(pipeline, ids, &mut edges);
    needs_edges(pipeline, ids, &mut edges);
    dependency_edges(pipeline, ids, &mut edges);
    extends_edges(pipeline, original_extends, ids, &mut edges);
    artifact_flow_edges(pipeline, ids, &mut edges);
    include_edges(pipeline, ids, &mut edges);
    tool_edges(pipeline, detections, ids, &mut edges);
    flow::infer_terraform_to_helm(pipeline, detections, ids, &mut edges);

    edges
}

fn push_edge(
    edges: &mut Vec<Edge>,
    ids: &mut dyn IdProvider,
    source: String,
    target: String,
    kind: EdgeKind,
    label: String,
    metadata: EdgeMetadata,
) {
    edges.push(Edge {
        id: ids.next_id(kind.id_tag()),
        source,
        target,
        kind,
        label,
        metadata,
    });
}

/// stage[i-1] -> stage[i] for every consecutive pair; confidence 100,
/// implicit (the ordering is positional, not declared as an edge).
fn stage_order_edges(pipeline: &Pipeline, ids: &mut dyn IdProvider, edges: &mut Vec<Edge>) {
    for pair in pipeline.stages.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let evidence = vec![EvidenceEntry::at(
            &pipeline.span,
            format!("stages: {} -> {}", prev.name, next.name),
            EvidenceCategory::StageOrder,
        )];
        push_edge(
            edges,
            ids,
            stage_node_id(&prev.name),
            stage_node_id(&next.name),
            EdgeKind::StageOrder,
            format!("{} runs before {}", prev.name, next.name),
            EdgeMetadata::implicit(100, evidence),
        );
    }
}

/// Declared `needs` DAG edges, named job -> needing job.
fn needs_edges(pipeline: &Pipeline, ids: &mut dyn IdProvider, edges: &mut Vec<Edge>) {
    for job in pipeline.jobs.values() {
        for need in &job.needs {
            let evidence = vec![EvidenceEntry::at(
                &job.span,
                format!("needs:\n  - job: {}", need.job),
                EvidenceCategory::Declaration,
            )];
            let mut metadata = EdgeMetadata::declared(100, evidence);
            metadata.optional = need.optional;
            if need.wants_artifacts() {
                metadata.artifact_paths = artifact_paths_of(pipeline.jobs.get(&need.job));
            }
            push_edge(
                edges,
                ids,
                job_node_id(&need.job),
                job_node_id(&job.name),
                EdgeKind::Needs,
                format!("{} needs {}", job.name, need.job),
                metadata,
            );
        }
    }
}

/// Legacy `dependencies` edges, named job -> depending job.
fn dependency_edges(pipeline: &Pipeline, ids: &mut dyn IdProvider, edges: &mut Vec<Edge>) {
    for job in pipeline.jobs.values() {
        for dependency in &job.dependencies {
            let evidence = vec![EvidenceEntry::at(
                &job.span,
                format!("dependencies:\n  - {dependency}"),
                EvidenceCategory::Declaration,
            )];
            push_edge(
                edges,
                ids,
                job_node_id(dependency),
                job_node_id(&job.name),
                EdgeKind::Dependency,
                format!("{} depends on {}", job.name, dependency),
                EdgeMetadata::declared(100, evidence),
            );
        }
    }
}

/// Parent job -> child job. An unresolved parent becomes a synthetic
/// template reference at reduced confidence.
fn extends_edges(
    pipeline: &Pipeline,
    original_extends: &IndexMap<String, Vec<String>>,
    ids: &mut dyn IdProvider,
    edges: &mut Vec<Edge>,
) {
    for (name, parents) in original_extends {
        let Some(job) = pipeline.jobs.get(name) else {
            continue;
        };
        for parent in parents {
            let resolved = pipeline.jobs.contains_key(parent);
            let (source, confidence) = if resolved {
                (job_node_id(parent), 100)
            } else {
                (template_node_id(parent), 80)
            };
            let evidence = vec![EvidenceEntry::at(
                &job.span,
                format!("extends: {parent}"),
                EvidenceCategory::Declaration,
            )];
            push_edge(
                edges,
                ids,
                source,
                job_node_id(name),
                EdgeKind::Extends,
                format!("{name} extends {parent}"),
                EdgeMetadata::declared(confidence, evidence),
            );
        }
    }
}

/// Declared artifact flow: dependency job -> consuming job, only when the
/// dependency declares non-empty artifact paths and is named in
/// `dependencies` or in a `needs` entry that keeps artifacts enabled.
fn artifact_flow_edges(pipeline: &Pipeline, ids: &mut dyn IdProvider, edges: &mut Vec<Edge>) {
    for job in pipeline.jobs.values() {
        let mut seen: HashSet<&str> = HashSet::new();
        let providers = job
            .dependencies
            .iter()
            .map(String::as_str)
            .chain(
                job.needs
                    .iter()
                    .filter(|need| need.wants_artifacts())
                    .map(|need| need.job.as_str()),
            );

        for provider_name in providers {
            if !seen.insert(provider_name) {
                continue;
            }
            let Some(provider) = pipeline.jobs.get(provider_name) else {
                continue;
            };
            let Some(paths) = artifact_paths_of(Some(provider)) else {
                continue;
            };
            let evidence = vec![EvidenceEntry::at(
                &provider.span,
                format!("artifacts:\n  paths: [{}]", paths.join(", ")),
                EvidenceCategory::ArtifactReference,
            )];
            let mut metadata = EdgeMetadata::declared(100, evidence);
            metadata.artifact_paths = Some(paths);
            push_edge(
                edges,
                ids,
                job_node_id(provider_name),
                job_node_id(&job.name),
                EdgeKind::ArtifactFlow,
                format!("artifacts flow from {} to {}", provider_name, job.name),
                metadata,
            );
        }
    }
}

/// Pipeline -> synthetic include reference, one per directive.
fn include_edges(pipeline: &Pipeline, ids: &mut dyn IdProvider, edges: &mut Vec<Edge>) {
    for include in &pipeline.includes {
        let descriptor = include.descriptor();
        let span = include.span().cloned().unwrap_or_else(|| pipeline.span.clone());
        let evidence = vec![EvidenceEntry::at(
            &span,
            format!("include: {descriptor}"),
            EvidenceCategory::IncludeDirective,
        )];
        push_edge(
            edges,
            ids,
            pipeline_node_id(&pipeline.file_path),
            include_node_id(&descriptor),
            EdgeKind::Includes,
            format!("includes {descriptor}"),
            EdgeMetadata::declared(100, evidence),
        );
    }
}

/// Self-referential tool-usage edges at the detector's confidence. The tool
/// itself is external, not a graph node.
fn tool_edges(
    pipeline: &Pipeline,
    detections: &IndexMap<String, JobDetections>,
    ids: &mut dyn IdProvider,
    edges: &mut Vec<Edge>,
) {
    for job in pipeline.jobs.values() {
        let Some(detection) = detections.get(&job.name) else {
            continue;
        };

        if let Some(terraform) = &detection.terraform {
            let evidence = detection_evidence(job, &terraform.evidence);
            push_edge(
                edges,
                ids,
                job_node_id(&job.name),
                job_node_id(&job.name),
                EdgeKind::UsesTerraform,
                match &terraform.command {
                    Some(command) => format!("{} runs terraform {}", job.name, command),
                    None => format!("{} uses terraform", job.name),
                },
                EdgeMetadata::declared(terraform.confidence, evidence),
            );
        }

        if let Some(helm) = &detection.helm {
            let evidence = detection_evidence(job, &helm.evidence);
            push_edge(
                edges,
                ids,
                job_node_id(&job.name),
                job_node_id(&job.name),
                EdgeKind::UsesHelm,
                match &helm.command {
                    Some(command) => format!("{} runs helm {}", job.name, command),
                    None => format!("{} uses helm", job.name),
                },
                EdgeMetadata::declared(helm.confidence, evidence),
            );
        }
    }
}

fn detection_evidence(
    job: &Job,
    evidence: &[crate::detect::DetectionEvidence],
) -> Vec<EvidenceEntry> {
    evidence
        .iter()
        .map(|e| {
            // Script-relative lines are offset from the job's own span.
            let line = match (job.span.line, e.line) {
                (Some(base), Some(offset)) => Some(base + offset),
                (base, _) => base,
            };
            EvidenceEntry {
                file: job.span.file.clone(),
                line_start: line,
                line_end: line,
                snippet: e.snippet.clone(),
                category: EvidenceCategory::ToolInvocation,
            }
        })
        .collect()
}

fn artifact_paths_of(job: Option<&Job>) -> Option<Vec<String>> {
    let paths = &job?.artifacts.as_ref()?.paths;
    if paths.is_empty() {
        None
    } else {
        Some(paths.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserOptions;
    use crate::document::LineIndex;
    use crate::engine::extends::resolve_all_extends;
    use crate::ids::SequentialIds;
    use crate::model::builder::build_pipeline;

    /// Full pipeline fixture: build, resolve extends, detect, create edges.
    fn edges_from(yaml: &str) -> Vec<Edge> {
        let doc = crate::document::parse(yaml, false).unwrap();
        let index = LineIndex::new(yaml);
        let (mut pipeline, _) = build_pipeline(&doc, ".gitlab-ci.yml", &index).unwrap();

        let original_extends: IndexMap<String, Vec<String>> = pipeline
            .jobs
            .iter()
            .filter(|(_, job)| !job.extends.is_empty())
            .map(|(name, job)| (name.clone(), job.extends.clone()))
            .collect();

        pipeline.jobs = resolve_all_extends(&pipeline.jobs).resolved;

        let options = ParserOptions::default();
        let detections: IndexMap<String, JobDetections> = pipeline
            .jobs
            .iter()
            .map(|(name, job)| (name.clone(), crate::detect::detect_in_job(job, &options)))
            .filter(|(_, d)| !d.is_empty())
            .collect();

        let mut ids = SequentialIds::default();
        create_edges_for_pipeline(&pipeline, &original_extends, &detections, &mut ids)
    }

    fn of_kind(edges: &[Edge], kind: EdgeKind) -> Vec<&Edge> {
        edges.iter().filter(|e| e.kind == kind).collect()
    }

    #[test]
    fn test_stage_order_edges_for_consecutive_pairs() {
        let edges = edges_from("stages: [build, test, deploy]\n");
        let stage_edges = of_kind(&edges, EdgeKind::StageOrder);

        assert_eq!(stage_edges.len(), 2);
        assert_eq!(stage_edges[0].source, "stage:build");
        assert_eq!(stage_edges[0].target, "stage:test");
        assert_eq!(stage_edges[1].source, "stage:test");
        assert_eq!(stage_edges[1].target, "stage:deploy");
        for edge in stage_edges {
            assert_eq!(edge.metadata.confidence, 100);
            assert!(edge.metadata.implicit);
        }
    }

    #[test]
    fn test_needs_edge_artifacts_disabled_omits_paths() {
        let yaml = concat!(
            "build:\n  script: make\n  artifacts:\n    paths: [dist/]\n",
            "deploy:\n  script: ship\n  needs:\n    - job: build\n      artifacts: false\n",
        );
        let edges = edges_from(yaml);
        let needs = of_kind(&edges, EdgeKind::Needs);

        assert_eq!(needs.len(), 1);
        assert_eq!(needs[0].source, "job:build");
        assert_eq!(needs[0].target, "job:deploy");
        assert_eq!(needs[0].metadata.confidence, 100);
        assert!(!needs[0].metadata.implicit);
        assert!(needs[0].metadata.artifact_paths.is_none());

        // artifacts: false also suppresses the explicit artifact-flow edge.
        assert!(of_kind(&edges, EdgeKind::ArtifactFlow).is_empty());
    }

    #[test]
    fn test_needs_edge_with_artifacts_carries_paths() {
        let yaml = concat!(
            "build:\n  script: make\n  artifacts:\n    paths: [dist/]\n",
            "deploy:\n  script: ship\n  needs: [build]\n",
        );
        let edges = edges_from(yaml);
        let needs = of_kind(&edges, EdgeKind::Needs);

        assert_eq!(
            needs[0].metadata.artifact_paths,
            Some(vec!["dist/".to_string()])
        );

        let flows = of_kind(&edges, EdgeKind::ArtifactFlow);
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].source, "job:build");
        assert_eq!(flows[0].target, "job:deploy");
        assert_eq!(flows[0].metadata.confidence, 100);
    }

    #[test]
    fn test_dependency_edges_legacy_form() {
        let yaml = concat!(
            "build:\n  script: make\n",
            "test:\n  script: check\n  dependencies: [build]\n",
        );
        let edges = edges_from(yaml);
        let deps = of_kind(&edges, EdgeKind::Dependency);

        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].source, "job:build");
        assert_eq!(deps[0].target, "job:test");

        // The legacy category keeps its plural name on the wire.
        let json = serde_json::to_value(deps[0]).unwrap();
        assert_eq!(json["type"], "dependencies");
        assert!(deps[0].id.starts_with("edge-dependencies-"));
    }

    #[test]
    fn test_extends_edges_resolved_and_template_fallback() {
        let yaml = concat!(
            ".base:\n  stage: test\n",
            "app:\n  extends: [.base, .docker]\n  script: run\n",
        );
        let edges = edges_from(yaml);
        let extends = of_kind(&edges, EdgeKind::Extends);

        assert_eq!(extends.len(), 2);
        let base = extends.iter().find(|e| e.source == "job:.base").unwrap();
        assert_eq!(base.metadata.confidence, 100);
        assert_eq!(base.target, "job:app");

        let docker = extends
            .iter()
            .find(|e| e.source == "template:.docker")
            .unwrap();
        assert_eq!(docker.metadata.confidence, 80);
    }

    #[test]
    fn test_include_edges_point_at_synthetic_nodes() {
        let yaml = "include:\n  - local: ci/a.yml\n  - template: Terraform.gitlab-ci.yml\njob:\n  script: x\n";
        let edges = edges_from(yaml);
        let includes = of_kind(&edges, EdgeKind::Includes);

        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0].source, "pipeline:.gitlab-ci.yml");
        assert_eq!(includes[0].target, "include:ci/a.yml");
        assert_eq!(
            includes[1].target,
            "include:template:Terraform.gitlab-ci.yml"
        );
    }

    #[test]
    fn test_tool_edges_are_self_referential_with_detector_confidence() {
        let yaml = "infra:\n  script:\n    - terraform init\n    - terraform apply\n";
        let edges = edges_from(yaml);
        let tf = of_kind(&edges, EdgeKind::UsesTerraform);

        assert_eq!(tf.len(), 1);
        assert_eq!(tf[0].source, "job:infra");
        assert_eq!(tf[0].target, "job:infra");
        assert_eq!(tf[0].metadata.confidence, 80);
        assert!(tf[0].label.contains("terraform apply"));
        assert!(!tf[0].metadata.evidence.is_empty());
    }

    #[test]
    fn test_every_edge_has_evidence_and_bounded_confidence() {
        let yaml = concat!(
            "stages: [build, deploy]\n",
            "include: ci/a.yml\n",
            ".tf-base:\n  stage: build\n",
            "infra:\n  extends: .tf-base\n  script:\n    - terraform apply\n    - terraform output\n",
            "  artifacts:\n    paths: [tf.out]\n",
            "release:\n  stage: deploy\n  needs: [infra]\n  script: helm upgrade --install app ./chart\n",
        );
        let edges = edges_from(yaml);

        assert!(!edges.is_empty());
        for edge in &edges {
            assert!(edge.metadata.confidence <= 100, "edge {}", edge.id);
            assert!(!edge.metadata.evidence.is_empty(), "edge {}", edge.id);
        }
    }

    #[test]
    fn test_edge_ids_are_unique() {
        let yaml = concat!(
            "stages: [build, test, deploy]\n",
            "a:\n  script: x\n  artifacts:\n    paths: [out/]\n",
            "b:\n  script: y\n  needs: [a]\n  dependencies: [a]\n",
        );
        let edges = edges_from(yaml);
        let mut ids: Vec<_> = edges.iter().map(|e| e.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), edges.len());
    }
}
