//! Parse orchestration.
//!
//! Straight pipeline: loader -> model builder -> include resolution ->
//! extends resolution -> tool detection -> graph factory. Diagnostics
//! accumulate append-only; no stage calls back into an earlier one.

use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Serialize;
use serde_yaml::Value;

use crate::adapters::{
    FileSystem, GitLabRegistryApi, HttpFetcher, LocalFileSystem, RegistryApi, ReqwestFetcher,
};
use crate::config::ParserOptions;
use crate::detect::{detect_in_job, JobDetections};
use crate::document::{self, LineIndex};
use crate::engine::extends::resolve_all_extends;
use crate::engine::includes::{deep_merge, IncludeResolver};
use crate::error::Result;
use crate::graph::{edges::create_edges_for_pipeline, nodes::create_nodes, Edge, Node};
use crate::ids::{Clock, SequentialIds, SystemClock};
use crate::model::{
    codes, CircularDependency, Diagnostic, FailedInclude, Include, Pipeline, ResolvedInclude,
    SourceSpan,
};

/// Per-include resolution outcomes reported to the caller.
#[derive(Debug, Default, Serialize)]
pub struct IncludeReport {
    pub resolved: Vec<ResolvedInclude>,
    pub failed: Vec<FailedInclude>,
}

/// Everything one parse call produces.
#[derive(Debug, Serialize)]
pub struct ParseResult {
    /// True iff no error-severity diagnostic was recorded
    pub success: bool,
    pub parsed_at: DateTime<Utc>,
    /// Absent only on fatal failure (or when recovery is disabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Pipeline>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub detections: IndexMap<String, JobDetections>,
    pub includes: IncludeReport,
    pub circular: Vec<CircularDependency>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ParseResult {
    fn fatal(parsed_at: DateTime<Utc>, diagnostic: Diagnostic) -> Self {
        Self {
            success: false,
            parsed_at,
            pipeline: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            detections: IndexMap::new(),
            includes: IncludeReport::default(),
            circular: Vec::new(),
            errors: vec![diagnostic],
            warnings: Vec::new(),
        }
    }
}

/// GitLab CI configuration parser.
///
/// Owns the parser options and the external capability adapters. One
/// instance can parse many documents; the include content cache is scoped
/// to a single parse call.
pub struct GitLabParser {
    options: ParserOptions,
    fs: Box<dyn FileSystem>,
    http: Box<dyn HttpFetcher>,
    api: Box<dyn RegistryApi>,
    clock: Box<dyn Clock>,
}

impl GitLabParser {
    /// Creates a parser with production adapters.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be constructed.
    pub fn new(options: ParserOptions, gitlab_url: &str, token: Option<String>) -> Result<Self> {
        let http = ReqwestFetcher::new(Some(options.remote_timeout_secs))?;
        let api = GitLabRegistryApi::new(gitlab_url, token)?;
        Ok(Self {
            options,
            fs: Box::new(LocalFileSystem),
            http: Box::new(http),
            api: Box::new(api),
            clock: Box::new(SystemClock),
        })
    }

    /// Creates a parser with caller-supplied adapters (used by tests).
    pub fn with_adapters(
        options: ParserOptions,
        fs: Box<dyn FileSystem>,
        http: Box<dyn HttpFetcher>,
        api: Box<dyn RegistryApi>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            options,
            fs,
            http,
            api,
            clock,
        }
    }

    /// Reads and parses a CI configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file itself cannot be read; parse
    /// problems are reported through the result's diagnostics.
    pub async fn parse_file(&self, path: &Path) -> Result<ParseResult> {
        let absolute = self.fs.absolute_path(path);
        let text = self.fs.read_file(&absolute).await?;
        Ok(self.parse(&text, &absolute.to_string_lossy()).await)
    }

    /// Parses CI configuration text as if located at `file_path`.
    pub async fn parse(&self, text: &str, file_path: &str) -> ParseResult {
        info!("Parsing CI configuration: {file_path}");
        let parsed_at = self.clock.now();
        let root_span = SourceSpan::new(file_path, Some(1));

        let doc = match document::parse(text, self.options.strict_yaml) {
            Ok(doc) => doc,
            Err(err) => {
                let (line, column) = document::error_location(&err);
                let mut diagnostic =
                    Diagnostic::error(codes::YAML_SYNTAX, err.to_string(), &root_span);
                diagnostic.line = line;
                diagnostic.column = column;
                return ParseResult::fatal(parsed_at, diagnostic);
            }
        };

        let index = LineIndex::new(text);
        let (mut pipeline, mut warnings) =
            match crate::model::builder::build_pipeline(&doc, file_path, &index) {
                Ok(built) => built,
                Err(err) => {
                    return ParseResult::fatal(
                        parsed_at,
                        Diagnostic::error(codes::INVALID_DOCUMENT, err.to_string(), &root_span),
                    );
                }
            };

        let mut errors = Vec::new();
        let mut circular = Vec::new();

        // Include resolution.
        let mut resolver = IncludeResolver::new(
            &self.options,
            self.fs.as_ref(),
            self.http.as_ref(),
            self.api.as_ref(),
            Path::new(file_path),
        );
        let include_result = resolver.resolve_all(&pipeline.includes).await;

        for failed in &include_result.failed {
            errors.push(Diagnostic::error(
                failed.code,
                format!("{}: {}", failed.attempted_path, failed.error),
                failed.include.span().unwrap_or(&root_span),
            ));
        }
        for skipped in include_result.resolved.iter().filter(|r| r.error.is_some()) {
            let code = match &skipped.include {
                Include::Project { .. } => codes::PROJECT_RESOLUTION_DISABLED,
                _ => codes::REMOTE_RESOLUTION_DISABLED,
            };
            warnings.push(Diagnostic::warning(
                code,
                format!(
                    "{}: {}",
                    skipped.resolved_path,
                    skipped.error.as_deref().unwrap_or_default()
                ),
                skipped.include.span().unwrap_or(&root_span),
            ));
        }
        for cycle in &include_result.circular {
            errors.push(Diagnostic::error(
                codes::CIRCULAR_INCLUDE,
                format!(
                    "CIRCULAR include detected: {} -> {}",
                    cycle.chain.join(" -> "),
                    cycle.path
                ),
                &root_span,
            ));
            circular.push(cycle.clone());
        }

        // Overlay included content under the root document (the root wins on
        // conflict) and rebuild the model so included jobs and stages join it.
        if !include_result.merged.is_empty() {
            let mut combined = include_result.merged.clone();
            if let Some(root_mapping) = doc.as_mapping() {
                deep_merge(&mut combined, root_mapping);
            }
            let combined_doc = Value::Mapping(combined);
            if let Ok((mut rebuilt, rebuilt_warnings)) =
                crate::model::builder::build_pipeline(&combined_doc, file_path, &index)
            {
                rebuilt.includes = pipeline.includes.clone();
                pipeline = rebuilt;
                warnings = rebuilt_warnings;
            }
        }

        // Extends resolution. The pre-resolution extends lists feed the
        // graph's extends edges.
        let original_extends: IndexMap<String, Vec<String>> = pipeline
            .jobs
            .iter()
            .filter(|(_, job)| !job.extends.is_empty())
            .map(|(name, job)| (name.clone(), job.extends.clone()))
            .collect();

        if self.options.resolve_extends {
            let extends_result = resolve_all_extends(&pipeline.jobs);
            for cycle in &extends_result.circular {
                errors.push(Diagnostic::error(
                    codes::CIRCULAR_EXTENDS,
                    format!(
                        "Circular extends chain at job '{}': {}",
                        cycle.path,
                        cycle.chain.join(" -> ")
                    ),
                    pipeline
                        .jobs
                        .get(&cycle.path)
                        .map(|job| &job.span)
                        .unwrap_or(&root_span),
                ));
                circular.push(cycle.clone());
            }
            pipeline.jobs = extends_result.resolved;

            // Inherited stages can change membership, so stage assignment and
            // the unknown-stage check rerun over the merged jobs.
            warnings.retain(|w| w.code != codes::UNKNOWN_STAGE);
            warnings.extend(crate::model::builder::assign_stage_jobs(
                &mut pipeline.stages,
                &pipeline.jobs,
            ));
        }

        // Tool detection over the resolved jobs.
        let detections: IndexMap<String, JobDetections> = pipeline
            .jobs
            .values()
            .map(|job| (job.name.clone(), detect_in_job(job, &self.options)))
            .filter(|(_, detection)| !detection.is_empty())
            .collect();
        debug!("Tool detections: {} jobs flagged", detections.len());

        // Graph projection.
        let mut ids = SequentialIds::default();
        let nodes = create_nodes(&pipeline, &detections);
        let edges = create_edges_for_pipeline(&pipeline, &original_extends, &detections, &mut ids);

        let success = errors.is_empty();
        if !success && !self.options.error_recovery {
            warn!("Parse failed and error recovery is disabled: {file_path}");
            let mut result = ParseResult::fatal(parsed_at, errors.remove(0));
            result.errors.extend(errors);
            result.warnings = warnings;
            return result;
        }

        info!(
            "Parse finished: {} nodes, {} edges, {} errors, {} warnings",
            nodes.len(),
            edges.len(),
            errors.len(),
            warnings.len()
        );

        ParseResult {
            success,
            parsed_at,
            pipeline: Some(pipeline),
            nodes,
            edges,
            detections,
            includes: IncludeReport {
                resolved: include_result.resolved,
                failed: include_result.failed,
            },
            circular,
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockFileSystem, MockHttpFetcher, MockRegistryApi};
    use crate::graph::{EdgeKind, NodeKind};
    use crate::ids::FixedClock;
    use crate::model::CycleKind;

    fn parser_with_fs(options: ParserOptions, fs: MockFileSystem) -> GitLabParser {
        GitLabParser::with_adapters(
            options,
            Box::new(fs),
            Box::new(MockHttpFetcher::new()),
            Box::new(MockRegistryApi::new()),
            Box::new(FixedClock(chrono::Utc::now())),
        )
    }

    fn parser() -> GitLabParser {
        parser_with_fs(ParserOptions::default(), MockFileSystem::new())
    }

    async fn parse(yaml: &str) -> ParseResult {
        parser().parse(yaml, "/repo/.gitlab-ci.yml").await
    }

    fn edges_of(result: &ParseResult, kind: EdgeKind) -> Vec<&Edge> {
        result.edges.iter().filter(|e| e.kind == kind).collect()
    }

    #[tokio::test]
    async fn test_stage_sequence_yields_two_order_edges() {
        let result = parse("stages: [build, test, deploy]\n").await;

        assert!(result.success);
        let order = edges_of(&result, EdgeKind::StageOrder);
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].source, "stage:build");
        assert_eq!(order[0].target, "stage:test");
        assert_eq!(order[1].source, "stage:test");
        assert_eq!(order[1].target, "stage:deploy");
        assert!(order.iter().all(|e| e.metadata.confidence == 100));
        assert!(order.iter().all(|e| e.metadata.implicit));
    }

    #[tokio::test]
    async fn test_needs_without_artifacts_has_no_paths() {
        let yaml = concat!(
            "build:\n  script: make\n  artifacts:\n    paths: [dist/]\n",
            "deploy:\n  script: ship\n  needs:\n    - job: build\n      artifacts: false\n",
        );
        let result = parse(yaml).await;

        let needs = edges_of(&result, EdgeKind::Needs);
        assert_eq!(needs.len(), 1);
        assert_eq!(needs[0].source, "job:build");
        assert_eq!(needs[0].target, "job:deploy");
        assert_eq!(needs[0].metadata.confidence, 100);
        assert!(needs[0].metadata.artifact_paths.is_none());
    }

    #[tokio::test]
    async fn test_extends_with_undefined_parent_uses_template_reference() {
        let yaml = concat!(
            ".base:\n  stage: test\n",
            "app:\n  extends: [.base, .docker]\n  script: run\n",
        );
        let result = parse(yaml).await;

        let extends = edges_of(&result, EdgeKind::Extends);
        assert_eq!(extends.len(), 2);
        let base = extends.iter().find(|e| e.source == "job:.base").unwrap();
        assert_eq!(base.metadata.confidence, 100);
        let docker = extends
            .iter()
            .find(|e| e.source == "template:.docker")
            .unwrap();
        assert_eq!(docker.metadata.confidence, 80);
    }

    #[tokio::test]
    async fn test_extends_cycle_degrades_job_and_keeps_others() {
        let yaml = concat!(
            "a:\n  extends: b\n  script: run-a\n",
            "b:\n  extends: a\n  script: run-b\n",
            "d:\n  script: run-d\n",
        );
        let result = parse(yaml).await;

        // The cyclic jobs keep their original form; the unrelated job is fine.
        let pipeline = result.pipeline.as_ref().unwrap();
        assert_eq!(pipeline.jobs["a"].extends, vec!["b"]);
        assert!(pipeline.jobs["d"].extends.is_empty());

        assert!(!result.success);
        assert!(result
            .errors
            .iter()
            .any(|e| e.code == codes::CIRCULAR_EXTENDS));
        assert!(result
            .circular
            .iter()
            .any(|c| c.kind == CycleKind::Extends));
        // Recovery keeps the graph populated.
        assert!(!result.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_stage_inherited_through_extends_joins_membership() {
        let yaml = concat!(
            "stages: [build, deploy]\n",
            ".base:\n  stage: deploy\n",
            "app:\n  extends: .base\n  script: ship\n",
        );
        let result = parse(yaml).await;

        assert!(result.success);
        let pipeline = result.pipeline.as_ref().unwrap();
        assert_eq!(pipeline.jobs["app"].stage.as_deref(), Some("deploy"));

        // Membership reflects the post-extends stage, hidden template excluded.
        let deploy = pipeline.stages.iter().find(|s| s.name == "deploy").unwrap();
        assert_eq!(deploy.job_names, vec!["app"]);
        let build = pipeline.stages.iter().find(|s| s.name == "build").unwrap();
        assert!(build.job_names.is_empty());

        let node = result.nodes.iter().find(|n| n.id == "stage:deploy").unwrap();
        assert!(matches!(
            &node.kind,
            NodeKind::Stage { job_names, .. } if job_names == &vec!["app".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_unknown_stage_warning_not_duplicated_by_recompute() {
        let yaml = concat!(
            "stages: [build]\n",
            ".base:\n  stage: missing\n",
            "direct:\n  stage: missing\n  script: x\n",
            "inherited:\n  extends: .base\n  script: y\n",
        );
        let result = parse(yaml).await;

        // One warning per job referencing the bad stage after the merge:
        // the hidden template, the direct reference, and the inheritor.
        let unknown: Vec<_> = result
            .warnings
            .iter()
            .filter(|w| w.code == codes::UNKNOWN_STAGE)
            .collect();
        assert_eq!(unknown.len(), 3);
        assert!(unknown
            .iter()
            .any(|w| w.message.contains("'inherited'")));
    }

    #[tokio::test]
    async fn test_terraform_to_helm_flow_inference() {
        let yaml = concat!(
            "infra:\n  script:\n    - terraform apply\n    - terraform output -json > tf.json\n",
            "release:\n  needs: [infra]\n  script: helm upgrade --install app ./chart\n",
        );
        let result = parse(yaml).await;

        let flows = edges_of(&result, EdgeKind::ArtifactFlow);
        let inferred: Vec<_> = flows
            .iter()
            .filter(|e| e.metadata.flow_type.is_some())
            .collect();
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].source, "job:infra");
        assert_eq!(inferred[0].target, "job:release");
        assert_eq!(inferred[0].metadata.confidence, 85);
        assert_eq!(inferred[0].metadata.flow_type, Some("terraform_to_helm"));
        assert!(inferred[0].metadata.implicit);

        assert!(result.detections["infra"].terraform.is_some());
        assert!(result.detections["release"].helm.is_some());
    }

    #[tokio::test]
    async fn test_missing_include_is_recorded_and_parse_continues() {
        let yaml = "include:\n  - local: missing.yml\njob:\n  script: make\n";
        let result = parse(yaml).await;

        assert_eq!(result.includes.failed.len(), 1);
        assert_eq!(
            result.includes.failed[0].code,
            codes::INCLUDE_RESOLUTION_FAILED
        );
        assert!(result.includes.resolved.is_empty());
        // Parse still produced the model and graph.
        assert!(result.pipeline.is_some());
        assert!(!result.nodes.is_empty());
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_included_jobs_join_model_but_root_wins() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "/repo/ci/common.yml",
            "common-job:\n  script: from-include\nroot-job:\n  script: from-include\n",
        );
        let parser = parser_with_fs(ParserOptions::default(), fs);

        let yaml = "include: ci/common.yml\nroot-job:\n  script: from-root\n";
        let result = parser.parse(yaml, "/repo/.gitlab-ci.yml").await;

        assert!(result.success);
        let pipeline = result.pipeline.as_ref().unwrap();
        assert_eq!(pipeline.jobs["common-job"].script, vec!["from-include"]);
        assert_eq!(pipeline.jobs["root-job"].script, vec!["from-root"]);
        assert_eq!(result.includes.resolved.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_include_disabled_is_warning_not_error() {
        let yaml = "include:\n  - remote: https://example.com/ci.yml\njob:\n  script: make\n";
        let result = parse(yaml).await;

        assert!(result.success);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.code == codes::REMOTE_RESOLUTION_DISABLED));
        assert_eq!(result.includes.resolved.len(), 1);
        assert!(result.includes.resolved[0].content.is_none());
    }

    #[tokio::test]
    async fn test_component_include_always_fails() {
        let yaml = "include:\n  - component: gitlab.com/comp/x@1\njob:\n  script: make\n";
        let result = parse(yaml).await;

        assert!(result
            .errors
            .iter()
            .any(|e| e.code == codes::COMPONENT_UNSUPPORTED));
    }

    #[tokio::test]
    async fn test_fatal_on_non_mapping_root() {
        let result = parse("- just\n- a\n- sequence\n").await;

        assert!(!result.success);
        assert!(result.pipeline.is_none());
        assert!(result.nodes.is_empty());
        assert_eq!(result.errors[0].code, codes::INVALID_DOCUMENT);
    }

    #[tokio::test]
    async fn test_fatal_on_syntax_error_carries_location() {
        let result = parse("job:\n  script: [unclosed\n").await;

        assert!(!result.success);
        assert_eq!(result.errors[0].code, codes::YAML_SYNTAX);
        assert!(result.errors[0].line.is_some());
    }

    #[tokio::test]
    async fn test_recovery_disabled_promotes_structural_error() {
        let mut options = ParserOptions::default();
        options.error_recovery = false;
        let parser = parser_with_fs(options, MockFileSystem::new());

        let yaml = "a:\n  extends: b\n  script: x\nb:\n  extends: a\n  script: y\n";
        let result = parser.parse(yaml, "/repo/.gitlab-ci.yml").await;

        assert!(!result.success);
        assert!(result.pipeline.is_none());
        assert!(result.nodes.is_empty());
    }

    #[tokio::test]
    async fn test_detection_disabled_by_options() {
        let mut options = ParserOptions::default();
        options.detect_terraform = false;
        options.detect_helm = false;
        let parser = parser_with_fs(options, MockFileSystem::new());

        let yaml = "infra:\n  script: terraform apply\n";
        let result = parser.parse(yaml, "/repo/.gitlab-ci.yml").await;

        assert!(result.detections.is_empty());
        assert!(edges_of(&result, EdgeKind::UsesTerraform).is_empty());
    }

    #[tokio::test]
    async fn test_parse_file_reads_through_adapter() {
        let fs = MockFileSystem::new();
        fs.add_file("/repo/.gitlab-ci.yml", "stages: [build]\njob:\n  stage: build\n  script: make\n");
        let parser = parser_with_fs(ParserOptions::default(), fs);

        let result = parser
            .parse_file(Path::new("/repo/.gitlab-ci.yml"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.pipeline.unwrap().jobs.len(), 1);
    }
}
