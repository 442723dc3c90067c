//! Pipeline model builder.
//!
//! Walks a parsed YAML document into the typed [`Pipeline`] model. Reserved
//! top-level keys are extracted into their dedicated fields; every other
//! mapping-valued key is a job. The builder never fails on bad job content,
//! only on a document whose root is not a mapping.

use indexmap::IndexMap;
use log::debug;
use serde_yaml::{Mapping, Value};

use crate::document::LineIndex;
use crate::error::{CigraphError, Result};
use crate::model::{
    codes, Artifacts, Diagnostic, Include, Job, Need, Pipeline, SourceSpan, Stage, DEFAULT_STAGES,
};

/// Top-level keys that are never jobs.
const RESERVED_KEYS: [&str; 11] = [
    "stages",
    "include",
    "variables",
    "default",
    "workflow",
    "image",
    "services",
    "before_script",
    "after_script",
    "cache",
    "types",
];

/// Builds the typed pipeline model from a document tree.
///
/// Returns the pipeline plus any non-fatal diagnostics (currently unknown
/// stage references).
///
/// # Errors
///
/// Returns an error if the document root is not a mapping; no partial model
/// is possible in that case.
pub fn build_pipeline(
    doc: &Value,
    file_path: &str,
    index: &LineIndex,
) -> Result<(Pipeline, Vec<Diagnostic>)> {
    let root = doc.as_mapping().ok_or_else(|| {
        CigraphError::Config(format!("CI document root must be a mapping: {file_path}"))
    })?;

    let mut stages = extract_stages(root);
    let variables = root
        .get("variables")
        .map(extract_variables)
        .unwrap_or_default();
    let default = root.get("default").and_then(Value::as_mapping).cloned();
    let workflow = root.get("workflow").and_then(Value::as_mapping).cloned();
    let includes = root
        .get("include")
        .map(|value| extract_includes(value, file_path, index))
        .unwrap_or_default();

    let mut jobs = IndexMap::new();

    for (key, value) in root {
        let Some(name) = key.as_str() else { continue };
        if RESERVED_KEYS.contains(&name) {
            continue;
        }
        let Some(mapping) = value.as_mapping() else {
            continue;
        };
        let span = SourceSpan::new(file_path, index.line_of(name));
        let job = extract_job(name, mapping, span);
        jobs.insert(name.to_string(), job);
    }

    let diagnostics = assign_stage_jobs(&mut stages, &jobs);

    debug!(
        "Built pipeline model: {} stages, {} jobs, {} includes",
        stages.len(),
        jobs.len(),
        includes.len()
    );

    let pipeline = Pipeline {
        file_path: file_path.to_string(),
        stages,
        jobs,
        variables,
        default,
        workflow,
        includes,
        span: SourceSpan::new(file_path, Some(1)),
    };

    Ok((pipeline, diagnostics))
}

/// Rebuilds each stage's job list from the current jobs mapping and flags
/// references to undeclared stages.
///
/// Stage membership depends on each job's final `stage` value, so this runs
/// once at model build and again after extends resolution, which can change
/// a job's stage through inheritance.
pub fn assign_stage_jobs(stages: &mut [Stage], jobs: &IndexMap<String, Job>) -> Vec<Diagnostic> {
    for stage in stages.iter_mut() {
        stage.job_names.clear();
    }

    let mut diagnostics = Vec::new();
    for job in jobs.values() {
        let Some(stage_name) = &job.stage else {
            continue;
        };
        match stages.iter_mut().find(|s| &s.name == stage_name) {
            Some(stage) => {
                if !job.hidden {
                    stage.job_names.push(job.name.clone());
                }
            }
            None if stage_name == ".pre" || stage_name == ".post" => {}
            None => {
                diagnostics.push(Diagnostic::warning(
                    codes::UNKNOWN_STAGE,
                    format!("Job '{}' references undeclared stage '{stage_name}'", job.name),
                    &job.span,
                ));
            }
        }
    }
    diagnostics
}

fn extract_stages(root: &Mapping) -> Vec<Stage> {
    let names = match root.get("stages") {
        Some(value) => string_sequence(value),
        None => DEFAULT_STAGES.iter().map(ToString::to_string).collect(),
    };

    names
        .into_iter()
        .enumerate()
        .map(|(order, name)| Stage {
            name,
            order,
            job_names: Vec::new(),
        })
        .collect()
}

/// Extracts one job from its document mapping. Missing or malformed fields
/// degrade to their empty form rather than failing.
pub fn extract_job(name: &str, mapping: &Mapping, span: SourceSpan) -> Job {
    Job {
        name: name.to_string(),
        stage: mapping.get("stage").and_then(scalar_string),
        script: mapping.get("script").map(string_sequence).unwrap_or_default(),
        before_script: mapping
            .get("before_script")
            .map(string_sequence)
            .unwrap_or_default(),
        after_script: mapping
            .get("after_script")
            .map(string_sequence)
            .unwrap_or_default(),
        needs: mapping.get("needs").map(extract_needs).unwrap_or_default(),
        dependencies: mapping
            .get("dependencies")
            .map(string_sequence)
            .unwrap_or_default(),
        artifacts: mapping.get("artifacts").and_then(extract_artifacts),
        extends: mapping.get("extends").map(string_sequence).unwrap_or_default(),
        variables: mapping
            .get("variables")
            .map(extract_variables)
            .unwrap_or_default(),
        rules: mapping
            .get("rules")
            .and_then(Value::as_sequence)
            .cloned()
            .unwrap_or_default(),
        image: mapping.get("image").and_then(extract_image),
        when: mapping.get("when").and_then(scalar_string),
        allow_failure: mapping.get("allow_failure").and_then(Value::as_bool),
        hidden: name.starts_with('.'),
        span,
        raw: mapping.clone(),
    }
}

/// Scalar value rendered as a string; sequences and mappings yield `None`.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A string or a (possibly nested) sequence of strings, flattened in order.
/// Tagged nodes (`!reference`) are opaque and skipped.
pub fn string_sequence(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::Sequence(_) => string_sequence(item),
                other => scalar_string(other).into_iter().collect(),
            })
            .collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

/// Variables mapping: scalar values stringified; the long form
/// `{value: ..., description: ...}` contributes its `value`.
pub fn extract_variables(value: &Value) -> IndexMap<String, String> {
    let Some(mapping) = value.as_mapping() else {
        return IndexMap::new();
    };

    let mut variables = IndexMap::new();
    for (key, value) in mapping {
        let Some(name) = key.as_str() else { continue };
        let resolved = match value {
            Value::Mapping(m) => m.get("value").and_then(scalar_string),
            other => scalar_string(other),
        };
        if let Some(resolved) = resolved {
            variables.insert(name.to_string(), resolved);
        }
    }
    variables
}

fn extract_needs(value: &Value) -> Vec<Need> {
    let Some(items) = value.as_sequence() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => Some(Need::by_name(name.clone())),
            Value::Mapping(m) => {
                let job = m.get("job").and_then(scalar_string)?;
                Some(Need {
                    job,
                    project: m.get("project").and_then(scalar_string),
                    ref_: m.get("ref").and_then(scalar_string),
                    artifacts: m.get("artifacts").and_then(Value::as_bool),
                    optional: m.get("optional").and_then(Value::as_bool),
                })
            }
            _ => None,
        })
        .collect()
}

fn extract_artifacts(value: &Value) -> Option<Artifacts> {
    let mapping = value.as_mapping()?;

    let paths = mapping.get("paths").map(string_sequence).unwrap_or_default();
    let mut reports = IndexMap::new();
    if let Some(report_map) = mapping.get("reports").and_then(Value::as_mapping) {
        for (key, value) in report_map {
            if let Some(kind) = key.as_str() {
                reports.insert(kind.to_string(), value.clone());
            }
        }
    }

    Some(Artifacts { paths, reports })
}

/// `image:` is either a plain name or a mapping with a `name` key.
fn extract_image(value: &Value) -> Option<String> {
    match value {
        Value::Mapping(m) => m.get("name").and_then(scalar_string),
        other => scalar_string(other),
    }
}

/// Extracts the `include:` value in all of its document forms: a single
/// string, a single mapping, or a sequence of either.
pub fn extract_includes(value: &Value, file_path: &str, index: &LineIndex) -> Vec<Include> {
    let span = Some(SourceSpan::new(file_path, index.line_of("include")));

    match value {
        Value::String(path) => vec![Include::Local {
            path: path.clone(),
            span,
        }],
        Value::Mapping(m) => extract_include_entry(m, &span).into_iter().collect(),
        Value::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(path) => Some(Include::Local {
                    path: path.clone(),
                    span: span.clone(),
                }),
                Value::Mapping(m) => extract_include_entry(m, &span),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn extract_include_entry(m: &Mapping, span: &Option<SourceSpan>) -> Option<Include> {
    let span = span.clone();

    if let Some(path) = m.get("local").and_then(scalar_string) {
        return Some(Include::Local { path, span });
    }
    if let Some(url) = m.get("remote").and_then(scalar_string) {
        return Some(Include::Remote { url, span });
    }
    if let Some(name) = m.get("template").and_then(scalar_string) {
        return Some(Include::Template { name, span });
    }
    if let Some(component) = m.get("component").and_then(scalar_string) {
        let mut inputs = IndexMap::new();
        if let Some(input_map) = m.get("inputs").and_then(Value::as_mapping) {
            for (key, value) in input_map {
                if let Some(name) = key.as_str() {
                    inputs.insert(name.to_string(), value.clone());
                }
            }
        }
        return Some(Include::Component {
            component,
            inputs,
            span,
        });
    }
    if let Some(project) = m.get("project").and_then(scalar_string) {
        return Some(Include::Project {
            project,
            files: m.get("file").map(string_sequence).unwrap_or_default(),
            ref_: m.get("ref").and_then(scalar_string),
            span,
        });
    }
    if let Some(file) = m.get("file") {
        return Some(Include::File {
            paths: string_sequence(file),
            span,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;

    fn build(yaml: &str) -> (Pipeline, Vec<Diagnostic>) {
        let doc = document::parse(yaml, false).unwrap();
        let index = LineIndex::new(yaml);
        build_pipeline(&doc, ".gitlab-ci.yml", &index).unwrap()
    }

    #[test]
    fn test_root_must_be_mapping() {
        let doc = document::parse("- a\n- b\n", false).unwrap();
        let index = LineIndex::new("- a\n- b\n");
        assert!(build_pipeline(&doc, "ci.yml", &index).is_err());
    }

    #[test]
    fn test_declared_stages_keep_order() {
        let (pipeline, _) = build("stages: [deploy, test, build]\n");
        let names: Vec<_> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["deploy", "test", "build"]);
        let orders: Vec<_> = pipeline.stages.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn test_default_stages_when_absent() {
        let (pipeline, _) = build("job:\n  script: make\n");
        let names: Vec<_> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "deploy"]);
    }

    #[test]
    fn test_jobs_preserve_document_order() {
        let yaml = "zeta:\n  script: a\nalpha:\n  script: b\nmid:\n  script: c\n";
        let (pipeline, _) = build(yaml);
        let names: Vec<_> = pipeline.jobs.keys().cloned().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_hidden_job_flag_and_stage_assignment() {
        let yaml = "stages: [build]\n.tmpl:\n  stage: build\n  script: a\nreal:\n  stage: build\n  script: b\n";
        let (pipeline, diagnostics) = build(yaml);
        assert!(pipeline.jobs[".tmpl"].hidden);
        assert!(!pipeline.jobs["real"].hidden);
        assert_eq!(pipeline.stages[0].job_names, vec!["real"]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_stage_is_warning_not_failure() {
        let yaml = "stages: [build]\njob:\n  stage: missing\n  script: a\n";
        let (pipeline, diagnostics) = build(yaml);
        assert_eq!(pipeline.jobs.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].code, codes::UNKNOWN_STAGE);
        assert_eq!(diagnostics[0].severity, crate::model::Severity::Warning);
    }

    #[test]
    fn test_needs_both_forms() {
        let yaml = "deploy:\n  needs:\n    - build\n    - job: test\n      artifacts: false\n      optional: true\n";
        let (pipeline, _) = build(yaml);
        let needs = &pipeline.jobs["deploy"].needs;
        assert_eq!(needs.len(), 2);
        assert_eq!(needs[0].job, "build");
        assert!(needs[0].wants_artifacts());
        assert_eq!(needs[1].job, "test");
        assert!(!needs[1].wants_artifacts());
        assert_eq!(needs[1].optional, Some(true));
    }

    #[test]
    fn test_nested_script_arrays_flatten() {
        let yaml = "job:\n  script:\n    - - echo a\n      - echo b\n    - echo c\n";
        let (pipeline, _) = build(yaml);
        assert_eq!(
            pipeline.jobs["job"].script,
            vec!["echo a", "echo b", "echo c"]
        );
    }

    #[test]
    fn test_variables_long_form() {
        let yaml = "variables:\n  PLAIN: v1\n  COUNT: 3\n  LONG:\n    value: v2\n    description: d\n";
        let (pipeline, _) = build(yaml);
        assert_eq!(pipeline.variables["PLAIN"], "v1");
        assert_eq!(pipeline.variables["COUNT"], "3");
        assert_eq!(pipeline.variables["LONG"], "v2");
    }

    #[test]
    fn test_artifacts_paths_and_reports() {
        let yaml = "job:\n  artifacts:\n    paths: [dist/]\n    reports:\n      terraform: plan.json\n";
        let (pipeline, _) = build(yaml);
        let artifacts = pipeline.jobs["job"].artifacts.as_ref().unwrap();
        assert_eq!(artifacts.paths, vec!["dist/"]);
        assert!(artifacts.has_report("terraform"));
    }

    #[test]
    fn test_include_variants() {
        let yaml = concat!(
            "include:\n",
            "  - 'shorthand.yml'\n",
            "  - local: 'ci/local.yml'\n",
            "  - remote: 'https://example.com/ci.yml'\n",
            "  - template: 'Terraform.gitlab-ci.yml'\n",
            "  - project: 'group/proj'\n",
            "    ref: main\n",
            "    file: '/ci/base.yml'\n",
            "  - component: 'gitlab.com/comp/tool@1.0'\n",
            "  - file: ['a.yml', 'b.yml']\n",
        );
        let (pipeline, _) = build(yaml);
        assert_eq!(pipeline.includes.len(), 7);
        assert!(matches!(&pipeline.includes[0], Include::Local { path, .. } if path == "shorthand.yml"));
        assert!(matches!(&pipeline.includes[1], Include::Local { .. }));
        assert!(matches!(&pipeline.includes[2], Include::Remote { .. }));
        assert!(matches!(&pipeline.includes[3], Include::Template { .. }));
        assert!(matches!(
            &pipeline.includes[4],
            Include::Project { project, ref_: Some(r), files, .. }
                if project == "group/proj" && r == "main" && files == &vec!["/ci/base.yml".to_string()]
        ));
        assert!(matches!(&pipeline.includes[5], Include::Component { .. }));
        assert!(matches!(&pipeline.includes[6], Include::File { paths, .. } if paths.len() == 2));
    }

    #[test]
    fn test_job_span_comes_from_line_index() {
        let yaml = "stages: [build]\n\nmy-job:\n  stage: build\n  script: a\n";
        let (pipeline, _) = build(yaml);
        assert_eq!(pipeline.jobs["my-job"].span.line, Some(3));
    }
}
