pub mod builder;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Stage sequence GitLab assumes when a document has no `stages` key.
pub const DEFAULT_STAGES: [&str; 3] = ["build", "test", "deploy"];

/// Best-effort source position of a construct inside a CI document.
///
/// Line numbers are 1-based and come from a top-level key scan of the raw
/// text; nested constructs inherit the span of their enclosing top-level key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl SourceSpan {
    pub fn new(file: impl Into<String>, line: Option<usize>) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
        }
    }
}

/// One parsed CI configuration document plus its resolved stages and jobs.
///
/// Built once per parse call and immutable afterwards, except that the
/// extends resolver replaces job entries with their merged form.
#[derive(Debug, Clone, Serialize)]
pub struct Pipeline {
    /// Path of the document this pipeline was parsed from
    pub file_path: String,
    /// Declared stages in execution order
    pub stages: Vec<Stage>,
    /// Jobs keyed by name, insertion order = document order
    pub jobs: IndexMap<String, Job>,
    /// Top-level pipeline variables
    pub variables: IndexMap<String, String>,
    /// Raw `default:` block, applied by GitLab to every job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_yaml::Mapping>,
    /// Raw `workflow:` block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<serde_yaml::Mapping>,
    /// Include directives in declaration order
    pub includes: Vec<Include>,
    pub span: SourceSpan,
}

/// A named execution phase with a total order; jobs run within a stage.
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub name: String,
    /// 0-based declaration index, strictly increasing
    pub order: usize,
    /// Names of jobs assigned to this stage, filled after job extraction
    pub job_names: Vec<String>,
}

/// One unit of work in a pipeline.
///
/// A leading `.` in the name marks a hidden job, usable only as an extends
/// template. The raw document mapping is retained for the extends merge and
/// never serialized.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before_script: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after_script: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<Need>,
    /// Legacy stage-order-implicit artifact dependencies
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<serde_yaml::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_failure: Option<bool>,
    pub hidden: bool,
    pub span: SourceSpan,
    /// Original document mapping, input to the extends merge
    #[serde(skip)]
    pub raw: serde_yaml::Mapping,
}

impl Job {
    /// Full script text (before + main + after), newline-joined. This is the
    /// text the tool detector scans.
    pub fn full_script_text(&self) -> String {
        self.before_script
            .iter()
            .chain(self.script.iter())
            .chain(self.after_script.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One entry of a job's `needs:` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Need {
    pub job: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    /// `false` opts out of artifact download; absent means default (true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl Need {
    pub fn by_name(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            project: None,
            ref_: None,
            artifacts: None,
            optional: None,
        }
    }

    /// Artifacts flow along a need unless explicitly disabled.
    pub fn wants_artifacts(&self) -> bool {
        self.artifacts != Some(false)
    }
}

/// A job's `artifacts:` declaration, reduced to what the graph needs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Artifacts {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Report kind (e.g. "terraform", "junit") to its raw value
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub reports: IndexMap<String, serde_yaml::Value>,
}

impl Artifacts {
    pub fn has_report(&self, kind: &str) -> bool {
        self.reports.contains_key(kind)
    }
}

/// One `include:` directive, one variant per GitLab include kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Include {
    /// Path relative to the current repository
    Local {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
    /// One or more paths within the same project
    File {
        paths: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
    /// Absolute URL fetched over HTTP
    Remote {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
    /// Named template from the canonical GitLab template library
    Template {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
    /// File(s) from another project, optionally pinned to a ref
    Project {
        project: String,
        files: Vec<String>,
        #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
        ref_: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
    /// CI/CD catalog component; resolution is unsupported and always fails
    Component {
        component: String,
        #[serde(skip_serializing_if = "IndexMap::is_empty")]
        inputs: IndexMap<String, serde_yaml::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        span: Option<SourceSpan>,
    },
}

impl Include {
    /// Short human-readable descriptor used in node ids and edge labels.
    pub fn descriptor(&self) -> String {
        match self {
            Include::Local { path, .. } => path.clone(),
            Include::File { paths, .. } => paths.join(","),
            Include::Remote { url, .. } => url.clone(),
            Include::Template { name, .. } => format!("template:{name}"),
            Include::Project { project, files, .. } => {
                format!("{}:{}", project, files.join(","))
            }
            Include::Component { component, .. } => format!("component:{component}"),
        }
    }

    pub fn span(&self) -> Option<&SourceSpan> {
        match self {
            Include::Local { span, .. }
            | Include::File { span, .. }
            | Include::Remote { span, .. }
            | Include::Template { span, .. }
            | Include::Project { span, .. }
            | Include::Component { span, .. } => span.as_ref(),
        }
    }
}

/// A successfully fetched and parsed include.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInclude {
    pub include: Include,
    /// Canonical path or URL the include resolved to
    pub resolved_path: String,
    /// Raw fetched text; `None` when resolution was skipped by policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Parsed document tree
    #[serde(skip)]
    pub document: Option<serde_yaml::Value>,
    /// Nesting depth, 0 for includes of the root document
    pub depth: usize,
    /// Set when content was withheld by policy (e.g. remote resolution off)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An include that could not be resolved.
#[derive(Debug, Clone, Serialize)]
pub struct FailedInclude {
    pub include: Include,
    pub attempted_path: String,
    pub error: String,
    pub code: &'static str,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    Include,
    Extends,
}

/// A detected include or extends cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CircularDependency {
    /// The key whose resolution closed the loop
    pub path: String,
    /// Ordered ancestor chain at the point of detection
    pub chain: Vec<String>,
    #[serde(rename = "type")]
    pub kind: CycleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One problem found during parsing, scoped to the smallest affected unit.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    pub severity: Severity,
    pub code: &'static str,
}

impl Diagnostic {
    pub fn error(code: &'static str, message: impl Into<String>, span: &SourceSpan) -> Self {
        Self {
            message: message.into(),
            file: span.file.clone(),
            line: span.line,
            column: span.column,
            severity: Severity::Error,
            code,
        }
    }

    pub fn warning(code: &'static str, message: impl Into<String>, span: &SourceSpan) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message, span)
        }
    }
}

/// Diagnostic codes shared across the engine.
pub mod codes {
    pub const INVALID_DOCUMENT: &str = "INVALID_DOCUMENT";
    pub const YAML_SYNTAX: &str = "YAML_SYNTAX";
    pub const UNKNOWN_STAGE: &str = "UNKNOWN_STAGE";
    pub const CIRCULAR_INCLUDE: &str = "CIRCULAR_INCLUDE";
    pub const CIRCULAR_EXTENDS: &str = "CIRCULAR_EXTENDS";
    pub const INCLUDE_RESOLUTION_FAILED: &str = "INCLUDE_RESOLUTION_FAILED";
    pub const MAX_DEPTH_EXCEEDED: &str = "MAX_DEPTH_EXCEEDED";
    pub const REMOTE_RESOLUTION_DISABLED: &str = "REMOTE_RESOLUTION_DISABLED";
    pub const PROJECT_RESOLUTION_DISABLED: &str = "PROJECT_RESOLUTION_DISABLED";
    pub const COMPONENT_UNSUPPORTED: &str = "COMPONENT_UNSUPPORTED";
}
