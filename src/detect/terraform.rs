//! Terraform usage detection.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::model::{Job, SourceSpan};

use super::patterns::{capture_all, capture_first, CommandPattern, NamePattern};
use super::{
    confidence_from, detection_span, primary_command, DetectionEvidence, EvidenceKind,
};

/// Primary-command priority: the most destructive verb present wins.
pub const COMMAND_PRIORITY: [&str; 13] = [
    "destroy",
    "apply",
    "import",
    "state",
    "taint",
    "untaint",
    "plan",
    "refresh",
    "init",
    "validate",
    "fmt",
    "output",
    "workspace",
];

static COMMANDS: LazyLock<CommandPattern> = LazyLock::new(|| {
    CommandPattern::new(
        r"(?i)\b(?:terraform|terragrunt|tofu|gitlab-terraform)\s+(?:-[\w=/.-]+\s+)*(?<verb>destroy|apply|import|state|taint|untaint|plan|refresh|init|validate|fmt|output|workspace)\b",
    )
});

static IMAGES: LazyLock<NamePattern> = LazyLock::new(|| {
    NamePattern::new(
        r"(?i)(hashicorp/terraform|gitlab-org/terraform-images|terraform-images/|opentofu|alpine/terragrunt)",
    )
});

static EXTENDS_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(terraform|terragrunt|(?:^|[^a-z])tf(?:[^a-z]|$))").unwrap());

static CHDIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-chdir=(\S+)").unwrap());
static CD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*cd\s+([^\s;&|]+)").unwrap());
static VAR_FILES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-var-file[=\s]+(\S+)").unwrap());
static VARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-var(?:=|\s+)([A-Za-z_]\w*=\S+)").unwrap());
static FLAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-auto-approve|-detailed-exitcode|-refresh-only|-lock=false|-input=false)")
        .unwrap()
});

/// A confidence-scored Terraform detection for one job.
#[derive(Debug, Clone, Serialize)]
pub struct TerraformDetection {
    pub job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Highest-priority verb among the matched commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub var_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    pub confidence: u8,
    pub evidence: Vec<DetectionEvidence>,
    pub location: SourceSpan,
}

/// Detects Terraform usage in one resolved job. Returns `None` when no
/// evidence of any kind is found, never a zero-confidence detection.
pub fn detect(job: &Job) -> Option<TerraformDetection> {
    let text = job.full_script_text();
    let mut evidence = Vec::new();

    let command_matches = COMMANDS.matches(&text);
    for m in &command_matches {
        evidence.push(DetectionEvidence {
            kind: EvidenceKind::Command,
            snippet: m.text.clone(),
            line: Some(m.line),
            points: 40,
        });
    }

    if let Some(image) = &job.image {
        if IMAGES.is_match(image) {
            evidence.push(DetectionEvidence {
                kind: EvidenceKind::Image,
                snippet: image.clone(),
                line: None,
                points: 30,
            });
        }
    }

    // Extends hints are weak: only considered when neither a command nor an
    // image matched.
    if evidence.is_empty() {
        for parent in &job.extends {
            if EXTENDS_HINT.is_match(parent) {
                evidence.push(DetectionEvidence {
                    kind: EvidenceKind::Extends,
                    snippet: parent.clone(),
                    line: None,
                    points: 30,
                });
                break;
            }
        }
    }

    if job
        .artifacts
        .as_ref()
        .is_some_and(|a| a.has_report("terraform"))
    {
        evidence.push(DetectionEvidence {
            kind: EvidenceKind::ArtifactReport,
            snippet: "artifacts.reports.terraform".to_string(),
            line: None,
            points: 20,
        });
    }

    if let Some((name, _)) = job
        .variables
        .iter()
        .find(|(name, _)| name.starts_with("TF_") || name.starts_with("TFE_"))
    {
        evidence.push(DetectionEvidence {
            kind: EvidenceKind::Variable,
            snippet: name.clone(),
            line: None,
            points: 10,
        });
    }

    if evidence.is_empty() {
        return None;
    }

    let matched_verbs: Vec<String> = command_matches.iter().map(|m| m.verb.clone()).collect();

    Some(TerraformDetection {
        job_name: job.name.clone(),
        stage: job.stage.clone(),
        command: primary_command(&matched_verbs, &COMMAND_PRIORITY),
        working_directory: working_directory(job, &text),
        var_files: capture_all(&VAR_FILES, &text),
        variables: capture_all(&VARS, &text),
        flags: capture_all(&FLAGS, &text),
        confidence: confidence_from(&evidence),
        evidence,
        location: detection_span(job),
    })
}

/// Working directory, in precedence order: `-chdir=`, a `cd` line, `TF_ROOT`.
fn working_directory(job: &Job, text: &str) -> Option<String> {
    capture_first(&CHDIR, text)
        .or_else(|| capture_first(&CD, text))
        .or_else(|| job.variables.get("TF_ROOT").cloned())
}

/// True when the job's script produces Terraform outputs (consumed by the
/// cross-tool flow inference).
pub fn has_output_signal(job: &Job) -> bool {
    static OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:terraform|terragrunt)\s+output\b|\b(?:TF_OUTPUT|TERRAFORM_OUTPUT)\b")
            .unwrap()
    });
    OUTPUT.is_match(&job.full_script_text())
        || job
            .variables
            .keys()
            .any(|name| name.starts_with("TF_OUTPUT") || name.starts_with("TERRAFORM_OUTPUT"))
}
