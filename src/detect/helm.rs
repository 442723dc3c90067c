//! Helm usage detection.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::model::{Job, SourceSpan};

use super::patterns::{capture_all, capture_first, CommandPattern, NamePattern};
use super::{
    confidence_from, detection_span, primary_command, DetectionEvidence, EvidenceKind,
};

pub const COMMAND_PRIORITY: [&str; 12] = [
    "uninstall",
    "rollback",
    "upgrade",
    "install",
    "push",
    "package",
    "template",
    "lint",
    "test",
    "repo",
    "dependency",
    "pull",
];

static COMMANDS: LazyLock<CommandPattern> = LazyLock::new(|| {
    CommandPattern::new(
        r"(?i)\b(?:helm|helmfile)\s+(?<verb>uninstall|rollback|upgrade|install|push|package|template|lint|test|repo|dependency|pull)\b",
    )
});

static IMAGES: LazyLock<NamePattern> = LazyLock::new(|| {
    NamePattern::new(r"(?i)(alpine/helm|dtzar/helm-kubectl|lachlanevenson/k8s-helm|alpine/k8s)")
});

static NAMESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:--namespace|-n)[=\s]+(\S+)").unwrap());
static VALUES_FILES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:--values|-f)[=\s]+(\S+)").unwrap());
static SET_VALUES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--set(?:-string)?[=\s]+(\S+)").unwrap());
static FLAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(--dry-run|--atomic|--wait|--create-namespace)").unwrap());

/// Flags that consume the next token when written without `=`.
const VALUE_FLAGS: [&str; 10] = [
    "-n",
    "--namespace",
    "-f",
    "--values",
    "--set",
    "--set-string",
    "--version",
    "--timeout",
    "--kube-context",
    "--kubeconfig",
];

/// A confidence-scored Helm detection for one job.
#[derive(Debug, Clone, Serialize)]
pub struct HelmDetection {
    pub job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub set_values: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    pub confidence: u8,
    pub evidence: Vec<DetectionEvidence>,
    pub location: SourceSpan,
}

/// Detects Helm usage in one resolved job. Returns `None` when no evidence
/// of any kind is found.
pub fn detect(job: &Job) -> Option<HelmDetection> {
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

    if evidence.is_empty() {
        return None;
    }

    let matched_verbs: Vec<String> = command_matches.iter().map(|m| m.verb.clone()).collect();
    let (release, chart) = command_matches
        .iter()
        .find(|m| m.verb == "install" || m.verb == "upgrade")
        .map(|m| release_and_chart(&m.text))
        .unwrap_or((None, None));

    Some(HelmDetection {
        job_name: job.name.clone(),
        stage: job.stage.clone(),
        command: primary_command(&matched_verbs, &COMMAND_PRIORITY),
        release,
        chart,
        namespace: capture_first(&NAMESPACE, &text),
        values_files: capture_all(&VALUES_FILES, &text),
        set_values: capture_all(&SET_VALUES, &text),
        flags: capture_all(&FLAGS, &text),
        confidence: confidence_from(&evidence),
        evidence,
        location: detection_span(job),
    })
}

/// Positional release and chart arguments of an `install`/`upgrade` line,
/// skipping flags and their values.
fn release_and_chart(line: &str) -> (Option<String>, Option<String>) {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(verb_idx) = tokens
        .iter()
        .position(|t| *t == "install" || *t == "upgrade")
    else {
        return (None, None);
    };

    let mut positional = Vec::new();
    let mut idx = verb_idx + 1;
    while idx < tokens.len() && positional.len() < 2 {
        let token = tokens[idx];
        if token.starts_with('-') {
            if VALUE_FLAGS.contains(&token) {
                idx += 1; // skip the flag's value too
            }
        } else {
            positional.push(token.to_string());
        }
        idx += 1;
    }

    let mut positional = positional.into_iter();
    (positional.next(), positional.next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::LineIndex;
    use crate::model::builder::build_pipeline;

    fn job_from(yaml: &str, name: &str) -> Job {
        let doc = crate::document::parse(yaml, false).unwrap();
        let index = LineIndex::new(yaml);
        let (pipeline, _) = build_pipeline(&doc, "ci.yml", &index).unwrap();
        pipeline.jobs[name].clone()
    }

    #[test]
    fn test_no_evidence_yields_none() {
        let job = job_from("plain:\n  script: make build\n", "plain");
        assert!(detect(&job).is_none());
    }

    #[test]
    fn test_upgrade_install_release_and_chart() {
        let yaml =
            "deploy:\n  script: helm upgrade --install app ./chart -n prod -f values.yaml\n";
        let detection = detect(&job_from(yaml, "deploy")).unwrap();

        assert_eq!(detection.command.as_deref(), Some("upgrade"));
        assert_eq!(detection.release.as_deref(), Some("app"));
        assert_eq!(detection.chart.as_deref(), Some("./chart"));
        assert_eq!(detection.namespace.as_deref(), Some("prod"));
        assert_eq!(detection.values_files, vec!["values.yaml"]);
        assert_eq!(detection.confidence, 40);
    }

    #[test]
    fn test_uninstall_outranks_upgrade() {
        let yaml = "cleanup:\n  script:\n    - helm upgrade app ./chart\n    - helm uninstall app\n";
        let detection = detect(&job_from(yaml, "cleanup")).unwrap();
        assert_eq!(detection.command.as_deref(), Some("uninstall"));
        assert_eq!(detection.confidence, 80);
    }

    #[test]
    fn test_helmfile_recognized() {
        let yaml = "deploy:\n  script: helmfile template\n";
        let detection = detect(&job_from(yaml, "deploy")).unwrap();
        assert_eq!(detection.command.as_deref(), Some("template"));
    }

    #[test]
    fn test_image_only_detection() {
        let yaml = "deploy:\n  image: alpine/helm:3.14\n  script: ./deploy.sh\n";
        let detection = detect(&job_from(yaml, "deploy")).unwrap();
        assert_eq!(detection.confidence, 30);
        assert!(detection.command.is_none());
    }

    #[test]
    fn test_set_values_and_flags() {
        let yaml = concat!(
            "deploy:\n",
            "  script: helm install app ./chart --set image.tag=v2 --atomic --wait --dry-run\n",
        );
        let detection = detect(&job_from(yaml, "deploy")).unwrap();

        assert_eq!(detection.set_values, vec!["image.tag=v2"]);
        assert_eq!(detection.flags, vec!["--atomic", "--wait", "--dry-run"]);
    }

    #[test]
    fn test_value_flags_skipped_before_positionals() {
        let line = "helm upgrade -n staging --values v.yaml --install app oci://repo/chart";
        let (release, chart) = release_and_chart(line);
        assert_eq!(release.as_deref(), Some("app"));
        assert_eq!(chart.as_deref(), Some("oci://repo/chart"));
    }

    #[test]
    fn test_before_and_after_script_are_scanned() {
        let yaml = concat!(
            "deploy:\n",
            "  before_script:\n    - helm repo add stable https://charts.example.com\n",
            "  script:\n    - ./run.sh\n",
        );
        let detection = detect(&job_from(yaml, "deploy")).unwrap();
        assert_eq!(detection.command.as_deref(), Some("repo"));
        assert_eq!(detection.evidence[0].line, Some(1));
    }
}
