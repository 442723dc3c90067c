//! Tool usage detection.
//!
//! Heuristic, confidence-scored recognition of Terraform and Helm
//! invocations inside free-text job scripts. Pure and synchronous: the
//! detectors only look at the resolved job's script/image/extends/variables.

pub mod helm;
pub mod patterns;
pub mod terraform;

use serde::Serialize;

use crate::config::ParserOptions;
use crate::model::{Job, SourceSpan};

pub use helm::HelmDetection;
pub use terraform::TerraformDetection;

/// Where one piece of detection evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Command,
    Image,
    Extends,
    ArtifactReport,
    Variable,
}

/// One scored signal contributing to a detection.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvidence {
    pub kind: EvidenceKind,
    pub snippet: String,
    /// 1-based line within the job's combined script text, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub points: u32,
}

/// Detection outcome for one job: zero-or-one per tool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobDetections {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform: Option<TerraformDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmDetection>,
}

impl JobDetections {
    pub fn is_empty(&self) -> bool {
        self.terraform.is_none() && self.helm.is_none()
    }
}

/// Runs the enabled detectors over one resolved job.
pub fn detect_in_job(job: &Job, options: &ParserOptions) -> JobDetections {
    JobDetections {
        terraform: if options.detect_terraform {
            terraform::detect(job)
        } else {
            None
        },
        helm: if options.detect_helm {
            helm::detect(job)
        } else {
            None
        },
    }
}

/// Confidence = capped sum of evidence points, with floors: at least 40 when
/// any command matched, at least 30 when only an image matched.
pub(crate) fn confidence_from(evidence: &[DetectionEvidence]) -> u8 {
    let sum: u32 = evidence.iter().map(|e| e.points).sum();
    let any_command = evidence.iter().any(|e| e.kind == EvidenceKind::Command);
    let any_image = evidence.iter().any(|e| e.kind == EvidenceKind::Image);

    let mut confidence = sum.min(100);
    if any_command {
        confidence = confidence.max(40);
    } else if any_image {
        confidence = confidence.max(30);
    }
    confidence as u8
}

/// First entry of the priority list present among the matched verbs.
pub(crate) fn primary_command(matched: &[String], priority: &[&str]) -> Option<String> {
    priority
        .iter()
        .find(|candidate| matched.iter().any(|verb| verb == *candidate))
        .map(ToString::to_string)
}

pub(crate) fn detection_span(job: &Job) -> SourceSpan {
    job.span.clone()
}
