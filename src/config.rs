use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Where template includes are fetched from when template resolution is on.
pub const DEFAULT_TEMPLATE_BASE_URL: &str =
    "https://gitlab.com/gitlab-org/gitlab/-/raw/master/lib/gitlab/ci/templates";

/// Parser behavior options.
///
/// Defaults are secure: only local includes resolve unless remote/project
/// resolution is explicitly enabled. Options can be loaded from a TOML file
/// and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ParserOptions {
    /// Continue past recoverable errors, producing a partial graph
    #[serde(default = "default_true")]
    pub error_recovery: bool,

    /// Maximum include nesting depth
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    /// Allow `remote:` and `template:` includes to be fetched over HTTP
    #[serde(default)]
    pub resolve_remote: bool,

    /// Allow `project:` includes to be fetched through the registry API
    #[serde(default)]
    pub resolve_project: bool,

    /// Detect Terraform usage in job scripts
    #[serde(default = "default_true")]
    pub detect_terraform: bool,

    /// Detect Helm usage in job scripts
    #[serde(default = "default_true")]
    pub detect_helm: bool,

    /// Resolve `extends` inheritance chains
    #[serde(default = "default_true")]
    pub resolve_extends: bool,

    /// Reject YAML constructs the lenient loader would paper over
    #[serde(default)]
    pub strict_yaml: bool,

    /// Advisory per-request timeout for remote fetches, in seconds
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Base URL of the canonical CI template library
    #[serde(default = "default_template_base_url")]
    pub template_base_url: String,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            error_recovery: true,
            max_include_depth: default_max_include_depth(),
            resolve_remote: false,
            resolve_project: false,
            detect_terraform: true,
            detect_helm: true,
            resolve_extends: true,
            strict_yaml: false,
            remote_timeout_secs: default_remote_timeout(),
            template_base_url: default_template_base_url(),
        }
    }
}

impl ParserOptions {
    /// Loads options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

fn default_true() -> bool {
    true
}

fn default_max_include_depth() -> usize {
    10
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_template_base_url() -> String {
    DEFAULT_TEMPLATE_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_secure() {
        let options = ParserOptions::default();
        assert!(options.error_recovery);
        assert_eq!(options.max_include_depth, 10);
        assert!(!options.resolve_remote);
        assert!(!options.resolve_project);
        assert!(options.detect_terraform);
        assert!(options.detect_helm);
        assert!(options.resolve_extends);
        assert!(!options.strict_yaml);
    }

    #[test]
    fn test_load_partial_toml_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cigraph.toml");
        std::fs::write(&path, "resolve-remote = true\nmax-include-depth = 3\n").unwrap();

        let options = ParserOptions::load(&path).unwrap();
        assert!(options.resolve_remote);
        assert_eq!(options.max_include_depth, 3);
        assert!(options.error_recovery);
        assert!(!options.resolve_project);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        assert!(ParserOptions::load(Path::new("/nonexistent/cigraph.toml")).is_err());
    }
}
