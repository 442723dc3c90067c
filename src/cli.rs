use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use crate::config::ParserOptions;
use crate::parser::GitLabParser;

#[derive(Parser)]
#[command(name = "cigraph")]
#[command(author, version, about = "GitLab CI dependency graph extractor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a CI configuration file into a dependency graph
    Parse {
        /// Path to the .gitlab-ci.yml file
        file: PathBuf,

        /// Options file (TOML); command-line flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, env = "GITLAB_TOKEN")]
        token: Option<String>,

        #[arg(short, long, default_value = "https://gitlab.com")]
        url: String,

        /// Fetch remote and template includes over HTTP
        #[arg(long, default_value_t = false)]
        resolve_remote: bool,

        /// Fetch cross-project includes through the GitLab API
        #[arg(long, default_value_t = false)]
        resolve_project: bool,

        #[arg(long)]
        max_include_depth: Option<usize>,

        /// Leave `extends` chains unmerged
        #[arg(long, default_value_t = false)]
        no_extends: bool,

        #[arg(long, default_value_t = false)]
        no_terraform: bool,

        #[arg(long, default_value_t = false)]
        no_helm: bool,

        /// Reject multi-document YAML streams
        #[arg(long, default_value_t = false)]
        strict_yaml: bool,

        /// Abort on the first structural error instead of recovering
        #[arg(long, default_value_t = false)]
        no_recovery: bool,
    },
}

impl Cli {
    #[allow(clippy::too_many_arguments)]
    async fn execute_parse(
        &self,
        file: &PathBuf,
        config: Option<&PathBuf>,
        token: &Option<String>,
        url: &str,
        resolve_remote: bool,
        resolve_project: bool,
        max_include_depth: Option<usize>,
        no_extends: bool,
        no_terraform: bool,
        no_helm: bool,
        strict_yaml: bool,
        no_recovery: bool,
    ) -> Result<()> {
        info!("Building CI graph for: {}", file.display());

        let mut options = match config {
            Some(path) => ParserOptions::load(path)?,
            None => ParserOptions::default(),
        };
        if resolve_remote {
            options.resolve_remote = true;
        }
        if resolve_project {
            options.resolve_project = true;
        }
        if let Some(depth) = max_include_depth {
            options.max_include_depth = depth;
        }
        if no_extends {
            options.resolve_extends = false;
        }
        if no_terraform {
            options.detect_terraform = false;
        }
        if no_helm {
            options.detect_helm = false;
        }
        if strict_yaml {
            options.strict_yaml = true;
        }
        if no_recovery {
            options.error_recovery = false;
        }

        let parser = GitLabParser::new(options, url, token.clone())?;
        let result = parser.parse_file(file).await?;

        let json_output = if self.pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, json_output)?;
            info!("Graph written to: {}", output_path.display());
        } else {
            println!("{}", json_output);
        }

        if !result.success {
            anyhow::bail!("parse finished with {} error(s)", result.errors.len());
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Parse {
                file,
                config,
                token,
                url,
                resolve_remote,
                resolve_project,
                max_include_depth,
                no_extends,
                no_terraform,
                no_helm,
                strict_yaml,
                no_recovery,
            } => {
                self.execute_parse(
                    file,
                    config.as_ref(),
                    token,
                    url,
                    *resolve_remote,
                    *resolve_project,
                    *max_include_depth,
                    *no_extends,
                    *no_terraform,
                    *no_helm,
                    *strict_yaml,
                    *no_recovery,
                )
                .await
            }
        }
    }
}
