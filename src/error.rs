use thiserror::Error;

#[derive(Error, Debug)]
pub enum CigraphError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP request to {url} failed with status {status}")]
    Http { status: u16, url: String },

    #[error("API request failed: {0}")]
    Api(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CigraphError>;
