use std::io;
use std::path::PathBuf;

use depoview::archive::ArchiveError;
use depoview::config::ConfigError;
use depoview::session::SubmitRejection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid server URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("server URL {0} must use http or https")]
    Scheme(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("settings file {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("submission rejected: {0}")]
    Rejected(#[from] SubmitRejection),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("the server reported the job as failed")]
    JobFailed,
    #[error("nothing to analyse: the trajectory has no frames")]
    NothingToAnalyse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialisation_errors_are_not_blamed_on_settings() {
        let err: ClientError = serde_json::from_str::<u8>("x").unwrap_err().into();
        assert!(matches!(err, ClientError::Json(_)));
        assert!(err.to_string().starts_with("JSON output: "));
    }
}
