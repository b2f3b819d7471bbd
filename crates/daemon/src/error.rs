use thiserror::Error;

/// Conditions that end a run with a non-zero exit status
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to fetch master index {url}: {source}")]
    MasterIndex {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to fetch collection {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no realtime observation XML URLs found")]
    NoSources,
    #[error("no {0} records parsed")]
    NoRecords(&'static str),
    #[error("invalid option: {0}")]
    InvalidOption(String),
}
