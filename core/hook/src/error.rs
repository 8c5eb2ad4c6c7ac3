use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("failed to read stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("invalid hook input: {0}")]
    InvalidInput(#[source] serde_json::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("home directory not found")]
    HomeNotFound,

    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(#[source] std::io::Error),

    #[error("failed to write spool file: {0}")]
    Spool(#[source] std::io::Error),
}
