use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("home directory not found")]
    HomeNotFound,

    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Fatal startup and listener failures.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare socket directory {}: {source}", path.display())]
    SocketDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind ingestion socket {}: {source}", path.display())]
    BindSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind viewer server on {addr}: {source}")]
    BindServer {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("viewer server failed: {0}")]
    Serve(#[source] std::io::Error),

    #[error("event engine stopped")]
    EngineStopped,
}
