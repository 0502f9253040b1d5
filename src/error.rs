use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("Incorrect major version: {0}")]
    IncorrectMajor(String),

    #[error("Incorrect minor version: {0}")]
    IncorrectMinor(String),

    #[error("Incorrect patch version: {0}")]
    IncorrectPatch(String),

    #[error("Incorrect snapshot year: {0}")]
    IncorrectYear(String),

    #[error("Incorrect snapshot week: {0}")]
    IncorrectWeek(String),

    #[error("Incorrect snapshot build: {0}")]
    IncorrectBuild(String),

    #[error("Missing major version")]
    MissingMajor,

    #[error("Missing minor version")]
    MissingMinor,

    #[error("Invalid snapshot format")]
    InvalidSnapshotFormat,

    #[error("Too many components")]
    ExtraComponents,

    #[error("Unrecognized version format: {0}")]
    UnknownVersionFormat(String),
}

#[derive(Debug, Clone, Error)]
pub enum WatcherError {
    #[error("failed to open pty: {0}")]
    Pty(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("invalid server name")]
    UnknownInstance(String),

    #[error("invalid server name")]
    InvalidName(String),

    #[error("server is running")]
    InstanceRunning(String),

    #[error("server not running")]
    NotRunning(String),

    #[error("failed downloading server: {url} returned {status}")]
    Download { url: String, status: u16 },

    #[error("failed downloading server: {0}")]
    Network(String),

    #[error("{0}")]
    Provisioning(String),

    #[error("invalid server software: {0}")]
    InvalidSoftware(String),

    #[error("file io failed: {0}")]
    FileIO(String),

    #[error("invalid instance config: {0}")]
    Config(String),

    #[error(transparent)]
    Spawn(#[from] WatcherError),
}

#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("invalid or unsupported server software: {0}")]
    UnsupportedSoftware(String),

    #[error("unknown version: {0}")]
    UnknownVersion(String),

    #[error("catalog request failed: {0}")]
    Network(String),

    #[error("java not found")]
    JavaNotFound(String),
}

/// Client-facing protocol faults. The display strings are part of the wire
/// contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("json parsing error")]
    Json,

    #[error("missing data")]
    MissingData,

    #[error("invalid command")]
    InvalidCommand,
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to read config {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("failed to read auth hash from {path}: {reason}")]
    AuthHash { path: String, reason: String },

    #[error("failed to bind {0}")]
    Bind(String, #[source] std::io::Error),

    #[error("failed to set up logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
