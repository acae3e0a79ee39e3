use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid agent spec: {0}")]
    InvalidAgentSpec(String),

    #[error("Duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("Gate for agent '{agent}' references unknown agent '{target}'")]
    UnknownGateTarget { agent: String, target: String },

    #[error("Gate cycle detected: {0}")]
    GateCycle(String),

    #[error("Runtime not available: {0}")]
    RuntimeUnavailable(String),

    #[error("Runtime connection closed")]
    RuntimeClosed,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Review dispatch failed: {0}")]
    ReviewDispatch(String),
}

impl Error {
    /// Configuration errors abort startup; everything else is recovered
    /// inside the control loop.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidAgentSpec(_)
                | Error::DuplicateAgent(_)
                | Error::UnknownGateTarget { .. }
                | Error::GateCycle(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
