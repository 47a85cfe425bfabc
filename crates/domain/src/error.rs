/// Shared error type used across all SerialAgent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("SerialMemory: {0}")]
    SerialMemory(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("sidecar unavailable: {0}")]
    SidecarUnavailable(String),

    #[error("sidecar port crashed")]
    PortCrashed,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid args: {0}")]
    InvalidArgs(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("signal below threshold: weight={weight}")]
    SignalFiltered { weight: f32 },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
