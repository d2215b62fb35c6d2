/// Shared error type used across all Mission Control crates.
///
/// Boundary operations surface these as typed codes. Within the core,
/// `Storage` during a turn is fatal for that mission and `Cancelled` is
/// never shown to the user as an error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("mission not found: {0}")]
    MissionNotFound(String),

    #[error("mission unknown to event store: {0}")]
    MissionUnknown(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("queue busy: mission {mission_id} is at its cap of {cap}")]
    QueueBusy { mission_id: String, cap: usize },

    #[error("storage: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("capacity: {0}")]
    Capacity(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("model provider: {0}")]
    Model(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable code for boundary responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissionNotFound(_) => "mission_not_found",
            Self::MissionUnknown(_) => "mission_unknown",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::QueueBusy { .. } => "queue_busy",
            Self::Storage(_) => "storage",
            Self::NotFound(_) => "not_found",
            Self::Cancelled(_) => "cancelled",
            Self::Capacity(_) => "capacity",
            Self::Protocol(_) => "protocol",
            Self::Model(_) => "model",
            Self::Config(_) => "config",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("json: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
