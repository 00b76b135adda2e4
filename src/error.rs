use thiserror::Error;

/// Failures surfaced by the mask session and the size estimator.
///
/// Every variant maps to a distinct `kind()` so the HTTP layer can report a
/// structured failure instead of a bare message.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("no image loaded: {0}")]
    InvalidState(&'static str),

    #[error("nothing to undo")]
    EmptyHistory,

    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("elevation unavailable for ({easting:.1}, {northing:.1}): {reason}")]
    MissingElevation {
        easting: f64,
        northing: f64,
        reason: String,
    },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("unknown camera {0:?}")]
    UnknownCamera(String),

    #[error("missing metadata: {0}")]
    MissingMetadata(&'static str),

    #[error("upload superseded by a newer upload")]
    Superseded,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LocatorError {
    /// Stable identifier reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode_error",
            Self::InvalidState(_) => "invalid_state",
            Self::EmptyHistory => "empty_history",
            Self::InvalidPrompt(_) => "invalid_prompt",
            Self::MissingElevation { .. } => "missing_elevation",
            Self::DegenerateGeometry(_) => "degenerate_geometry",
            Self::Collaborator { .. } => "collaborator_failure",
            Self::NotConfigured(_) => "not_configured",
            Self::UnknownSession(_) => "unknown_session",
            Self::UnknownCamera(_) => "unknown_camera",
            Self::MissingMetadata(_) => "missing_metadata",
            Self::Superseded => "superseded",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Wrap a backend error, keeping its whole context chain in the message.
    pub fn collaborator(collaborator: &'static str, err: anyhow::Error) -> Self {
        Self::Collaborator {
            collaborator,
            message: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocatorError>;
