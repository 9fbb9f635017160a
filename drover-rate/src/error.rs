//! Rate control error types

use thiserror::Error;

/// Errors raised while constructing or running a rate controller.
#[derive(Debug, Error)]
pub enum RateControlError {
    /// The round spec names a controller the registry does not know.
    #[error("Unknown rate controller \"{0}\"")]
    UnknownController(String),

    /// The controller options are missing or malformed.
    #[error("Invalid options for \"{controller}\": {message}")]
    InvalidOptions {
        controller: String,
        message: String,
    },

    /// The controller cannot drive this kind of round.
    #[error("Controller \"{controller}\" rejects the round: {message}")]
    UnsupportedRound {
        controller: String,
        message: String,
    },

    /// A trace file could not be read or written.
    #[error("Trace file error for {path}: {message}")]
    Trace { path: String, message: String },

    /// The round specification itself is invalid.
    #[error(transparent)]
    Spec(#[from] drover_messaging::MessagingError),

    /// A registry name was registered twice.
    #[error("Rate controller \"{0}\" is already registered")]
    DuplicateController(String),
}

impl RateControlError {
    pub fn invalid_options(controller: &str, message: impl Into<String>) -> Self {
        RateControlError::InvalidOptions {
            controller: controller.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported_round(controller: &str, message: impl Into<String>) -> Self {
        RateControlError::UnsupportedRound {
            controller: controller.to_string(),
            message: message.into(),
        }
    }

    pub fn trace(path: &std::path::Path, message: impl Into<String>) -> Self {
        RateControlError::Trace {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}
