//! # Errors
//!
//! One error type for the whole library. The first five variants are the
//! exchange failures a user actually sees; the rest cover configuration,
//! storage and I/O plumbing.
//!
//! Cancellation is not an error: a stopped stream is an
//! [`ExchangeOutcome::Cancelled`](crate::controller::ExchangeOutcome), never an error.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, HomieError>;

/// Every failure the library can surface.
#[derive(Error, Debug)]
pub enum HomieError {
    /// The page extractor returned nothing usable; no request was sent.
    #[error("Failed to extract page content")]
    ContentExtractionFailed,

    /// A free-form turn was requested with blank input.
    #[error("Message is empty")]
    EmptyInput,

    /// The provider rejected the request as exceeding its context window.
    #[error(
        "Content exceeds the model's context limit: {message}\n\n\
         Try a model with a larger context window, or shorten the page content."
    )]
    ContextTooLarge { message: String },

    /// Any other non-success response from the completion endpoint.
    #[error("{message}")]
    Provider { status: u16, message: String },

    /// Transport failure while reading an incremental response.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Request could not be sent at all.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No models configured; run `homie init` and edit the config")]
    NoModelsConfigured,

    #[error("Unknown model: '{0}'")]
    UnknownModel(String),

    /// A `custom` provider was configured without an endpoint.
    #[error("Provider '{0}' requires an explicit api_endpoint")]
    MissingEndpoint(String),

    #[error("Unknown assistant: '{0}'")]
    UnknownAssistant(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<diesel::result::Error> for HomieError {
    fn from(err: diesel::result::Error) -> Self {
        HomieError::History(err.to_string())
    }
}

impl From<diesel::ConnectionError> for HomieError {
    fn from(err: diesel::ConnectionError) -> Self {
        HomieError::History(err.to_string())
    }
}

impl HomieError {
    /// `true` for the failures caused by the provider rather than by local setup.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            HomieError::ContextTooLarge { .. }
                | HomieError::Provider { .. }
                | HomieError::Stream(_)
                | HomieError::Http(_)
        )
    }
}
