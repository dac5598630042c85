//! Error taxonomy shared by every login component.
//!
//! Only [`FlowError::PolicyUnsatisfiable`] and [`FlowError::Locked`] are terminal.
//! Everything else leaves the user able to retry without losing the factors the
//! session has already verified.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// Reference or session absent; restart at the identifier step.
    #[error("session not found")]
    NotFound,
    /// Session token rejected by the backend; the stored reference must go.
    #[error("session token rejected")]
    Unauthenticated,
    /// Wrong credential or code.
    #[error("verification failed")]
    ValidationFailed,
    /// A required factor has no eligible channel.
    #[error("login policy cannot be satisfied: {0}")]
    PolicyUnsatisfiable(String),
    /// Backend-reported attempt lockout.
    #[error("account is locked")]
    Locked,
    /// Network or backend failure.
    #[error("identity backend unavailable: {0}")]
    Transient(String),
}

/// Wire-level discriminant of [`FlowError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Unauthenticated,
    ValidationFailed,
    PolicyUnsatisfiable,
    Locked,
    Transient,
}

impl FlowError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::ValidationFailed => ErrorKind::ValidationFailed,
            Self::PolicyUnsatisfiable(_) => ErrorKind::PolicyUnsatisfiable,
            Self::Locked => ErrorKind::Locked,
            Self::Transient(_) => ErrorKind::Transient,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

impl ErrorKind {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PolicyUnsatisfiable | Self::Locked)
    }
}

/// Error attached to a [`Step`](super::Step) for rendering.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    pub terminal: bool,
}

impl From<&FlowError> for StepError {
    fn from(err: &FlowError) -> Self {
        // Verification failures stay generic so they never reveal which part was wrong.
        let message = match err {
            FlowError::ValidationFailed => "The provided credentials are invalid.".to_string(),
            FlowError::Transient(_) => "Something went wrong, please try again.".to_string(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
            terminal: err.is_terminal(),
        }
    }
}

impl From<FlowError> for StepError {
    fn from(err: FlowError) -> Self {
        Self::from(&err)
    }
}
