//! API error types with actionable suggestions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::{ApplianceState, RequestKind};

/// Error codes for protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RequestRejected,
    InvalidInput,
    ControllerUnavailable,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::RequestRejected => write!(f, "REQUEST_REJECTED"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::ControllerUnavailable => write!(f, "CONTROLLER_UNAVAILABLE"),
        }
    }
}

/// An error response with context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// The controller refused a request in its current state.
    pub fn request_rejected(request: RequestKind, state: ApplianceState, busy: bool) -> Self {
        let suggestion = if state == ApplianceState::FatalError {
            "The controller is in a fatal state. Restart the daemon with 'brewpilot stop' and 'brewpilot daemon'".to_string()
        } else if busy {
            "Another request is still running. Poll 'brewpilot status' until busy is false".to_string()
        } else {
            format!(
                "'{}' is only accepted when idle. Run 'brewpilot get-state' or 'brewpilot power-on' first",
                request
            )
        };
        Self {
            code: ErrorCode::RequestRejected,
            message: format!("Request '{}' rejected in state '{}'", request, state),
            suggestion: Some(suggestion),
        }
    }

    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// The controller thread has stopped.
    pub fn controller_unavailable() -> Self {
        Self {
            code: ErrorCode::ControllerUnavailable,
            message: "Controller is not running".to_string(),
            suggestion: Some(
                "Check the daemon log for startup errors, then restart with 'brewpilot daemon'"
                    .into(),
            ),
        }
    }
}
