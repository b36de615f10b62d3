#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod case_type;
pub mod config;
pub mod controller;
pub mod event;
pub mod model;
pub mod params;
pub mod stages;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::{FailureKind, RemoteFailure};
use crate::case_type::CaseTypeError;
use crate::config::{ConfigError, NameError};
use crate::controller::CaseError;
use crate::params::ParamFileError;

pub use app::{App, Model, ViewModel};
pub use capabilities::{Capabilities, Effect};
pub use controller::{CaseController, CaseEvent, Directive};
pub use crux_core::{render::Render, App as CruxApp};
pub use event::Event;

pub const DEFAULT_PARAM_FILE_NAME: &str = ".caseParams";
pub const DEFAULT_MAX_CASE_NAME_LEN: usize = 64;
pub const DEFAULT_JOB_NAME_PREFIX: &str = "cwe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Busy,
    Validation,
    NotFound,
    Conflict,
    InvalidState,
    Remote,
    Disconnected,
    Serialization,
    Deserialization,
    Configuration,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Busy => "CASE_BUSY",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::InvalidState => "INVALID_STATE",
            Self::Remote => "REMOTE_ERROR",
            Self::Disconnected => "DISCONNECTED",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Busy | Self::Conflict | Self::Remote | Self::Disconnected => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Deserialization | Self::InvalidState | Self::Internal => {
                ErrorSeverity::Fatal
            }

            Self::Validation | Self::NotFound | Self::Configuration => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Busy | Self::Remote | Self::Disconnected)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Busy => {
                "The case is busy with another operation. Please wait for it to finish.".into()
            }
            ErrorKind::Validation | ErrorKind::Conflict => self.message.clone(),
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::InvalidState => {
                "This case can no longer be used. Please reopen it.".into()
            }
            ErrorKind::Remote => {
                "The remote service could not complete the request. Please try again.".into()
            }
            ErrorKind::Disconnected => {
                "The connection to the remote service was lost. Please reconnect.".into()
            }
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "The case data could not be read. The parameter file may be damaged.".into()
            }
            ErrorKind::Configuration => {
                "The application is misconfigured. Please contact support.".into()
            }
            ErrorKind::Internal => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<CaseError> for AppError {
    fn from(e: CaseError) -> Self {
        let kind = match &e {
            CaseError::Busy { .. } => ErrorKind::Busy,
            CaseError::Defunct | CaseError::UnknownCaseType | CaseError::NoCaseFolder => {
                ErrorKind::InvalidState
            }
            CaseError::UnknownStage(_) => ErrorKind::NotFound,
            CaseError::StageNotRunnable { .. }
            | CaseError::StageNotRollbackable { .. }
            | CaseError::NoRunningJob(_)
            | CaseError::FrozenParameter { .. } => ErrorKind::Conflict,
            CaseError::InvalidName(_)
            | CaseError::UnknownParameter(_)
            | CaseError::NoChanges
            | CaseError::EmptyDestination => ErrorKind::Validation,
            CaseError::ParamFile(inner) => return Self::from(inner.clone()),
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<ParamFileError> for AppError {
    fn from(e: ParamFileError) -> Self {
        let kind = match e {
            ParamFileError::Malformed(_) | ParamFileError::EmptyType => ErrorKind::Deserialization,
            ParamFileError::Serialize(_) => ErrorKind::Serialization,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<CaseTypeError> for AppError {
    fn from(e: CaseTypeError) -> Self {
        AppError::new(ErrorKind::Configuration, "Invalid case type definition")
            .with_internal(e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, "Invalid configuration").with_internal(e.to_string())
    }
}

impl From<NameError> for AppError {
    fn from(e: NameError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<RemoteFailure> for AppError {
    fn from(e: RemoteFailure) -> Self {
        let kind = match e.kind {
            FailureKind::Rejected => ErrorKind::Remote,
            FailureKind::NotFound => ErrorKind::NotFound,
            FailureKind::Disconnected => ErrorKind::Disconnected,
        };
        AppError::new(kind, e.message)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserFacingError {
    pub message: String,
    pub is_transient: bool,
    pub is_retryable: bool,
    pub error_code: String,
}

impl From<&AppError> for UserFacingError {
    fn from(e: &AppError) -> Self {
        Self {
            message: e.user_facing_message(),
            is_transient: e.severity == ErrorSeverity::Transient,
            is_retryable: e.is_retryable(),
            error_code: e.code().to_string(),
        }
    }
}
