//! Error types for the lesson generation engine.
//!
//! This module defines the error hierarchy for all engine operations,
//! including configuration loading, request validation, content provider
//! calls, filesystem output, job management and archive creation.

use std::path::PathBuf;

/// A specialized `Result` type for lesson generation operations.
pub type Result<T> = std::result::Result<T, LessonError>;

/// Errors that can occur while generating lessons.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help users resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum LessonError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your lessongen.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Request Validation Errors
    // ========================================================================
    /// The generation request was rejected before any work started.
    #[error("Invalid request ({field}): {message}\n\nSuggestion: {suggestion}")]
    InvalidRequest {
        /// The request field that failed validation.
        field: String,
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// AI content was requested but no text service is configured.
    #[error("AI content requested but no text service is available\n\nSuggestion: Set the {api_key_env} environment variable or disable AI content")]
    AiUnavailable {
        /// Environment variable expected to hold the API key.
        api_key_env: String,
    },

    // ========================================================================
    // Template Errors
    // ========================================================================
    /// A template body could not be parsed.
    #[error("Malformed template '{name}': {message}")]
    TemplateSyntax {
        /// Name or path of the template.
        name: String,
        /// Description of the syntax problem.
        message: String,
    },

    // ========================================================================
    // Content Provider Errors
    // ========================================================================
    /// The external text service failed or returned unusable content.
    #[error("Content provider error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    ProviderError {
        /// The class of provider failure.
        kind: ProviderErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Output Errors
    // ========================================================================
    /// The topic output directory already exists and is not empty.
    #[error("Output directory '{path}' already exists and is not empty\n\nSuggestion: Choose a fresh output directory or clear the existing one")]
    OutputExists {
        /// The conflicting directory.
        path: PathBuf,
    },

    /// An artifact path was written twice within one run.
    #[error("Artifact '{path}' was already written in this run\n\nSuggestion: Check for duplicate module names in the topic plan")]
    ArtifactCollision {
        /// The colliding path.
        path: PathBuf,
    },

    /// Writing a generated file failed.
    #[error("Failed to write '{path}': {message}\n\nSuggestion: Check write permissions and available disk space")]
    WriteError {
        /// Path of the file being written.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The lesson directory to validate cannot be read.
    #[error("Cannot read lesson directory '{path}': {message}")]
    LessonUnreadable {
        /// Path to the lesson root.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Generation was stopped by a cancellation request.
    #[error("Generation cancelled by request")]
    Cancelled,

    // ========================================================================
    // Job Errors
    // ========================================================================
    /// No job with the given id exists.
    #[error("Lesson generation job '{id}' not found")]
    JobNotFound {
        /// The requested job id.
        id: String,
    },

    /// The job is still running and cannot be deleted.
    #[error("Lesson generation job '{id}' is still {status}\n\nSuggestion: Wait for the job to finish or cancel it first")]
    JobNotTerminal {
        /// The job id.
        id: String,
        /// The job's current status.
        status: String,
    },

    /// The job already reached a terminal state.
    #[error("Lesson generation job '{id}' already finished ({status})")]
    JobAlreadyFinished {
        /// The job id.
        id: String,
        /// The job's terminal status.
        status: String,
    },

    /// The job output is not available because the job has not completed.
    #[error("Lesson generation job '{id}' is not completed (status: {status})")]
    JobNotCompleted {
        /// The job id.
        id: String,
        /// The job's current status.
        status: String,
    },

    /// Building the download archive failed.
    #[error("Failed to create lesson archive: {message}")]
    ArchiveError {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

/// Categories of text service failures.
///
/// The strict/lenient policy and the retry loop both key off this
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// The call did not finish within the configured timeout.
    Timeout,
    /// The service rejected the request as invalid.
    InvalidRequest,
    /// The response could not be turned into usable content.
    MalformedResponse,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::InvalidRequest => write!(f, "invalid_request"),
            Self::MalformedResponse => write!(f, "malformed_response"),
        }
    }
}

impl ProviderErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check your API key or credentials",
            Self::RateLimit => "Wait and retry, or lower ai.maxConcurrentRequests",
            Self::Server => "Retry later; the text service may be experiencing issues",
            Self::Network => "Check your network connection and ai.baseUrl",
            Self::Timeout => "Increase ai.requestTimeoutSecs or retry later",
            Self::InvalidRequest => "Check the configured model name and token limits",
            Self::MalformedResponse => {
                "Retry, or run in lenient mode to fall back to built-in content"
            }
        }
    }

    /// Returns `true` if failures of this kind are worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Server | Self::Network | Self::Timeout
        )
    }
}

impl LessonError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(
        field: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `TemplateSyntax` error.
    #[must_use]
    pub fn template_syntax(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateSyntax {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ProviderError` with automatic suggestion based on error kind.
    #[must_use]
    pub fn provider(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::ProviderError {
            kind,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates a new `OutputExists` error.
    #[must_use]
    pub fn output_exists(path: impl Into<PathBuf>) -> Self {
        Self::OutputExists { path: path.into() }
    }

    /// Creates a new `ArtifactCollision` error.
    #[must_use]
    pub fn artifact_collision(path: impl Into<PathBuf>) -> Self {
        Self::ArtifactCollision { path: path.into() }
    }

    /// Creates a new `WriteError`.
    #[must_use]
    pub fn write(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::WriteError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `LessonUnreadable` error.
    #[must_use]
    pub fn lesson_unreadable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LessonUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `JobNotFound` error.
    #[must_use]
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound { id: id.into() }
    }

    /// Creates a new `JobNotTerminal` error.
    #[must_use]
    pub fn job_not_terminal(id: impl Into<String>, status: impl std::fmt::Display) -> Self {
        Self::JobNotTerminal {
            id: id.into(),
            status: status.to_string(),
        }
    }

    /// Creates a new `JobAlreadyFinished` error.
    #[must_use]
    pub fn job_already_finished(id: impl Into<String>, status: impl std::fmt::Display) -> Self {
        Self::JobAlreadyFinished {
            id: id.into(),
            status: status.to_string(),
        }
    }

    /// Creates a new `JobNotCompleted` error.
    #[must_use]
    pub fn job_not_completed(id: impl Into<String>, status: impl std::fmt::Display) -> Self {
        Self::JobNotCompleted {
            id: id.into(),
            status: status.to_string(),
        }
    }

    /// Creates a new `ArchiveError`.
    #[must_use]
    pub fn archive(message: impl Into<String>) -> Self {
        Self::ArchiveError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns the provider error kind, if this is a provider failure.
    #[must_use]
    pub const fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::ProviderError { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderError {
                kind: ProviderErrorKind::RateLimit
                    | ProviderErrorKind::Server
                    | ProviderErrorKind::Network
                    | ProviderErrorKind::Timeout,
                ..
            }
        )
    }

    /// Returns `true` if this error rejects a request before any job exists.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. } | Self::AiUnavailable { .. }
        )
    }

    /// Returns `true` if this error is fatal and requires immediate termination.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::InvalidRequest { .. }
                | Self::AiUnavailable { .. }
                | Self::ProviderError {
                    kind: ProviderErrorKind::Authentication,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = LessonError::output_exists("/tmp/lessons/python_basics");
        let msg = err.to_string();
        assert!(msg.contains("already exists"));
        assert!(msg.contains("/tmp/lessons/python_basics"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_provider_error_kind_display() {
        assert_eq!(ProviderErrorKind::RateLimit.to_string(), "rate_limit");
        assert_eq!(ProviderErrorKind::Authentication.to_string(), "authentication");
        assert_eq!(
            ProviderErrorKind::MalformedResponse.to_string(),
            "malformed_response"
        );
    }

    #[test]
    fn test_provider_error_carries_suggestion() {
        let err = LessonError::provider(ProviderErrorKind::Timeout, "no answer after 30s");
        let msg = err.to_string();
        assert!(msg.contains("timeout"));
        assert!(msg.contains("requestTimeoutSecs"));
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Timeout));
    }

    #[test]
    fn test_is_transient() {
        let rate_limit = LessonError::provider(ProviderErrorKind::RateLimit, "Too many requests");
        assert!(rate_limit.is_transient());

        let timeout = LessonError::provider(ProviderErrorKind::Timeout, "slow");
        assert!(timeout.is_transient());

        let auth_error = LessonError::provider(ProviderErrorKind::Authentication, "Invalid key");
        assert!(!auth_error.is_transient());

        let malformed = LessonError::provider(ProviderErrorKind::MalformedResponse, "empty");
        assert!(!malformed.is_transient());

        assert!(!LessonError::Cancelled.is_transient());
    }

    #[test]
    fn test_is_fatal() {
        let auth_error = LessonError::provider(ProviderErrorKind::Authentication, "Invalid key");
        assert!(auth_error.is_fatal());

        let invalid = LessonError::invalid_request("modules", "out of range", "use 1-10");
        assert!(invalid.is_fatal());
        assert!(invalid.is_validation());

        let rate_limit = LessonError::provider(ProviderErrorKind::RateLimit, "Too many requests");
        assert!(!rate_limit.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: LessonError = io_err.into();
        assert!(matches!(err, LessonError::Io(_)));
    }

    #[test]
    fn test_job_errors_are_distinct() {
        let missing = LessonError::job_not_found("lesson_1234abcd");
        assert!(missing.to_string().contains("not found"));

        let running = LessonError::job_not_terminal("lesson_1234abcd", "processing");
        assert!(running.to_string().contains("still processing"));
        assert!(!running.to_string().contains("not found"));
    }
}
