// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// One taxonomy for the engine. Scan lifecycle errors are recovered by the
// caller; manifest and resolution errors are scoped to the report or lookup
// that raised them and never stop ingestion.
// ============================================================================

use std::path::PathBuf;

use thiserror::Error;

use crate::helpers::ClockTime;

// ----------------------------------------------------------------------------
// Core Engine Errors
// ----------------------------------------------------------------------------

/// The main error type for the audit engine.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("{collector} scanner already running, {elapsed} into a run of {requested}")]
    AlreadyRunning {
        collector: String,
        elapsed: ClockTime,
        requested: ClockTime,
    },

    #[error("Event source '{source_name}' unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("Metric manifest {path} unreadable: {message}")]
    ManifestUnreadable { path: PathBuf, message: String },

    #[error("Name resolution failed for '{app_id}': {message}")]
    ResolutionFailure { app_id: String, message: String },

    #[error("Unknown collector '{0}'")]
    UnknownCollector(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telemetry registry error: {0}")]
    Telemetry(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuditError {
    /// Whether the caller can carry on after this error without operator action
    pub fn is_recoverable(&self) -> bool {
        match self {
            AuditError::AlreadyRunning { .. } => true,
            AuditError::SourceUnavailable { .. } => true,
            AuditError::ManifestUnreadable { .. } => true,
            AuditError::ResolutionFailure { .. } => true,
            AuditError::UnknownCollector(_) => true,
            AuditError::Config(_) => false,
            AuditError::Io(_) => true,
            AuditError::Telemetry(_) => false,
            AuditError::Internal(_) => false,
        }
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            AuditError::AlreadyRunning { .. } => "already_running",
            AuditError::SourceUnavailable { .. } => "source_unavailable",
            AuditError::ManifestUnreadable { .. } => "manifest_unreadable",
            AuditError::ResolutionFailure { .. } => "resolution_failure",
            AuditError::UnknownCollector(_) => "unknown_collector",
            AuditError::Config(_) => "config",
            AuditError::Io(_) => "io",
            AuditError::Telemetry(_) => "telemetry",
            AuditError::Internal(_) => "internal",
        }
    }

    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        AuditError::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn manifest_unreadable(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AuditError::ManifestUnreadable {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn resolution_failure(app_id: impl Into<String>, message: impl Into<String>) -> Self {
        AuditError::ResolutionFailure {
            app_id: app_id.into(),
            message: message.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Problems with the layered audit configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("audit config {path} does not exist")]
    MissingFile { path: PathBuf },

    #[error("audit config could not be decoded: {message}")]
    Unparsable { message: String },

    #[error("audit config rejects `{field}`: {reason}")]
    Rejected { field: String, reason: String },

    #[error("audit config needs `{field}` for the selected setup")]
    Required { field: String },
}

impl ConfigError {
    pub fn rejected(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Rejected {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        ConfigError::Required { field: field.into() }
    }
}

// ----------------------------------------------------------------------------
// Result Type Aliases
// ----------------------------------------------------------------------------

/// Standard result type for engine operations
pub type AuditResult<T> = Result<T, AuditError>;
