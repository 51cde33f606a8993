//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and fixed exit codes.

use miette::Diagnostic;
use thiserror::Error;

use netrules_config::ConfigError;
use netrules_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Zone ─────────────────────────────────────────────────────────
    #[error("No zone snapshot given")]
    #[diagnostic(
        code(netrules::no_zone),
        help("Pass --zone <FILE> or set NETRULES_ZONE.")
    )]
    NoZone,

    #[error("Could not read zone snapshot {path}")]
    #[diagnostic(
        code(netrules::zone),
        help("The snapshot must be YAML, or JSON when the file ends in .json.")
    )]
    ZoneFormat { path: String, reason: String },

    #[error("Account '{name}' not found in the zone")]
    #[diagnostic(code(netrules::account), help("Known accounts: {available}"))]
    UnknownAccount { name: String, available: String },

    #[error("The zone has several accounts")]
    #[diagnostic(
        code(netrules::account),
        help("Pick one with --account <NAME> or NETRULES_ACCOUNT.\nKnown accounts: {available}")
    )]
    AmbiguousAccount { available: String },

    // ── Rule operations ──────────────────────────────────────────────
    #[error("{entity_type} '{identifier}' not found")]
    #[diagnostic(
        code(netrules::not_found),
        help("Check the UUID against the zone snapshot.")
    )]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("{message}")]
    #[diagnostic(code(netrules::conflict))]
    Conflict { message: String },

    #[error("Permission denied: {message}")]
    #[diagnostic(
        code(netrules::permission),
        help("Run the operation as the owning account or an administrator.")
    )]
    PermissionDenied { message: String },

    #[error("Router unavailable: {resource}")]
    #[diagnostic(
        code(netrules::router_unavailable),
        help(
            "{reason}\n\
             Check the router agent, or use --dry-run to see the commands that would be sent."
        )
    )]
    RouterUnavailable { resource: String, reason: String },

    #[error("Operation '{operation}' is not supported by the {topology} topology")]
    #[diagnostic(code(netrules::unsupported))]
    Unsupported { operation: String, topology: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(netrules::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(netrules::config),
        help("Inspect the resolved configuration with: netrules config show")
    )]
    Config(#[from] ConfigError),

    #[error("Could not set up the router transport: {0}")]
    #[diagnostic(code(netrules::transport))]
    Transport(#[from] netrules_api::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(netrules::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(netrules::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),

    #[error("Could not render output: {0}")]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoZone
            | Self::ZoneFormat { .. }
            | Self::Validation { .. }
            | Self::AmbiguousAccount { .. }
            | Self::Json(_) => exit_code::USAGE,
            Self::NotFound { .. } | Self::UnknownAccount { .. } => exit_code::NOT_FOUND,
            Self::PermissionDenied { .. } | Self::Unsupported { .. } => exit_code::PERMISSION,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::RouterUnavailable { .. } | Self::Transport(_) => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidParameterValue { message } => CliError::Validation {
                field: "request".into(),
                reason: message,
            },

            CoreError::NetworkRuleConflict { message } => CliError::Conflict { message },

            CoreError::PermissionDenied { message } => CliError::PermissionDenied { message },

            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                entity_type: entity_type.into(),
                identifier,
            },

            CoreError::ResourceUnavailable {
                resource, reason, ..
            } => CliError::RouterUnavailable { resource, reason },

            CoreError::Unsupported {
                operation,
                topology,
            } => CliError::Unsupported {
                operation,
                topology,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
