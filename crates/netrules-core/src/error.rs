// ── Core error types ──
//
// User-facing errors from netrules-core. Consumers never see transport
// details directly: the `From<netrules_api::Error>` impl folds every
// router exchange failure into `ResourceUnavailable`.
//
// Messages reference resources by UUID or address only. Row ids have no
// `Display` impl, so they cannot leak into a message by accident.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    /// Malformed or missing input, or a resource not in a usable state.
    #[error("Invalid parameter: {message}")]
    InvalidParameterValue { message: String },

    /// The conflict detector vetoed a new rule.
    #[error("Network rule conflict: {message}")]
    NetworkRuleConflict { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    // ── Dispatch errors ──────────────────────────────────────────────
    /// A router could not be programmed. `unreachable` distinguishes a
    /// router that never answered from one that rejected a command.
    #[error("Resource unavailable: {resource}: {reason}")]
    ResourceUnavailable {
        resource: String,
        reason: String,
        unreachable: bool,
    },

    #[error("Operation not supported: {operation} (topology {topology})")]
    Unsupported { operation: String, topology: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    /// Invariant violation in the store or the manager. The current
    /// operation is aborted.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameterValue {
            message: message.into(),
        }
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::NetworkRuleConflict {
            message: message.into(),
        }
    }

    pub(crate) fn denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity_type: &'static str, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            identifier: identifier.to_string(),
        }
    }

    pub(crate) fn unavailable(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            resource: resource.into(),
            reason: reason.into(),
            unreachable: false,
        }
    }

    /// `true` for router programming failures, the only kind that
    /// triggers compensation.
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable { .. })
    }

    /// `true` when a router never answered (connect failure or timeout).
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::ResourceUnavailable {
                unreachable: true,
                ..
            }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<netrules_api::Error> for CoreError {
    fn from(err: netrules_api::Error) -> Self {
        let unreachable = err.is_unreachable();
        let resource = err
            .router()
            .map_or_else(|| "router".to_owned(), |r| format!("router {r}"));
        Self::ResourceUnavailable {
            resource,
            reason: err.to_string(),
            unreachable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_unreachable_resource() {
        let err: CoreError = netrules_api::Error::Timeout {
            router: "r-2-VM".into(),
            timeout_secs: 30,
        }
        .into();
        assert!(err.is_resource_unavailable());
        assert!(err.is_unreachable());
        assert!(err.to_string().starts_with("Resource unavailable: router r-2-VM"));
    }

    #[test]
    fn rejected_command_is_reachable_failure() {
        let err: CoreError = netrules_api::Error::CommandFailed {
            router: "r-2-VM".into(),
            command: "SetStaticNatRules".into(),
            details: "iptables failed".into(),
        }
        .into();
        assert!(err.is_resource_unavailable());
        assert!(!err.is_unreachable());
    }

    #[test]
    fn not_found_names_the_entity() {
        let err = CoreError::not_found("IP address", "203.0.113.7");
        assert_eq!(err.to_string(), "IP address not found: 203.0.113.7");
    }
}
