use thiserror::Error;

/// Top-level error type for the `netrules-api` crate.
///
/// Covers every failure mode of a router command exchange: building the
/// HTTP client, reaching the router agent, and the agent rejecting a
/// command. `netrules-core` folds all of these into `ResourceUnavailable`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request to router {router} timed out after {timeout_secs}s")]
    Timeout { router: String, timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Router agent could not be reached at all.
    #[error("Router {router} is unreachable: {reason}")]
    Unreachable { router: String, reason: String },

    // ── Agent responses ─────────────────────────────────────────────
    /// Non-success HTTP status from the router agent.
    #[error("Router {router} answered HTTP {status}: {message}")]
    Status {
        router: String,
        status: u16,
        message: String,
    },

    /// The agent accepted the batch but a command inside it failed.
    #[error("Router {router} rejected {command}: {details}")]
    CommandFailed {
        router: String,
        command: String,
        details: String,
    },

    /// The agent answered fewer commands than were sent.
    #[error("Router {router} answered {answered} of {sent} commands")]
    IncompleteAnswer {
        router: String,
        answered: usize,
        sent: usize,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the router could not be contacted, as opposed to
    /// having been contacted and refusing a command.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::Unreachable { .. } => true,
            _ => false,
        }
    }

    /// The router name the error refers to, when known.
    pub fn router(&self) -> Option<&str> {
        match self {
            Self::Timeout { router, .. }
            | Self::Unreachable { router, .. }
            | Self::Status { router, .. }
            | Self::CommandFailed { router, .. }
            | Self::IncompleteAnswer { router, .. } => Some(router),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_counts_as_unreachable() {
        let err = Error::Timeout {
            router: "r-4-VM".into(),
            timeout_secs: 30,
        };
        assert!(err.is_unreachable());
        assert_eq!(err.router(), Some("r-4-VM"));
    }

    #[test]
    fn rejected_command_is_not_unreachable() {
        let err = Error::CommandFailed {
            router: "r-4-VM".into(),
            command: "SetPortForwardingRules".into(),
            details: "iptables-restore failed".into(),
        };
        assert!(!err.is_unreachable());
        assert_eq!(
            err.to_string(),
            "Router r-4-VM rejected SetPortForwardingRules: iptables-restore failed"
        );
    }
}
