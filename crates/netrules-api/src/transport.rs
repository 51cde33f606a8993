// Transport contract and shared HTTP client configuration.
//
// A transport delivers one `CommandBatch` to one router and reports a
// per-command answer. Batches are processed in order by the agent; with
// `OnError::Stop` the agent stops at the first failed command and answers
// only the commands it attempted.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::command::RouterCommand;
use crate::error::Error;

/// TLS verification mode for the router agent endpoint.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (agents on link-local control networks).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub scheme: String,
    pub agent_port: u16,
    pub tls: TlsMode,
    pub timeout: Duration,
    /// Bearer token presented to the router agent.
    pub token: Option<SecretString>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            scheme: "http".into(),
            agent_port: 3922,
            tls: TlsMode::DangerAcceptInvalid,
            timeout: Duration::from_secs(30),
            token: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(ref token) = self.token {
            let value = reqwest::header::HeaderValue::from_str(&format!(
                "Bearer {}",
                token.expose_secret()
            ))
            .map_err(|e| Error::Tls(format!("invalid agent token: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("netrules/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// Where a batch is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterEndpoint {
    pub name: String,
    pub control_ip: Ipv4Addr,
}

/// Batch failure semantics on the agent side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Stop at the first failed command.
    #[default]
    Stop,
    /// Attempt every command and report each outcome.
    Continue,
}

/// An ordered list of commands for one router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBatch {
    pub commands: Vec<RouterCommand>,
    pub on_error: OnError,
}

impl CommandBatch {
    pub fn new(commands: Vec<RouterCommand>, on_error: OnError) -> Self {
        Self { commands, on_error }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Agent's verdict for one command of a batch, in batch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAnswer {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CommandAnswer {
    pub fn ok() -> Self {
        Self {
            success: true,
            details: None,
        }
    }

    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: Some(details.into()),
        }
    }
}

/// Delivers command batches to router agents.
#[async_trait]
pub trait RouterTransport: Send + Sync {
    /// Send `batch` to `router` and return the per-command answers.
    ///
    /// An `Err` means the exchange itself failed (unreachable, timeout,
    /// malformed reply). Individual command failures come back as answers
    /// with `success == false`.
    async fn send(
        &self,
        router: &RouterEndpoint,
        batch: &CommandBatch,
    ) -> Result<Vec<CommandAnswer>, Error>;
}

/// Convert a batch's answers into a single result.
///
/// Fails on the first unsuccessful answer, or when the agent answered
/// fewer commands than it was sent.
pub fn ensure_success(
    router: &RouterEndpoint,
    batch: &CommandBatch,
    answers: &[CommandAnswer],
) -> Result<(), Error> {
    for (command, answer) in batch.commands.iter().zip(answers) {
        if !answer.success {
            return Err(Error::CommandFailed {
                router: router.name.clone(),
                command: command.kind().to_owned(),
                details: answer
                    .details
                    .clone()
                    .unwrap_or_else(|| "no details".into()),
            });
        }
    }
    if answers.len() < batch.commands.len() {
        return Err(Error::IncompleteAnswer {
            router: router.name.clone(),
            answered: answers.len(),
            sent: batch.commands.len(),
        });
    }
    Ok(())
}
