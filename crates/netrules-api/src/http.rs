// HTTP transport for the router agent.
//
// Each router runs an agent listening on its control IP. A batch is a
// single `POST /v1/commands` with the JSON-encoded `CommandBatch`; the
// agent replies `{ "answers": [...] }` in batch order.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::{CommandAnswer, CommandBatch, RouterEndpoint, RouterTransport, TransportConfig};

#[derive(Deserialize)]
struct AgentReply {
    answers: Vec<CommandAnswer>,
}

/// Router transport over HTTP(S).
pub struct HttpTransport {
    http: reqwest::Client,
    scheme: String,
    port: u16,
    timeout_secs: u64,
    /// Overrides the per-router `scheme://control_ip:port` base (tests, proxies).
    base_override: Option<Url>,
}

impl HttpTransport {
    /// Create a transport from a `TransportConfig`.
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: config.build_client()?,
            scheme: config.scheme.clone(),
            port: config.agent_port,
            timeout_secs: config.timeout.as_secs(),
            base_override: None,
        })
    }

    /// Create a transport that sends every batch to `base_url` regardless of
    /// the router's control IP.
    pub fn with_base_url(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            scheme: base_url.scheme().to_owned(),
            port: base_url.port_or_known_default().unwrap_or(80),
            timeout_secs: 0,
            base_override: Some(base_url),
        }
    }

    pub(crate) fn commands_url(&self, router: &RouterEndpoint) -> Result<Url, Error> {
        let base = match &self.base_override {
            Some(url) => url.as_str().trim_end_matches('/').to_owned(),
            None => format!("{}://{}:{}", self.scheme, router.control_ip, self.port),
        };
        Ok(Url::parse(&format!("{base}/v1/commands"))?)
    }

    fn map_send_error(&self, router: &RouterEndpoint, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                router: router.name.clone(),
                timeout_secs: self.timeout_secs,
            }
        } else if err.is_connect() {
            Error::Unreachable {
                router: router.name.clone(),
                reason: err.to_string(),
            }
        } else {
            Error::Transport(err)
        }
    }
}

#[async_trait]
impl RouterTransport for HttpTransport {
    async fn send(
        &self,
        router: &RouterEndpoint,
        batch: &CommandBatch,
    ) -> Result<Vec<CommandAnswer>, Error> {
        let url = self.commands_url(router)?;
        debug!(router = %router.name, commands = batch.commands.len(), "POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(batch)
            .send()
            .await
            .map_err(|e| self.map_send_error(router, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                router: router.name.clone(),
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        trace!(router = %router.name, body = %body, "agent reply");

        let reply: AgentReply = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })?;
        Ok(reply.answers)
    }
}
