// In-process transport that records every batch instead of sending it.
//
// Used for dry runs and tests. Failures can be injected per router
// (unreachable, or every command rejected) and per command kind.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Error;
use crate::transport::{CommandAnswer, CommandBatch, OnError, RouterEndpoint, RouterTransport};

/// How an injected router failure manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The exchange fails before any command is attempted.
    Unreachable,
    /// The agent answers, but rejects every command.
    Reject,
}

#[derive(Default)]
struct State {
    sent: Vec<(RouterEndpoint, CommandBatch)>,
    router_failures: HashMap<Ipv4Addr, FailureMode>,
    rejected_kinds: HashSet<&'static str>,
}

/// Records batches and answers them according to injected failures.
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<State>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every exchange with the router at `control_ip` fail.
    pub fn fail_router(&self, control_ip: Ipv4Addr, mode: FailureMode) {
        self.lock().router_failures.insert(control_ip, mode);
    }

    /// Make every command of the given kind (e.g. `"SetPortForwardingRules"`) fail.
    pub fn reject_command(&self, kind: &'static str) {
        self.lock().rejected_kinds.insert(kind);
    }

    /// Remove all injected failures.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.router_failures.clear();
        state.rejected_kinds.clear();
    }

    /// Every batch delivered so far, in delivery order.
    pub fn sent(&self) -> Vec<(RouterEndpoint, CommandBatch)> {
        self.lock().sent.clone()
    }

    /// Drain the recorded batches.
    pub fn take_sent(&self) -> Vec<(RouterEndpoint, CommandBatch)> {
        std::mem::take(&mut self.lock().sent)
    }
}

#[async_trait]
impl RouterTransport for RecordingTransport {
    async fn send(
        &self,
        router: &RouterEndpoint,
        batch: &CommandBatch,
    ) -> Result<Vec<CommandAnswer>, Error> {
        let mut state = self.lock();
        let failure = state.router_failures.get(&router.control_ip).copied();

        if failure == Some(FailureMode::Unreachable) {
            debug!(router = %router.name, "recording transport: router unreachable");
            return Err(Error::Unreachable {
                router: router.name.clone(),
                reason: "injected failure".into(),
            });
        }

        state.sent.push((router.clone(), batch.clone()));

        let mut answers = Vec::with_capacity(batch.commands.len());
        for command in &batch.commands {
            let rejected =
                failure == Some(FailureMode::Reject) || state.rejected_kinds.contains(command.kind());
            if rejected {
                answers.push(CommandAnswer::failed(format!(
                    "{} rejected by injected failure",
                    command.kind()
                )));
                if batch.on_error == OnError::Stop {
                    break;
                }
            } else {
                answers.push(CommandAnswer::ok());
            }
        }
        Ok(answers)
    }
}
