//! Command dispatch: bridges CLI args -> manager operations -> output formatting.

pub mod config_cmd;
pub mod firewall;
pub mod forwarding;
pub mod ip;
pub mod load_balancer;
pub mod rules;
pub mod services;
pub mod util;
pub mod vpc;

use crate::cli::Command;
use crate::error::CliError;
use crate::output::Ui;
use crate::zone::Session;

/// Dispatch a zone-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, session: &Session, ui: &Ui) -> Result<(), CliError> {
    match cmd {
        Command::Rules(args) => rules::handle(session, args, ui),
        Command::PortForward(args) => forwarding::handle_port_forward(session, args, ui).await,
        Command::StaticNat(args) => forwarding::handle_static_nat(session, args, ui).await,
        Command::Firewall(args) => firewall::handle(session, args, ui).await,
        Command::LoadBalancer(args) => load_balancer::handle(session, args, ui).await,
        Command::Acl(args) => vpc::handle_acl(session, args, ui).await,
        Command::Gateway(args) => vpc::handle_gateway(session, args, ui).await,
        Command::Ip(args) => ip::handle(session, args, ui).await,
        Command::Vpn(args) => services::handle_vpn(session, args, ui).await,
        Command::Vm(args) => services::handle_vm(session, args, ui).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "command does not operate on a zone".into(),
        )),
    }
}
