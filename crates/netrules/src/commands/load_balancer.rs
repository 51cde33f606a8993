//! Load balancer command handlers.

use netrules_core::CreateLoadBalancerRequest;
use netrules_core::model::{LbAlgorithm, LoadBalancingRule};
use tabled::Tabled;

use crate::cli::{LbAlgorithmArg, LoadBalancerArgs, LoadBalancerCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "Address")]
    ip: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Weight")]
    weight: u32,
    #[tabled(rename = "State")]
    state: String,
}

fn detail(session: &Session, lb: &LoadBalancingRule) -> String {
    let rule = &lb.rule;
    let header = [
        format!("UUID:      {}", rule.uuid),
        format!("Name:      {}", lb.name),
        format!(
            "Public IP: {}:{}",
            util::ip_label(&session.store, rule.source_ip_address_id),
            lb.public_port()
        ),
        format!("Protocol:  {}", rule.protocol),
        format!("Algorithm: {}", lb.algorithm),
        format!("State:     {}", rule.state),
    ]
    .join("\n");

    if lb.destinations.is_empty() {
        return header;
    }
    let rows: Vec<MemberRow> = lb
        .destinations
        .iter()
        .map(|d| MemberRow {
            ip: d.ip.to_string(),
            port: d.port,
            weight: d.weight,
            state: d.state.to_string(),
        })
        .collect();
    let members = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    format!("{header}\n{members}")
}

fn algorithm(arg: LbAlgorithmArg) -> LbAlgorithm {
    match arg {
        LbAlgorithmArg::Source => LbAlgorithm::Source,
        LbAlgorithmArg::Roundrobin => LbAlgorithm::RoundRobin,
        LbAlgorithmArg::Leastconn => LbAlgorithm::LeastConn,
    }
}

fn render(session: &Session, ui: &Ui, lb: &LoadBalancingRule) -> Result<(), CliError> {
    let out = output::render_single(
        ui.format,
        lb,
        |lb| detail(session, lb),
        |lb| lb.rule.uuid.to_string(),
    )?;
    ui.result(&out);
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: &Session, args: LoadBalancerArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        LoadBalancerCommand::Create {
            from_file,
            name,
            ip,
            network,
            protocol,
            public_port,
            private_port,
            algorithm: algo,
        } => {
            let request = if let Some(ref path) = from_file {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str::<CreateLoadBalancerRequest>(&text)?
            } else {
                let missing = |field: &str| CliError::Validation {
                    field: field.into(),
                    reason: "required without --from-file".into(),
                };
                CreateLoadBalancerRequest {
                    uuid: None,
                    name: name.ok_or_else(|| missing("name"))?,
                    ip_address: ip.ok_or_else(|| missing("ip"))?,
                    network,
                    protocol,
                    public_port: public_port.ok_or_else(|| missing("public-port"))?,
                    private_port: private_port.ok_or_else(|| missing("private-port"))?,
                    algorithm: algo.map(algorithm),
                    stickiness: Vec::new(),
                    health_checks: Vec::new(),
                    ssl_cert: None,
                }
            };
            let lb = manager
                .provision_load_balancer_rule(&request, caller)
                .await?;
            ui.success(&format!("Load balancer rule '{}' programmed", lb.name));
            render(session, ui, &lb)
        }

        LoadBalancerCommand::Assign { rule, vms } => {
            let lb = manager.assign_to_load_balancer(rule, &vms, caller).await?;
            ui.success(&format!("{} member(s) assigned to '{}'", vms.len(), lb.name));
            render(session, ui, &lb)
        }

        LoadBalancerCommand::Remove { rule, vms } => {
            let lb = manager.remove_from_load_balancer(rule, &vms, caller).await?;
            ui.success(&format!("{} member(s) removed from '{}'", vms.len(), lb.name));
            render(session, ui, &lb)
        }

        LoadBalancerCommand::Delete { rule } => {
            manager.delete_load_balancer_rule(rule, caller).await?;
            ui.success(&format!("Load balancer rule {rule} deleted"));
            Ok(())
        }

        LoadBalancerCommand::Apply { network, apply } => {
            let applied = manager
                .apply_load_balancer_rules(network, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "Load balancer rules", applied);
            Ok(())
        }
    }
}
