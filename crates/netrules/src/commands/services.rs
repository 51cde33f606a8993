//! VPN user and per-VM service command handlers.

use netrules_core::AddVpnUserRequest;

use crate::cli::{VmArgs, VmCommand, VpnArgs, VpnCommand};
use crate::error::CliError;
use crate::output::{self, Ui};
use crate::zone::Session;

use super::util;

pub async fn handle_vpn(session: &Session, args: VpnArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        VpnCommand::AddUser {
            network,
            username,
            password,
            uuid,
        } => {
            let request = AddVpnUserRequest {
                uuid,
                network,
                username,
                password,
            };
            let user = manager.add_vpn_user(&request, caller).await?;
            ui.success(&format!("VPN user '{}' added", user.username));
            // Never echo the password back.
            let summary = serde_json::json!({
                "uuid": user.uuid,
                "username": user.username,
                "state": user.state,
            });
            let out = output::render_single(
                ui.format,
                &summary,
                |_| {
                    format!(
                        "UUID:     {}\nUsername: {}\nState:    {}",
                        user.uuid, user.username, user.state
                    )
                },
                |_| user.uuid.to_string(),
            )?;
            ui.result(&out);
            Ok(())
        }

        VpnCommand::RemoveUser { user, network } => {
            manager.remove_vpn_user(network, user, caller).await?;
            ui.success(&format!("VPN user {user} removed"));
            Ok(())
        }

        VpnCommand::Apply { network, apply } => {
            let applied = manager
                .apply_vpn_users(network, apply.continue_on_error, caller)
                .await?;
            util::report_apply(ui, "VPN users", applied);
            Ok(())
        }
    }
}

pub async fn handle_vm(session: &Session, args: VmArgs, ui: &Ui) -> Result<(), CliError> {
    let manager = &session.manager;
    let caller = &session.caller;

    match args.command {
        VmCommand::Dhcp { vm, network } => {
            let applied = manager.add_dhcp_entry(vm, network, caller).await?;
            util::report_apply(ui, "DHCP entry", applied);
            Ok(())
        }

        VmCommand::Password {
            vm,
            network,
            password,
        } => {
            let applied = manager.save_password(vm, network, &password, caller).await?;
            util::report_apply(ui, "Password", applied);
            Ok(())
        }

        VmCommand::RevokeRules { vm } => {
            let applied = manager.revoke_rules_for_vm(vm, caller).await?;
            util::report_apply(ui, "Rule revocation", applied);
            Ok(())
        }
    }
}
