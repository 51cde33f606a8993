//! Clap derive structures for the `netrules` CLI.
//!
//! Defines the command tree, global flags, and shared argument types.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// netrules -- program network rules onto virtual routers
#[derive(Debug, Parser)]
#[command(
    name = "netrules",
    version,
    about = "Manage virtual-router network rules from the command line",
    long_about = "Runs rule operations (port forwarding, static NAT, firewall, load \
        balancing, network ACLs, VPN users, DHCP) against a zone snapshot and \
        programs the affected virtual routers.\n\n\
        Use --dry-run to record the router commands instead of sending them.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Zone snapshot (YAML, or JSON by extension)
    #[arg(long, short = 'z', env = "NETRULES_ZONE", global = true)]
    pub zone: Option<PathBuf>,

    /// Account the operation runs as (name or UUID)
    #[arg(long, short = 'a', env = "NETRULES_ACCOUNT", global = true)]
    pub account: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "NETRULES_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Record router commands instead of sending them
    #[arg(long, short = 'n', global = true, conflicts_with = "write")]
    pub dry_run: bool,

    /// Write the updated snapshot back to the zone file
    #[arg(long, short = 'w', global = true)]
    pub write: bool,

    /// Output format (overrides [output] format)
    #[arg(long, short = 'o', env = "NETRULES_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output (overrides [output] color)
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List persisted rules
    Rules(RulesArgs),

    /// Manage port forwarding rules
    #[command(alias = "pf")]
    PortForward(PortForwardArgs),

    /// Manage static NAT and its port-scoped rules
    #[command(alias = "nat")]
    StaticNat(StaticNatArgs),

    /// Manage ingress and egress firewall rules
    #[command(alias = "fw")]
    Firewall(FirewallArgs),

    /// Manage load balancer rules and their members
    #[command(alias = "lb")]
    LoadBalancer(LoadBalancerArgs),

    /// Manage network ACL items of VPC tiers
    Acl(AclArgs),

    /// Manage VPC private gateways
    #[command(alias = "gw")]
    Gateway(GatewayArgs),

    /// Associate, release and reprogram public IP addresses
    Ip(IpArgs),

    /// Manage remote-access VPN users
    Vpn(VpnArgs),

    /// Per-VM router services (DHCP, password, rule cleanup)
    Vm(VmArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Shared Arguments ─────────────────────────────────────────────────

/// Inclusive port span, written `22` or `8000-8010`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpan {
    pub start: u16,
    pub end: u16,
}

impl FromStr for PortSpan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| format!("invalid port '{part}'"))
        };
        match s.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if end < start {
                    return Err(format!("range '{s}' ends before it starts"));
                }
                Ok(Self { start, end })
            }
            None => {
                let port = parse(s)?;
                Ok(Self {
                    start: port,
                    end: port,
                })
            }
        }
    }
}

/// Flag shared by every `apply` subcommand.
#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// Keep going when a router cannot be reached
    #[arg(long)]
    pub continue_on_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  RULES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List rules, optionally filtered
    #[command(alias = "ls")]
    List {
        /// Only rules on this public IP (UUID)
        #[arg(long)]
        ip: Option<Uuid>,

        /// Only rules in this network (UUID)
        #[arg(long)]
        network: Option<Uuid>,

        /// Only rules of this purpose
        #[arg(long)]
        purpose: Option<PurposeArg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PurposeArg {
    Firewall,
    PortForwarding,
    StaticNat,
    LoadBalancing,
    Vpn,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  PORT FORWARDING
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct PortForwardArgs {
    #[command(subcommand)]
    pub command: PortForwardCommand,
}

#[derive(Debug, Subcommand)]
pub enum PortForwardCommand {
    /// Create a rule and program it
    Create {
        /// Public IP address (UUID)
        #[arg(long)]
        ip: Uuid,

        /// Target VM (UUID)
        #[arg(long)]
        vm: Uuid,

        /// Guest network (UUID); defaults to the IP's network
        #[arg(long)]
        network: Option<Uuid>,

        /// VM address to forward to; defaults to its address in the network
        #[arg(long)]
        vm_ip: Option<Ipv4Addr>,

        /// tcp or udp
        #[arg(long, short = 'P', default_value = "tcp")]
        protocol: String,

        /// Public port or range
        #[arg(long, value_name = "PORT[-PORT]")]
        public_port: PortSpan,

        /// Private port or range; defaults to the public one
        #[arg(long, value_name = "PORT[-PORT]")]
        private_port: Option<PortSpan>,

        /// Allowed source CIDRs (repeatable)
        #[arg(long = "source-cidr", value_name = "CIDR")]
        source_cidrs: Vec<String>,

        /// Also open the public ports in the firewall
        #[arg(long)]
        open_firewall: bool,

        /// Idempotency token
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Revoke a rule and reprogram its IP
    Revoke {
        /// Rule UUID
        rule: Uuid,
    },

    /// Reprogram every port forwarding rule of an IP
    Apply {
        /// Public IP address (UUID)
        ip: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  STATIC NAT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct StaticNatArgs {
    #[command(subcommand)]
    pub command: StaticNatCommand,
}

#[derive(Debug, Subcommand)]
pub enum StaticNatCommand {
    /// Map a public IP one-to-one onto a VM
    Enable {
        /// Public IP address (UUID)
        #[arg(long)]
        ip: Uuid,

        /// Target VM (UUID)
        #[arg(long)]
        vm: Uuid,

        /// Guest network (UUID)
        #[arg(long)]
        network: Option<Uuid>,

        /// VM address to map onto
        #[arg(long)]
        vm_ip: Option<Ipv4Addr>,
    },

    /// Remove the mapping of a public IP
    Disable {
        /// Public IP address (UUID)
        ip: Uuid,
    },

    /// Create a port-scoped rule on a static NAT address
    CreateRule {
        /// Public IP address (UUID)
        #[arg(long)]
        ip: Uuid,

        /// tcp, udp, icmp or all
        #[arg(long, short = 'P', default_value = "tcp")]
        protocol: String,

        /// Port or range (tcp/udp only)
        #[arg(long, value_name = "PORT[-PORT]")]
        port: Option<PortSpan>,

        /// Also open the ports in the firewall
        #[arg(long)]
        open_firewall: bool,

        /// Idempotency token
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Revoke a port-scoped static NAT rule
    RevokeRule {
        /// Rule UUID
        rule: Uuid,
    },

    /// Reprogram the static NAT rules of an IP
    Apply {
        /// Public IP address (UUID)
        ip: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },

    /// Reprogram every one-to-one mapping of a network
    ApplyNetwork {
        /// Guest network (UUID)
        network: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  FIREWALL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct FirewallArgs {
    #[command(subcommand)]
    pub command: FirewallCommand,
}

#[derive(Debug, Subcommand)]
pub enum FirewallCommand {
    /// Create a rule and program it
    #[command(group(
        clap::ArgGroup::new("target").required(true).args(["ip", "network"])
    ))]
    Create {
        /// Public IP for an ingress rule (UUID)
        #[arg(long)]
        ip: Option<Uuid>,

        /// Guest network for an egress rule (UUID)
        #[arg(long)]
        network: Option<Uuid>,

        /// tcp, udp, icmp or all
        #[arg(long, short = 'P', default_value = "tcp")]
        protocol: String,

        /// Port or range (tcp/udp only)
        #[arg(long, value_name = "PORT[-PORT]")]
        port: Option<PortSpan>,

        /// Source CIDRs (repeatable)
        #[arg(long = "source-cidr", value_name = "CIDR")]
        source_cidrs: Vec<String>,

        /// Destination CIDRs, egress only (repeatable)
        #[arg(long = "dest-cidr", value_name = "CIDR")]
        dest_cidrs: Vec<String>,

        /// ICMP type (-1 for any)
        #[arg(long, allow_negative_numbers = true)]
        icmp_type: Option<i32>,

        /// ICMP code (-1 for any)
        #[arg(long, allow_negative_numbers = true)]
        icmp_code: Option<i32>,

        /// Idempotency token
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Revoke a rule and reprogram its target
    Revoke {
        /// Rule UUID
        rule: Uuid,
    },

    /// Reprogram the ingress rules of an IP
    Apply {
        /// Public IP address (UUID)
        ip: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },

    /// Reprogram the egress rules of a network
    ApplyEgress {
        /// Guest network (UUID)
        network: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  LOAD BALANCER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct LoadBalancerArgs {
    #[command(subcommand)]
    pub command: LoadBalancerCommand,
}

#[derive(Debug, Subcommand)]
pub enum LoadBalancerCommand {
    /// Create a rule and program it
    Create {
        /// Request as JSON (stickiness, health checks and certificates
        /// are only settable this way)
        #[arg(long, short = 'F', conflicts_with_all = ["name", "ip", "public_port", "private_port"])]
        from_file: Option<PathBuf>,

        /// Rule name
        #[arg(long, required_unless_present = "from_file")]
        name: Option<String>,

        /// Public IP address (UUID)
        #[arg(long, required_unless_present = "from_file")]
        ip: Option<Uuid>,

        /// Guest network (UUID)
        #[arg(long)]
        network: Option<Uuid>,

        /// tcp or udp
        #[arg(long, short = 'P', default_value = "tcp")]
        protocol: String,

        /// Public port
        #[arg(long, required_unless_present = "from_file")]
        public_port: Option<u16>,

        /// Port the members listen on
        #[arg(long, required_unless_present = "from_file")]
        private_port: Option<u16>,

        /// Balancing algorithm; defaults to the configured one
        #[arg(long)]
        algorithm: Option<LbAlgorithmArg>,
    },

    /// Add VMs to a rule
    Assign {
        /// Rule UUID
        rule: Uuid,

        /// VM UUIDs (repeatable)
        #[arg(long = "vm", required = true)]
        vms: Vec<Uuid>,
    },

    /// Remove VMs from a rule
    Remove {
        /// Rule UUID
        rule: Uuid,

        /// VM UUIDs (repeatable)
        #[arg(long = "vm", required = true)]
        vms: Vec<Uuid>,
    },

    /// Revoke a rule and reprogram its network
    Delete {
        /// Rule UUID
        rule: Uuid,
    },

    /// Reprogram every load balancer rule of a network
    Apply {
        /// Guest network (UUID)
        network: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LbAlgorithmArg {
    Source,
    Roundrobin,
    Leastconn,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  ACL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct AclArgs {
    #[command(subcommand)]
    pub command: AclCommand,
}

#[derive(Debug, Subcommand)]
pub enum AclCommand {
    /// List the ACL items of a tier, in evaluation order
    #[command(alias = "ls")]
    List {
        /// VPC tier (UUID)
        network: Uuid,
    },

    /// Create an item and program the tier
    Create {
        /// VPC tier (UUID)
        #[arg(long)]
        network: Uuid,

        /// Evaluation position; defaults to after the last item
        #[arg(long)]
        number: Option<u32>,

        /// tcp, udp, icmp or all
        #[arg(long, short = 'P', default_value = "all")]
        protocol: String,

        /// Port or range (tcp/udp only)
        #[arg(long, value_name = "PORT[-PORT]")]
        port: Option<PortSpan>,

        /// Matched CIDRs (repeatable)
        #[arg(long = "cidr", value_name = "CIDR")]
        cidrs: Vec<String>,

        /// allow or deny
        #[arg(long, default_value = "allow")]
        action: AclActionArg,

        /// Match outbound instead of inbound traffic
        #[arg(long)]
        egress: bool,

        /// Idempotency token
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Revoke an item and reprogram its tier
    Revoke {
        /// Item UUID
        item: Uuid,
    },

    /// Reprogram the ACL of a tier
    Apply {
        /// VPC tier (UUID)
        network: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AclActionArg {
    Allow,
    Deny,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  PRIVATE GATEWAYS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct GatewayArgs {
    #[command(subcommand)]
    pub command: GatewayCommand,
}

#[derive(Debug, Subcommand)]
pub enum GatewayCommand {
    /// Create a private gateway and plug it into the VPC router
    Create {
        /// VPC (UUID)
        #[arg(long)]
        vpc: Uuid,

        /// The VPC router's address on the private VLAN
        #[arg(long)]
        ip: Ipv4Addr,

        /// Next hop on the private VLAN
        #[arg(long)]
        gateway: Ipv4Addr,

        #[arg(long)]
        netmask: Ipv4Addr,

        /// Broadcast URI of the private VLAN, e.g. vlan://300
        #[arg(long)]
        vlan: String,

        /// Source-NAT VPC traffic leaving through the gateway
        #[arg(long)]
        source_nat: bool,

        /// Idempotency token
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Unplug and delete a private gateway
    Delete {
        /// Gateway UUID
        gateway: Uuid,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  IP ADDRESSES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct IpArgs {
    #[command(subcommand)]
    pub command: IpCommand,
}

#[derive(Debug, Subcommand)]
pub enum IpCommand {
    /// List public IP addresses
    #[command(alias = "ls")]
    List,

    /// Associate an address with a guest network
    Associate {
        /// Public IP address (UUID)
        ip: Uuid,

        /// Guest network (UUID)
        #[arg(long)]
        network: Uuid,
    },

    /// Revoke every rule on an address and release it
    Release {
        /// Public IP address (UUID)
        ip: Uuid,
    },

    /// Reprogram the public addresses of a network
    Apply {
        /// Guest network (UUID)
        network: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VPN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct VpnArgs {
    #[command(subcommand)]
    pub command: VpnCommand,
}

#[derive(Debug, Subcommand)]
pub enum VpnCommand {
    /// Add a user and push the user list to the network's routers
    AddUser {
        /// Guest network (UUID)
        #[arg(long)]
        network: Uuid,

        #[arg(long)]
        username: String,

        #[arg(long, env = "NETRULES_VPN_PASSWORD", hide_env_values = true)]
        password: String,

        /// Idempotency token
        #[arg(long)]
        uuid: Option<Uuid>,
    },

    /// Remove a user
    RemoveUser {
        /// User UUID
        user: Uuid,

        /// Guest network (UUID)
        #[arg(long)]
        network: Uuid,
    },

    /// Push the user list to the network's routers
    Apply {
        /// Guest network (UUID)
        network: Uuid,

        #[command(flatten)]
        apply: ApplyArgs,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  VM SERVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct VmArgs {
    #[command(subcommand)]
    pub command: VmCommand,
}

#[derive(Debug, Subcommand)]
pub enum VmCommand {
    /// Install the VM's DHCP lease on the network's routers
    Dhcp {
        /// VM (UUID)
        vm: Uuid,

        /// Guest network (UUID)
        #[arg(long)]
        network: Uuid,
    },

    /// Hand a password to the routers for the VM to fetch
    Password {
        /// VM (UUID)
        vm: Uuid,

        /// Guest network (UUID)
        #[arg(long)]
        network: Uuid,

        #[arg(long, env = "NETRULES_VM_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Revoke every port forwarding and static NAT entry targeting the VM
    RevokeRules {
        /// VM (UUID)
        vm: Uuid,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG & COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Write the default configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
