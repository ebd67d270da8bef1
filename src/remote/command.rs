//! Structured descriptors for the commands issued on the zone host.
//!
//! Every remote operation is a [`ZoneCommand`] carrying typed parameters.
//! Serialisation to shell syntax happens only in [`ZoneCommand::to_shell`],
//! where each parameter is shell-escaped, so commands can be asserted on
//! without a live shell.

use std::borrow::Cow;
use std::fmt;
use std::net::Ipv4Addr;

use shell_escape::unix::escape;

use crate::zone::ZoneName;

const ZONECFG: &str = "/usr/sbin/zonecfg";
const ZONEADM: &str = "/usr/sbin/zoneadm";
const IPNAT: &str = "/usr/sbin/ipnat";
const PING: &str = "/usr/sbin/ping";
const PING_TIMEOUT_SECS: u32 = 1;

/// Port the zone's SSH daemon listens on.
pub const ZONE_SSH_PORT: u16 = 22;

/// Port-forward rule mapping a host port to the zone's SSH daemon.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NatRule {
    /// Host interface the redirect is attached to.
    pub interface: String,
    /// Port exposed on the host.
    pub host_port: u16,
    /// Address of the zone behind the redirect.
    pub zone_ip: Ipv4Addr,
}

impl NatRule {
    /// Builds a redirect from `host_port` on `interface` to the zone.
    #[must_use]
    pub fn new(interface: impl Into<String>, host_port: u16, zone_ip: Ipv4Addr) -> Self {
        Self {
            interface: interface.into(),
            host_port,
            zone_ip,
        }
    }

    /// Renders the rule in `ipnat.conf` syntax.
    #[must_use]
    pub fn to_ipnat(&self) -> String {
        format!(
            "rdr {} 0.0.0.0/0 port {} -> {} port {ZONE_SSH_PORT} tcp",
            self.interface, self.host_port, self.zone_ip
        )
    }
}

/// A single operation on the zone host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ZoneCommand {
    /// Applies a staged zone definition with `zonecfg`.
    ApplyConfig {
        /// Zone being defined.
        zone: ZoneName,
        /// Path of the staged definition on the host.
        config: String,
    },
    /// Installs the zone by cloning an existing one.
    Clone {
        /// Zone being installed.
        zone: ZoneName,
        /// Installed zone to clone from.
        source: String,
        /// Path of the staged system profile on the host.
        profile: String,
    },
    /// Boots an installed zone.
    Boot {
        /// Zone to boot.
        zone: ZoneName,
    },
    /// Checks whether the zone's address answers.
    ProbeNetwork {
        /// Address assigned inside the zone.
        address: Ipv4Addr,
    },
    /// Loads a redirect rule into the packet filter.
    AddNatRule(NatRule),
    /// Removes a previously loaded redirect rule.
    RemoveNatRule(NatRule),
    /// Halts a running zone.
    Halt {
        /// Zone to halt.
        zone: ZoneName,
    },
    /// Forcibly uninstalls a zone.
    Uninstall {
        /// Zone to uninstall.
        zone: ZoneName,
    },
    /// Forcibly deletes a zone definition.
    Delete {
        /// Zone to delete.
        zone: ZoneName,
    },
    /// Removes files from the host.
    RemoveFiles {
        /// Paths to remove.
        paths: Vec<String>,
    },
}

impl ZoneCommand {
    /// Short name of the operation, used in logs.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::ApplyConfig { .. } => "apply-config",
            Self::Clone { .. } => "clone",
            Self::Boot { .. } => "boot",
            Self::ProbeNetwork { .. } => "probe-network",
            Self::AddNatRule(_) => "add-nat-rule",
            Self::RemoveNatRule(_) => "remove-nat-rule",
            Self::Halt { .. } => "halt",
            Self::Uninstall { .. } => "uninstall",
            Self::Delete { .. } => "delete",
            Self::RemoveFiles { .. } => "remove-files",
        }
    }

    /// Serialises the command to a POSIX shell command line.
    #[must_use]
    pub fn to_shell(&self) -> String {
        match self {
            Self::ApplyConfig { zone, config } => {
                format!("{ZONECFG} -z {} -f {}", quote(zone.as_str()), quote(config))
            }
            Self::Clone {
                zone,
                source,
                profile,
            } => format!(
                "{ZONEADM} -z {} clone -c {} {}",
                quote(zone.as_str()),
                quote(profile),
                quote(source)
            ),
            Self::Boot { zone } => format!("{ZONEADM} -z {} boot", quote(zone.as_str())),
            Self::ProbeNetwork { address } => format!("{PING} {address} {PING_TIMEOUT_SECS}"),
            Self::AddNatRule(rule) => format!("echo {} | {IPNAT} -f -", quote(&rule.to_ipnat())),
            Self::RemoveNatRule(rule) => {
                format!("echo {} | {IPNAT} -r -f -", quote(&rule.to_ipnat()))
            }
            Self::Halt { zone } => format!("{ZONEADM} -z {} halt", quote(zone.as_str())),
            Self::Uninstall { zone } => {
                format!("{ZONEADM} -z {} uninstall -F", quote(zone.as_str()))
            }
            Self::Delete { zone } => format!("{ZONECFG} -z {} delete -F", quote(zone.as_str())),
            Self::RemoveFiles { paths } => {
                let mut line = String::from("rm -f");
                for path in paths {
                    line.push(' ');
                    line.push_str(quote(path).as_ref());
                }
                line
            }
        }
    }
}

impl fmt::Display for ZoneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell())
    }
}

fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}
