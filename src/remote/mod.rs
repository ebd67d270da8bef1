//! Remote command execution on the zone host.
//!
//! Zone operations are described as [`ZoneCommand`] values, serialised to
//! shell syntax at the transport boundary and run over a multiplexed SSH
//! [`Session`].

mod command;
mod error;
mod session;
mod types;

pub use command::{NatRule, ZONE_SSH_PORT, ZoneCommand};
pub use error::RemoteError;
pub use session::{Session, SshTransport};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};
