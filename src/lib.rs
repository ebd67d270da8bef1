//! Core library for the Zonewright zone provisioner.
//!
//! The crate creates short-lived illumos zones on a remote host for test
//! runs and tears them down again. [`ZoneOrchestrator`] sequences the
//! lifecycle (render artifacts → define → clone → boot → wait for the
//! network → forward a port) and records progress in a
//! [`ProvisioningState`] so a failed run can be resumed or cleaned up.

pub mod config;
mod files;
pub mod keys;
pub mod remote;
pub mod render;
pub mod state;
pub mod test_support;
pub mod zone;

pub use config::{ConfigError, TransportConfig, ZoneConfig, ZoneSettings};
pub use keys::{KeyError, KeyMaterialProvider, KeyOutcome, KeyPaths};
pub use remote::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RemoteError, Session, SshTransport,
    ZoneCommand,
};
pub use render::{ConfigRenderer, RenderError};
pub use state::{FileStateStore, ProvisioningState, StateStore, StateStoreError, ZonePhase};
pub use zone::{BootPolicy, ZoneError, ZoneIdentity, ZoneName, ZoneOrchestrator};
