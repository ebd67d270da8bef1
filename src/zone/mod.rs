//! Zone identity and lifecycle orchestration.

mod error;
mod identity;
mod orchestrator;

pub use error::ZoneError;
pub use identity::{IdentityError, MAX_ZONE_NAME_LEN, ZONE_PORT_RANGE, ZoneIdentity, ZoneName};
pub use orchestrator::{BOOT_POLL_INTERVAL, BootPolicy, ZoneOrchestrator};
