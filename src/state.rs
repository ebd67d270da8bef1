//! Persisted provisioning progress.
//!
//! [`ProvisioningState`] is the record the orchestrator reads and mutates as
//! it creates and destroys a zone. Every field is optional and is only ever
//! set to a complete value, so the record can be saved after each step and a
//! later run can tell exactly which resources exist.

use std::fmt;
use std::net::Ipv4Addr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files;
use crate::zone::ZoneName;

/// Progress of a zone through creation.
///
/// Phases are ordered: a zone in a later phase has completed every earlier
/// one.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePhase {
    /// Nothing has been created.
    Unprovisioned,
    /// Zone definition and profile are rendered locally.
    ConfigRendered,
    /// The zone definition is applied on the host.
    ZoneDefined,
    /// The zone is installed from its clone source.
    ZoneCloned,
    /// The zone is booted.
    ZoneBooted,
    /// The zone answers on its network and the port-forward rule is loaded.
    NatConfigured,
    /// Connection coordinates are published.
    Ready,
}

impl ZonePhase {
    /// Stable lowercase name used in logs and persisted records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::ConfigRendered => "config_rendered",
            Self::ZoneDefined => "zone_defined",
            Self::ZoneCloned => "zone_cloned",
            Self::ZoneBooted => "zone_booted",
            Self::NatConfigured => "nat_configured",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for ZonePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Steps of teardown, reported in logs as each completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeardownStep {
    /// The port-forward rule is removed.
    NatRemoved,
    /// The zone is halted.
    ZoneHalted,
    /// The zone is uninstalled.
    ZoneUninstalled,
    /// The zone definition is deleted.
    ZoneDeleted,
}

impl TeardownStep {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NatRemoved => "nat_removed",
            Self::ZoneHalted => "zone_halted",
            Self::ZoneUninstalled => "zone_uninstalled",
            Self::ZoneDeleted => "zone_deleted",
        }
    }
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of what has been provisioned for one zone.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningState {
    /// Name of the zone, set before anything is created remotely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_name: Option<ZoneName>,
    /// Host port redirected to the zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_port: Option<u16>,
    /// Rendered zone definition. Present means already rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_config_path: Option<Utf8PathBuf>,
    /// Rendered system profile. Present means already rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_profile_path: Option<Utf8PathBuf>,
    /// Address of the zone, recorded once it answers on the network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_ip: Option<Ipv4Addr>,
    /// Host consumers connect to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Port consumers connect to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Account consumers connect as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Last completed creation phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ZonePhase>,
}

impl ProvisioningState {
    /// Returns `true` when a port-forward rule may exist for this zone.
    #[must_use]
    pub const fn has_nat_mapping(&self) -> bool {
        self.zone_port.is_some() || self.zone_ip.is_some()
    }

    /// Returns the recorded phase, treating an absent phase as
    /// [`ZonePhase::Unprovisioned`].
    #[must_use]
    pub fn phase_or_default(&self) -> ZonePhase {
        self.phase.unwrap_or(ZonePhase::Unprovisioned)
    }

    /// Returns `true` when `phase` has been completed.
    #[must_use]
    pub fn reached(&self, phase: ZonePhase) -> bool {
        self.phase_or_default() >= phase
    }

    /// Returns `true` when nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Errors raised while loading or saving state.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StateStoreError {
    /// The state file could not be read or written.
    #[error("state file {path}: {message}")]
    Io {
        /// File being accessed.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The state file does not contain a valid record.
    #[error("failed to parse state file {path}: {message}")]
    Parse {
        /// File being parsed.
        path: String,
        /// Parser error message.
        message: String,
    },
}

/// Durable storage for a [`ProvisioningState`].
pub trait StateStore {
    /// Loads the stored record, or an empty one when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the record cannot be read or parsed.
    fn load(&self) -> Result<ProvisioningState, StateStoreError>;

    /// Replaces the stored record with `state`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the record cannot be written.
    fn save(&self, state: &ProvisioningState) -> Result<(), StateStoreError>;
}

/// Stores state as pretty-printed JSON in a single file.
///
/// Saves replace the file atomically. Saving an empty record removes the
/// file, and a missing file loads as an empty record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileStateStore {
    path: Utf8PathBuf,
}

impl FileStateStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn io_error(&self, err: &std::io::Error) -> StateStoreError {
        StateStoreError::Io {
            path: self.path.to_string(),
            message: err.to_string(),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<ProvisioningState, StateStoreError> {
        let Some(contents) =
            files::read_optional(&self.path).map_err(|err| self.io_error(&err))?
        else {
            return Ok(ProvisioningState::default());
        };
        if contents.trim().is_empty() {
            return Ok(ProvisioningState::default());
        }
        serde_json::from_str(&contents).map_err(|err| StateStoreError::Parse {
            path: self.path.to_string(),
            message: err.to_string(),
        })
    }

    fn save(&self, state: &ProvisioningState) -> Result<(), StateStoreError> {
        if state.is_empty() {
            return files::remove_if_exists(&self.path).map_err(|err| self.io_error(&err));
        }
        let mut rendered =
            serde_json::to_string_pretty(state).map_err(|err| StateStoreError::Parse {
                path: self.path.to_string(),
                message: err.to_string(),
            })?;
        rendered.push('\n');
        files::write_atomic(&self.path, rendered.as_bytes(), None)
            .map_err(|err| self.io_error(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct StoreDir {
        _temp: TempDir,
        store: FileStateStore,
    }

    #[fixture]
    fn store_dir() -> StoreDir {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf-8 temp dir");
        StoreDir {
            store: FileStateStore::new(root.join("state/zone.json")),
            _temp: temp,
        }
    }

    fn ready_state() -> ProvisioningState {
        ProvisioningState {
            zone_name: Some(ZoneName::parse("build-01").expect("zone name")),
            zone_port: Some(40022),
            zone_config_path: Some(Utf8PathBuf::from("/work/build-01.cfg")),
            zone_profile_path: Some(Utf8PathBuf::from("/work/build-01.xml")),
            zone_ip: Some(Ipv4Addr::new(10, 0, 0, 5)),
            hostname: Some(String::from("zonehost.example")),
            port: Some(40022),
            username: Some(String::from("zonewright")),
            phase: Some(ZonePhase::Ready),
        }
    }

    #[test]
    fn phases_are_ordered_along_creation() {
        assert!(ZonePhase::Unprovisioned < ZonePhase::ConfigRendered);
        assert!(ZonePhase::ZoneCloned < ZonePhase::ZoneBooted);
        assert!(ZonePhase::NatConfigured < ZonePhase::Ready);
    }

    #[test]
    fn empty_state_has_no_nat_mapping_and_default_phase() {
        let state = ProvisioningState::default();
        assert!(!state.has_nat_mapping());
        assert!(state.is_empty());
        assert_eq!(state.phase_or_default(), ZonePhase::Unprovisioned);
        assert!(state.reached(ZonePhase::Unprovisioned));
        assert!(!state.reached(ZonePhase::ConfigRendered));
    }

    #[rstest]
    fn missing_file_loads_as_empty(store_dir: StoreDir) {
        assert_eq!(
            store_dir.store.load().expect("load"),
            ProvisioningState::default()
        );
    }

    #[rstest]
    fn saved_state_is_reloaded(store_dir: StoreDir) {
        let state = ready_state();
        store_dir.store.save(&state).expect("save");
        assert_eq!(store_dir.store.load().expect("load"), state);

        let raw = std::fs::read_to_string(store_dir.store.path()).expect("raw state");
        assert!(raw.contains("\"phase\": \"ready\""), "{raw}");
        assert!(raw.contains("\"zone_ip\": \"10.0.0.5\""), "{raw}");
    }

    #[rstest]
    fn absent_fields_are_omitted(store_dir: StoreDir) {
        let state = ProvisioningState {
            zone_name: Some(ZoneName::parse("build-01").expect("zone name")),
            ..ProvisioningState::default()
        };
        store_dir.store.save(&state).expect("save");

        let raw = std::fs::read_to_string(store_dir.store.path()).expect("raw state");
        assert_eq!(raw, "{\n  \"zone_name\": \"build-01\"\n}\n");
    }

    #[rstest]
    fn saving_empty_state_removes_file(store_dir: StoreDir) {
        store_dir.store.save(&ready_state()).expect("save");
        store_dir
            .store
            .save(&ProvisioningState::default())
            .expect("save empty");
        assert!(!store_dir.store.path().exists());
    }

    #[rstest]
    fn corrupt_file_is_a_parse_error(store_dir: StoreDir) {
        let path = store_dir.store.path();
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "{\"zone_name\": \"global\"}").expect("write");

        let err = store_dir.store.load().expect_err("load should fail");
        assert!(matches!(err, StateStoreError::Parse { .. }), "{err:?}");
    }
}
