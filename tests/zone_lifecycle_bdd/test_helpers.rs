//! Shared fixtures for zone lifecycle BDD scenarios.

use std::rc::Rc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;
use zonewright::test_support::{ScriptedRunner, sample_transport_config, sample_zone_config};
use zonewright::{
    BootPolicy, ConfigError, FileStateStore, ProvisioningState, SshTransport, ZoneError,
    ZoneOrchestrator, ZoneSettings,
};

pub const ZONE_TEMPLATE: &str = "create -b\nset zonename={{ zone_name }}\n\nadd net\nset allowed-address={{ zone_ip }}/24\nend\n";
pub const PROFILE_TEMPLATE: &str = "<profile>\n\n<key>{{ public_key }}</key>\n</profile>\n";

#[derive(Clone, Debug)]
pub struct ZoneContext {
    pub _workspace: Rc<TempDir>,
    pub runner: ScriptedRunner,
    pub store: FileStateStore,
    pub settings: ZoneSettings,
    pub state: ProvisioningState,
    pub commands_before: usize,
    pub outcome: Option<LifecycleResult>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Configuration,
    RemoteExecution,
    ReadinessTimeout,
    ResourceNotFound,
    StatePersistence,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LifecycleResult {
    Success,
    Failure { kind: FailureKind, message: String },
}

impl From<Result<(), ZoneError>> for LifecycleResult {
    fn from(value: Result<(), ZoneError>) -> Self {
        let Err(err) = value else {
            return Self::Success;
        };
        let kind = match err {
            ZoneError::Configuration(_) => FailureKind::Configuration,
            ZoneError::RemoteExecution(_) => FailureKind::RemoteExecution,
            ZoneError::ReadinessTimeout { .. } => FailureKind::ReadinessTimeout,
            ZoneError::ResourceNotFound { .. } => FailureKind::ResourceNotFound,
            ZoneError::StatePersistence(_) => FailureKind::StatePersistence,
        };
        Self::Failure {
            kind,
            message: err.to_string(),
        }
    }
}

impl ZoneContext {
    pub fn orchestrator(
        &self,
    ) -> Result<ZoneOrchestrator<ScriptedRunner, FileStateStore>, ZoneTestError> {
        let transport = SshTransport::new(sample_transport_config(), self.runner.clone())?;
        Ok(
            ZoneOrchestrator::new(self.settings.clone(), transport, self.store.clone())
                .with_boot_policy(BootPolicy {
                    interval: Duration::from_millis(1),
                    timeout: Duration::from_millis(6),
                }),
        )
    }

    /// Remote command lines issued since `commands_before` was captured.
    pub fn recent_commands(&self) -> Vec<String> {
        self.runner
            .remote_commands()
            .into_iter()
            .skip(self.commands_before)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum ZoneTestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid zone fixture: {0}")]
    Fixture(String),
}

pub type ZoneContextResult = Result<ZoneContext, ZoneTestError>;

#[fixture]
pub fn zone_context_result() -> ZoneContextResult {
    build_zone_context()
}

#[fixture]
pub fn zone_context(zone_context_result: ZoneContextResult) -> ZoneContext {
    zone_context_result.unwrap_or_else(|err| panic!("zone context fixture should initialise: {err}"))
}

fn fixture_error(step: &str, err: impl std::fmt::Display) -> ZoneTestError {
    ZoneTestError::Fixture(format!("{step}: {err}"))
}

fn build_zone_context() -> ZoneContextResult {
    let workspace = TempDir::new().map_err(|err| fixture_error("temp dir", err))?;
    let root = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf())
        .map_err(|path| fixture_error("temp dir", path.display()))?;

    std::fs::write(root.join("zone.cfg.tera"), ZONE_TEMPLATE)
        .map_err(|err| fixture_error("zone template", err))?;
    std::fs::write(root.join("profile.xml.tera"), PROFILE_TEMPLATE)
        .map_err(|err| fixture_error("profile template", err))?;

    let settings = sample_zone_config().resolve(&root)?;
    std::fs::create_dir_all(root.join(".zonewright"))
        .map_err(|err| fixture_error("key dir", err))?;
    std::fs::write(&settings.key_paths.private, "private")
        .map_err(|err| fixture_error("private key", err))?;
    std::fs::write(&settings.key_paths.public, "ssh-rsa AAAAB3NzaC1yc2E zonewright\n")
        .map_err(|err| fixture_error("public key", err))?;

    Ok(ZoneContext {
        store: FileStateStore::new(settings.state_path.clone()),
        _workspace: Rc::new(workspace),
        runner: ScriptedRunner::new(),
        settings,
        state: ProvisioningState::default(),
        commands_before: 0,
        outcome: None,
    })
}
