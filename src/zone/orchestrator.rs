//! Zone lifecycle orchestration.
//!
//! [`ZoneOrchestrator::create`] walks a zone through the phases of
//! [`ZonePhase`], one transition function per edge, saving the state after
//! every step that changes the host. [`ZoneOrchestrator::destroy`] undoes
//! whatever the recorded phase says exists, clearing each part of the state
//! only once its teardown step has succeeded. Both are safe to call again
//! after a failure.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tera::Context;
use tracing::{debug, info, warn};

use crate::config::ZoneSettings;
use crate::files;
use crate::keys::{KeyMaterialProvider, read_public_key};
use crate::remote::{CommandRunner, NatRule, Session, SshTransport, ZoneCommand};
use crate::render::{ConfigRenderer, discard_artifact};
use crate::state::{ProvisioningState, StateStore, TeardownStep, ZonePhase};

use super::error::ZoneError;
use super::identity::ZoneName;

/// Delay between boot readiness probes.
pub const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(5);

const PROBE_ACCEPTED: &[i32] = &[0];
const CONFIG_EXTENSION: &str = "cfg";
const PROFILE_EXTENSION: &str = "xml";

/// Interval and overall budget for boot readiness polling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BootPolicy {
    /// Delay between probes.
    pub interval: Duration,
    /// Total time allowed for the zone to answer.
    pub timeout: Duration,
}

impl BootPolicy {
    /// Polls every [`BOOT_POLL_INTERVAL`] for up to `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            interval: BOOT_POLL_INTERVAL,
            timeout,
        }
    }

    /// Number of probes allowed: the timeout divided by the interval, rounded
    /// down, and never fewer than one.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use zonewright::zone::BootPolicy;
    ///
    /// assert_eq!(BootPolicy::new(Duration::from_secs(30)).max_attempts(), 6);
    /// assert_eq!(BootPolicy::new(Duration::from_secs(34)).max_attempts(), 6);
    /// ```
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let attempts = self
            .timeout
            .as_millis()
            .checked_div(self.interval.as_millis())
            .unwrap_or(0);
        u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
    }
}

/// Creates and destroys one zone on the host reached through `transport`.
#[derive(Debug)]
pub struct ZoneOrchestrator<R: CommandRunner, S: StateStore> {
    settings: ZoneSettings,
    keys: KeyMaterialProvider,
    renderer: ConfigRenderer,
    transport: SshTransport<R>,
    store: S,
    boot: BootPolicy,
}

impl<R: CommandRunner, S: StateStore> ZoneOrchestrator<R, S> {
    /// Builds an orchestrator from resolved settings.
    #[must_use]
    pub fn new(settings: ZoneSettings, transport: SshTransport<R>, store: S) -> Self {
        let renderer = ConfigRenderer::new(settings.template_root.clone());
        let boot = BootPolicy::new(settings.boot_timeout());
        Self {
            settings,
            keys: KeyMaterialProvider::new(),
            renderer,
            transport,
            store,
            boot,
        }
    }

    /// Uses `keys` for key generation, sharing its lock with other
    /// orchestrators.
    #[must_use]
    pub fn with_key_provider(mut self, keys: KeyMaterialProvider) -> Self {
        self.keys = keys;
        self
    }

    /// Overrides the boot readiness policy.
    #[must_use]
    pub const fn with_boot_policy(mut self, boot: BootPolicy) -> Self {
        self.boot = boot;
        self
    }

    /// Brings the zone to [`ZonePhase::Ready`], resuming from the phase
    /// recorded in `state`.
    ///
    /// Artifacts are rendered before the host is contacted. The remaining
    /// steps share one session, which is closed however they end.
    ///
    /// # Errors
    ///
    /// Returns the first [`ZoneError`] raised by a step. Progress made before
    /// the failure is recorded in `state` and in the store.
    pub async fn create(&self, state: &mut ProvisioningState) -> Result<(), ZoneError> {
        if state.reached(ZonePhase::Ready) {
            info!(zone = ?state.zone_name, "zone already ready");
            return Ok(());
        }

        self.keys.ensure_keypair(&self.settings.key_paths)?;
        if !state.reached(ZonePhase::ConfigRendered) {
            self.render_config(state)?;
        }

        let zone = recorded_zone(state)?;
        let session = self.transport.open_session(&zone)?;
        let result = self.drive(&session, state).await;
        session.close();
        result
    }

    async fn drive(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        loop {
            match state.phase_or_default() {
                ZonePhase::Unprovisioned => self.render_config(state)?,
                ZonePhase::ConfigRendered => self.define_zone(session, state)?,
                ZonePhase::ZoneDefined => self.clone_zone(session, state)?,
                ZonePhase::ZoneCloned => self.boot_zone(session, state)?,
                ZonePhase::ZoneBooted => self.configure_nat(session, state).await?,
                ZonePhase::NatConfigured => self.publish_coordinates(state)?,
                ZonePhase::Ready => return Ok(()),
            }
        }
    }

    /// Unprovisioned → ConfigRendered.
    ///
    /// Reads the configured identity and key; writes `zone_name`,
    /// `zone_port`, `zone_config_path` and `zone_profile_path` when absent.
    /// The identity is saved before anything else so a zone is never
    /// created under a name the state does not know.
    fn render_config(&self, state: &mut ProvisioningState) -> Result<(), ZoneError> {
        if state.zone_name.is_none() || state.zone_port.is_none() || state.phase.is_none() {
            if state.zone_name.is_none() {
                state.zone_name = Some(self.settings.identity.name.clone());
            }
            if state.zone_port.is_none() {
                state.zone_port = Some(self.settings.identity.port);
            }
            if state.phase.is_none() {
                state.phase = Some(ZonePhase::Unprovisioned);
            }
            self.persist(state)?;
        }
        let zone = recorded_zone(state)?;
        let public_key = read_public_key(&self.settings.key_paths)?;

        if state.zone_config_path.is_none() {
            let output = self.artifact_path(&zone, CONFIG_EXTENSION);
            let context = self.template_context(state, &zone, &public_key)?;
            self.renderer
                .render(&self.settings.config_template, &output, &context)?;
            state.zone_config_path = Some(output);
            self.persist(state)?;
        }
        if state.zone_profile_path.is_none() {
            let output = self.artifact_path(&zone, PROFILE_EXTENSION);
            let context = self.template_context(state, &zone, &public_key)?;
            self.renderer
                .render(&self.settings.profile_template, &output, &context)?;
            state.zone_profile_path = Some(output);
            self.persist(state)?;
        }
        self.advance(state, ZonePhase::ConfigRendered)
    }

    /// ConfigRendered → ZoneDefined. Reads `zone_config_path`.
    fn define_zone(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        let zone = recorded_zone(state)?;
        let local = rendered_artifact(state.zone_config_path.as_deref())?;
        let staged = self.staged_path(&zone, CONFIG_EXTENSION);
        session.upload(local, &staged)?;
        session.execute(&ZoneCommand::ApplyConfig {
            zone,
            config: staged,
        })?;
        self.advance(state, ZonePhase::ZoneDefined)
    }

    /// ZoneDefined → ZoneCloned. Reads `zone_profile_path`.
    fn clone_zone(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        let zone = recorded_zone(state)?;
        let local = rendered_artifact(state.zone_profile_path.as_deref())?;
        let staged = self.staged_path(&zone, PROFILE_EXTENSION);
        session.upload(local, &staged)?;
        session.execute(&ZoneCommand::Clone {
            zone,
            source: self.settings.zone_source.clone(),
            profile: staged,
        })?;
        self.advance(state, ZonePhase::ZoneCloned)
    }

    /// ZoneCloned → ZoneBooted.
    fn boot_zone(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        let zone = recorded_zone(state)?;
        session.execute(&ZoneCommand::Boot { zone })?;
        self.advance(state, ZonePhase::ZoneBooted)
    }

    /// ZoneBooted → NatConfigured.
    ///
    /// Waits for the zone address to answer, records `zone_ip`, then loads
    /// the redirect from `zone_port`.
    async fn configure_nat(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        let address = self.settings.zone_ip;
        let attempts = self.boot.max_attempts();
        debug!(%address, attempts, interval = ?self.boot.interval, "waiting for zone network");
        session
            .execute_with_retry(
                &ZoneCommand::ProbeNetwork { address },
                PROBE_ACCEPTED,
                self.boot.interval,
                attempts,
            )
            .await?;

        state.zone_ip = Some(address);
        self.persist(state)?;

        let port = recorded_port(state)?;
        let rule = NatRule::new(self.settings.nat_interface.clone(), port, address);
        session.execute(&ZoneCommand::AddNatRule(rule))?;
        self.advance(state, ZonePhase::NatConfigured)
    }

    /// NatConfigured → Ready. Writes `hostname`, `port` and `username`.
    fn publish_coordinates(&self, state: &mut ProvisioningState) -> Result<(), ZoneError> {
        state.hostname = Some(self.transport.config().host.clone());
        state.port = Some(recorded_port(state)?);
        state.username = Some(self.settings.username.clone());
        self.advance(state, ZonePhase::Ready)
    }

    /// Removes everything `state` records, resuming a previous partial
    /// teardown.
    ///
    /// The port-forward rule is removed first and its removal is
    /// best-effort: a non-zero exit is logged and tolerated. Zone teardown
    /// then halts, uninstalls and deletes as far as the recorded phase
    /// requires; any failure there stops the teardown and leaves the zone
    /// fields in place for the next attempt. A state with no zone and no
    /// redirect is left alone without contacting the host, and a zone that
    /// was never defined there is forgotten locally; only staged uploads are
    /// removed from the host, and only if it answers.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneError`] when a required teardown step fails or state
    /// cannot be saved.
    pub fn destroy(&self, state: &mut ProvisioningState) -> Result<(), ZoneError> {
        if !state.has_nat_mapping() && state.zone_name.is_none() {
            debug!("nothing recorded, skipping teardown");
            return Ok(());
        }
        if !needs_host(state) {
            return self.forget_undefined_zone(state);
        }

        let label = state
            .zone_name
            .clone()
            .unwrap_or_else(|| self.settings.identity.name.clone());
        let session = self.transport.open_session(&label)?;
        let result = self.teardown(&session, state);
        session.close();
        result
    }

    fn teardown(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        if state.has_nat_mapping() {
            self.remove_nat(session, state)?;
        }
        if let Some(zone) = state.zone_name.clone() {
            self.remove_zone(session, state, &zone)?;
        }
        Ok(())
    }

    /// Clears `zone_ip` and the published coordinates. `zone_port` stays
    /// with a recorded zone until the zone itself is gone, so an interrupted
    /// teardown can still be resumed by `create`.
    fn remove_nat(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
    ) -> Result<(), ZoneError> {
        if let (Some(port), Some(address)) = (state.zone_port, state.zone_ip) {
            let rule = NatRule::new(self.settings.nat_interface.clone(), port, address);
            let output = session.run(&ZoneCommand::RemoveNatRule(rule))?;
            if !output.is_success() {
                warn!(
                    port,
                    %address,
                    status = %output.status_text(),
                    stderr = %output.stderr.trim(),
                    "port-forward rule removal reported failure, continuing"
                );
            }
        }

        if state.zone_name.is_none() {
            state.zone_port = None;
        }
        state.zone_ip = None;
        state.hostname = None;
        state.port = None;
        state.username = None;
        if state.phase.is_some_and(|phase| phase >= ZonePhase::NatConfigured) {
            state.phase = Some(ZonePhase::ZoneBooted);
        }
        self.persist(state)?;
        info!(step = %TeardownStep::NatRemoved, "teardown step complete");
        Ok(())
    }

    /// Halts, uninstalls and deletes as far as the recorded phase requires,
    /// then clears `zone_name`, the artifact paths and the phase.
    fn remove_zone(
        &self,
        session: &Session<'_, R>,
        state: &mut ProvisioningState,
        zone: &ZoneName,
    ) -> Result<(), ZoneError> {
        let current = state.phase.unwrap_or(ZonePhase::Ready);

        if current >= ZonePhase::ZoneBooted {
            session.execute(&ZoneCommand::Halt { zone: zone.clone() })?;
            self.retreat(state, ZonePhase::ZoneCloned, TeardownStep::ZoneHalted)?;
        }
        if current >= ZonePhase::ZoneCloned {
            session.execute(&ZoneCommand::Uninstall { zone: zone.clone() })?;
            self.retreat(state, ZonePhase::ZoneDefined, TeardownStep::ZoneUninstalled)?;
        }
        if current >= ZonePhase::ZoneDefined {
            session.execute(&ZoneCommand::Delete { zone: zone.clone() })?;
            info!(%zone, step = %TeardownStep::ZoneDeleted, "teardown step complete");
        }
        if current >= ZonePhase::ConfigRendered {
            self.remove_staged(session, zone);
        }

        self.forget_zone(state)?;
        info!(%zone, "zone destroyed");
        Ok(())
    }

    /// Clears a record whose zone was never defined on the host. Staged
    /// uploads are removed when the host answers; an unreachable host is
    /// logged and otherwise ignored.
    fn forget_undefined_zone(&self, state: &mut ProvisioningState) -> Result<(), ZoneError> {
        let recorded = state.zone_name.clone();
        let staged = recorded
            .clone()
            .filter(|_| state.reached(ZonePhase::ConfigRendered));
        if let Some(zone) = staged {
            match self.transport.open_session(&zone) {
                Ok(session) => {
                    self.remove_staged(&session, &zone);
                    session.close();
                }
                Err(err) => warn!(
                    %zone,
                    error = %err,
                    "host unreachable, staged artifacts left in place"
                ),
            }
        }

        self.forget_zone(state)?;
        info!(
            zone = ?recorded.as_ref().map(ZoneName::as_str),
            "zone was never defined, record cleared"
        );
        Ok(())
    }

    /// Discards the rendered artifacts and clears every zone field.
    fn forget_zone(&self, state: &mut ProvisioningState) -> Result<(), ZoneError> {
        for artifact in [
            state.zone_config_path.take(),
            state.zone_profile_path.take(),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(err) = discard_artifact(&artifact) {
                warn!(path = %artifact, error = %err, "failed to remove rendered artifact");
            }
        }
        state.zone_name = None;
        state.zone_port = None;
        state.zone_ip = None;
        state.hostname = None;
        state.port = None;
        state.username = None;
        state.phase = None;
        self.persist(state)
    }

    fn remove_staged(&self, session: &Session<'_, R>, zone: &ZoneName) {
        let paths = vec![
            self.staged_path(zone, CONFIG_EXTENSION),
            self.staged_path(zone, PROFILE_EXTENSION),
        ];
        match session.run(&ZoneCommand::RemoveFiles { paths }) {
            Ok(output) if output.is_success() => {}
            Ok(output) => warn!(
                %zone,
                status = %output.status_text(),
                "failed to remove staged artifacts"
            ),
            Err(err) => warn!(%zone, error = %err, "failed to remove staged artifacts"),
        }
    }

    fn advance(&self, state: &mut ProvisioningState, phase: ZonePhase) -> Result<(), ZoneError> {
        state.phase = Some(phase);
        self.persist(state)?;
        info!(zone = ?state.zone_name.as_ref().map(ZoneName::as_str), %phase, "zone phase advanced");
        Ok(())
    }

    fn retreat(
        &self,
        state: &mut ProvisioningState,
        phase: ZonePhase,
        step: TeardownStep,
    ) -> Result<(), ZoneError> {
        state.phase = Some(phase);
        self.persist(state)?;
        info!(zone = ?state.zone_name.as_ref().map(ZoneName::as_str), %step, "teardown step complete");
        Ok(())
    }

    fn persist(&self, state: &ProvisioningState) -> Result<(), ZoneError> {
        self.store.save(state)?;
        Ok(())
    }

    fn artifact_path(&self, zone: &ZoneName, extension: &str) -> Utf8PathBuf {
        self.settings
            .working_dir
            .join(format!("{zone}.{extension}"))
    }

    fn staged_path(&self, zone: &ZoneName, extension: &str) -> String {
        format!(
            "{}/{zone}.{extension}",
            self.transport.config().stage_dir.trim_end_matches('/')
        )
    }

    fn template_context(
        &self,
        state: &ProvisioningState,
        zone: &ZoneName,
        public_key: &str,
    ) -> Result<Context, ZoneError> {
        let mut context = Context::new();
        context.insert("config", &self.settings);
        context.insert("state", state);
        context.insert("zone_name", zone.as_str());
        context.insert("zone_port", &recorded_port(state)?);
        context.insert("zone_ip", &self.settings.zone_ip.to_string());
        context.insert("zone_source", &self.settings.zone_source);
        context.insert("username", &self.settings.username);
        context.insert("public_key", public_key);
        Ok(context)
    }
}

/// Whether tearing `state` down has anything to undo on the host: a zone
/// that reached `zonecfg`, a record of unknown progress, or an installed
/// port-forward rule.
fn needs_host(state: &ProvisioningState) -> bool {
    let redirect_installed = state.zone_port.is_some() && state.zone_ip.is_some();
    redirect_installed
        || state
            .phase
            .is_none_or(|phase| phase >= ZonePhase::ZoneDefined)
}

fn recorded_zone(state: &ProvisioningState) -> Result<ZoneName, ZoneError> {
    state.zone_name.clone().ok_or_else(|| {
        ZoneError::Configuration(format!(
            "state records phase {} without a zone name",
            state.phase_or_default()
        ))
    })
}

fn recorded_port(state: &ProvisioningState) -> Result<u16, ZoneError> {
    state.zone_port.ok_or_else(|| {
        ZoneError::Configuration(format!(
            "state records phase {} without a zone port",
            state.phase_or_default()
        ))
    })
}

fn rendered_artifact(path: Option<&Utf8Path>) -> Result<&Utf8Path, ZoneError> {
    let Some(local) = path else {
        return Err(ZoneError::Configuration(String::from(
            "rendered artifact path missing from state",
        )));
    };
    match files::exists(local) {
        Ok(true) => Ok(local),
        Ok(false) => Err(ZoneError::ResourceNotFound {
            path: local.to_path_buf(),
        }),
        Err(err) => Err(ZoneError::Configuration(format!("{local}: {err}"))),
    }
}
