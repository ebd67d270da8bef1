//! Multiplexed SSH sessions to the zone host.
//!
//! A [`Session`] is an OpenSSH `ControlMaster` connection: the first
//! invocation authenticates and leaves a master process behind a control
//! socket, later commands and uploads reuse the socket, and closing asks the
//! master to exit. Sessions close on drop so an early return never leaks the
//! master process.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{ConfigError, TransportConfig, expand_tilde};
use crate::zone::ZoneName;

use super::RemoteError;
use super::command::ZoneCommand;
use super::types::{CommandOutput, CommandRunner};

const CONTROL_SOCKET_PREFIX: &str = "zonewright";

/// Runs zone commands on the configured host over SSH.
#[derive(Clone, Debug)]
pub struct SshTransport<R: CommandRunner> {
    config: TransportConfig,
    runner: R,
}

impl<R: CommandRunner> SshTransport<R> {
    /// Creates a transport using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(config: TransportConfig, runner: R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns the transport configuration.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Opens a multiplexed connection labelled after `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::SessionOpen`] when the master connection cannot
    /// be established, or [`RemoteError::Spawn`] when `ssh` cannot start.
    pub fn open_session(&self, zone: &ZoneName) -> Result<Session<'_, R>, RemoteError> {
        let control_path = format!(
            "{}/{CONTROL_SOCKET_PREFIX}-{zone}.sock",
            self.config.control_dir.trim_end_matches('/')
        );
        let mut args = vec![
            OsString::from("-o"),
            OsString::from("ControlMaster=yes"),
            OsString::from("-o"),
            OsString::from("ControlPersist=yes"),
            OsString::from("-o"),
            OsString::from(format!("ControlPath={control_path}")),
            OsString::from("-N"),
            OsString::from("-f"),
        ];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(self.destination()));

        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        if !output.is_success() {
            return Err(RemoteError::SessionOpen {
                destination: self.destination(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }

        debug!(destination = %self.destination(), %control_path, "session opened");
        Ok(Session {
            transport: self,
            control_path,
            open: true,
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.config.port.to_string()),
        ];
        args.extend(self.auth_options());
        args
    }

    fn auth_options(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(ref identity_file) = self.config.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.known_hosts_file
            )));
        }

        args
    }
}

/// An open connection to the zone host.
///
/// Commands issued through a session share one authenticated channel. The
/// session must be closed with [`Session::close`]; dropping it closes it too.
#[derive(Debug)]
pub struct Session<'a, R: CommandRunner> {
    transport: &'a SshTransport<R>,
    control_path: String,
    open: bool,
}

impl<R: CommandRunner> Session<'_, R> {
    /// Path of the control socket backing this session.
    #[must_use]
    pub fn control_path(&self) -> &str {
        &self.control_path
    }

    /// Runs `command` and returns its output whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] when `ssh` cannot be started.
    pub fn run(&self, command: &ZoneCommand) -> Result<CommandOutput, RemoteError> {
        let config = &self.transport.config;
        let mut args = self.control_options();
        args.extend(self.transport.common_ssh_options());
        args.push(OsString::from(self.transport.destination()));
        args.push(OsString::from(command.to_shell()));

        debug!(operation = command.operation(), command = %command, "running remote command");
        self.transport.runner.run(&config.ssh_bin, &args)
    }

    /// Runs `command` and requires a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailure`] on a non-zero or missing exit
    /// status, or [`RemoteError::Spawn`] when `ssh` cannot be started.
    pub fn execute(&self, command: &ZoneCommand) -> Result<(), RemoteError> {
        let output = self.run(command)?;
        if output.is_success() {
            return Ok(());
        }

        Err(RemoteError::CommandFailure {
            command: command.to_shell(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    /// Polls `command` until it exits with one of `accepted`, returning the
    /// accepted output.
    ///
    /// The command runs at most `max_attempts` times with `interval` between
    /// attempts; no sleep follows the final attempt.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Timeout`] when the attempt budget is exhausted,
    /// or [`RemoteError::Spawn`] when `ssh` cannot be started.
    pub async fn execute_with_retry(
        &self,
        command: &ZoneCommand,
        accepted: &[i32],
        interval: Duration,
        max_attempts: u32,
    ) -> Result<CommandOutput, RemoteError> {
        let mut last_status = None;
        for attempt in 1..=max_attempts {
            let output = self.run(command)?;
            if output.is_accepted(accepted) {
                return Ok(output);
            }

            debug!(
                operation = command.operation(),
                attempt,
                max_attempts,
                status = %output.status_text(),
                "status not yet accepted"
            );
            last_status = output.code;
            if attempt < max_attempts {
                sleep(interval).await;
            }
        }

        Err(RemoteError::Timeout {
            command: command.to_shell(),
            attempts: max_attempts,
            last_status,
        })
    }

    /// Copies `local` to `remote` on the host over the session's connection.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Upload`] when the copy fails, or
    /// [`RemoteError::Spawn`] when `scp` cannot be started.
    pub fn upload(&self, local: &Utf8Path, remote: &str) -> Result<(), RemoteError> {
        let config = &self.transport.config;
        let mut args = self.control_options();
        args.push(OsString::from("-q"));
        args.push(OsString::from("-P"));
        args.push(OsString::from(config.port.to_string()));
        args.extend(self.transport.auth_options());
        args.push(OsString::from(local.as_str()));
        args.push(OsString::from(format!(
            "{}:{remote}",
            self.transport.destination()
        )));

        debug!(%local, remote, "uploading artifact");
        let output = self.transport.runner.run(&config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }

        Err(RemoteError::Upload {
            local: local.to_string(),
            remote: remote.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    /// Closes the session, asking the master connection to exit.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn control_options(&self) -> Vec<OsString> {
        vec![
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", self.control_path)),
        ]
    }

    fn shutdown(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let mut args = self.control_options();
        args.push(OsString::from("-O"));
        args.push(OsString::from("exit"));
        args.push(OsString::from(self.transport.destination()));

        match self.transport.runner.run(&self.transport.config.ssh_bin, &args) {
            Ok(output) if output.is_success() => {
                debug!(control_path = %self.control_path, "session closed");
            }
            Ok(output) => warn!(
                control_path = %self.control_path,
                status = %output.status_text(),
                stderr = %output.stderr.trim(),
                "session master did not exit cleanly"
            ),
            Err(err) => warn!(control_path = %self.control_path, error = %err, "failed to close session"),
        }
    }
}

impl<R: CommandRunner> Drop for Session<'_, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
