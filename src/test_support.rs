//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;

use tokio::sync::{Mutex, MutexGuard};

use crate::remote::{CommandOutput, CommandRunner, RemoteError};
use crate::state::{ProvisioningState, StateStore, StateStoreError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// When the queue is empty the runner answers with success, so tests only
/// need to script the interesting responses.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<Result<CommandOutput, RemoteError>>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len().saturating_add(1));
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the final argument, which carries the remote command line for
    /// `ssh` invocations.
    #[must_use]
    pub fn last_arg(&self) -> Option<String> {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
    }

    /// Returns `true` when the invocation opens or closes a session master.
    #[must_use]
    pub fn is_session_control(&self) -> bool {
        self.args.iter().any(|arg| {
            let arg = arg.to_string_lossy();
            arg == "ControlMaster=yes" || arg == "-O"
        })
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the remote command lines sent through sessions, skipping
    /// session control and uploads.
    #[must_use]
    pub fn remote_commands(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .filter(|invocation| invocation.program == "ssh" && !invocation.is_session_control())
            .filter_map(CommandInvocation::last_arg)
            .collect()
    }

    /// Returns the invocations made with `program`.
    #[must_use]
    pub fn invocations_of(&self, program: &str) -> Vec<CommandInvocation> {
        self.invocations
            .borrow()
            .iter()
            .filter(|invocation| invocation.program == program)
            .cloned()
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an error as though the program could not be spawned.
    pub fn push_spawn_error(&self, program: &str) {
        self.responses
            .borrow_mut()
            .push_back(Err(RemoteError::Spawn {
                program: program.to_owned(),
                message: String::from("simulated spawn failure"),
            }));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses.borrow_mut().pop_front().unwrap_or_else(|| {
            Ok(CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }
}

/// In-memory state store that records every save.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    saves: Rc<RefCell<Vec<ProvisioningState>>>,
    fail_after: Rc<RefCell<Option<usize>>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every state passed to [`StateStore::save`], oldest first.
    #[must_use]
    pub fn saves(&self) -> Vec<ProvisioningState> {
        self.saves.borrow().clone()
    }

    /// Returns the most recently saved state.
    #[must_use]
    pub fn last(&self) -> Option<ProvisioningState> {
        self.saves.borrow().last().cloned()
    }

    /// Makes saves fail once `count` saves have succeeded.
    pub fn fail_after(&self, count: usize) {
        *self.fail_after.borrow_mut() = Some(count);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<ProvisioningState, StateStoreError> {
        Ok(self.last().unwrap_or_default())
    }

    fn save(&self, state: &ProvisioningState) -> Result<(), StateStoreError> {
        let saved = self.saves.borrow().len();
        if self.fail_after.borrow().is_some_and(|limit| saved >= limit) {
            return Err(StateStoreError::Io {
                path: String::from("memory"),
                message: String::from("simulated write failure"),
            });
        }
        self.saves.borrow_mut().push(state.clone());
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Transport configuration pointing at `zonehost.example` with defaults for
/// every other field.
#[must_use]
pub fn sample_transport_config() -> crate::config::TransportConfig {
    crate::config::TransportConfig {
        host: String::from("zonehost.example"),
        user: String::from("root"),
        port: 22,
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        identity_file: None,
        batch_mode: true,
        strict_host_key_checking: false,
        known_hosts_file: String::from("/dev/null"),
        control_dir: String::from("/tmp"),
        stage_dir: String::from("/var/tmp"),
    }
}

/// Zone configuration with a fixed name, port and address, rooted at
/// relative defaults.
#[must_use]
pub fn sample_zone_config() -> crate::config::ZoneConfig {
    crate::config::ZoneConfig {
        zone_base_name: String::from(crate::config::DEFAULT_ZONE_BASE_NAME),
        zone_name: Some(String::from("build-01")),
        zone_port: Some(40022),
        zone_ip: String::from("10.0.0.5"),
        zone_source: String::from("base"),
        nat_interface: String::from("net0"),
        zone_boot_timeout: 300,
        zone_username: String::from(crate::config::DEFAULT_ZONE_USERNAME),
        template_root: String::from("."),
        zone_config_template: String::from("zone.cfg.tera"),
        zone_profile_template: String::from("profile.xml.tera"),
        working_dir: String::from(".zonewright"),
        private_key_path: String::from(".zonewright/id_rsa"),
        public_key_path: String::from(".zonewright/id_rsa.pub"),
        state_path: String::from(".zonewright/state.json"),
    }
}
