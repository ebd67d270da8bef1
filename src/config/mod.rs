//! Configuration loading via `ortho-config`.
//!
//! Two layered structures are loaded from defaults, `zonewright.toml` and
//! environment variables: [`TransportConfig`] describes how to reach the zone
//! host and [`ZoneConfig`] describes the zone itself. [`ZoneConfig::resolve`]
//! turns the latter into [`ZoneSettings`], the validated, absolute-path form
//! consumed by the orchestrator.

use std::net::Ipv4Addr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::KeyPaths;
use crate::zone::{IdentityError, ZoneIdentity, ZoneName};

const CONFIG_FILE: &str = "zonewright.toml";

/// Default prefix for generated zone names.
pub const DEFAULT_ZONE_BASE_NAME: &str = "zonewright";

/// Default account published for connecting to the zone.
pub const DEFAULT_ZONE_USERNAME: &str = "zonewright";

/// SSH settings for the host that carries the zones.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ZONEWRIGHT_SSH",
    discovery(
        app_name = "zonewright",
        env_var = "ZONEWRIGHT_CONFIG_PATH",
        config_file_name = "zonewright.toml",
        dotfile_name = ".zonewright.toml",
        project_file_name = "zonewright.toml"
    )
)]
pub struct TransportConfig {
    /// Host name or address of the zone host. Also published to consumers
    /// as the hostname for reaching the zone.
    pub host: String,
    /// Account used on the zone host; must be allowed to administer zones.
    #[ortho_config(default = "root".to_owned())]
    pub user: String,
    /// SSH port on the zone host.
    #[ortho_config(default = 22)]
    pub port: u16,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Private key used to authenticate to the host. Supports `~/`.
    pub identity_file: Option<String>,
    /// Whether to force batch mode to avoid password prompts.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Local directory holding session control sockets.
    #[ortho_config(default = "/tmp".to_owned())]
    pub control_dir: String,
    /// Directory on the host where rendered artifacts are staged.
    #[ortho_config(default = "/var/tmp".to_owned())]
    pub stage_dir: String,
}

/// Zone parameters and local artifact locations.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ZONEWRIGHT",
    discovery(
        app_name = "zonewright",
        env_var = "ZONEWRIGHT_CONFIG_PATH",
        config_file_name = "zonewright.toml",
        dotfile_name = ".zonewright.toml",
        project_file_name = "zonewright.toml"
    )
)]
pub struct ZoneConfig {
    /// Prefix for generated zone names; a random suffix is appended.
    #[ortho_config(default = DEFAULT_ZONE_BASE_NAME.to_owned())]
    pub zone_base_name: String,
    /// Explicit zone name, used verbatim instead of a generated one.
    pub zone_name: Option<String>,
    /// Explicit forwarded port instead of a random ephemeral one.
    pub zone_port: Option<u16>,
    /// IPv4 address the zone definition assigns to the zone.
    pub zone_ip: String,
    /// Installed zone cloned to create new zones.
    #[ortho_config(default = "base".to_owned())]
    pub zone_source: String,
    /// Host interface the port-forward rule is attached to.
    #[ortho_config(default = "net0".to_owned())]
    pub nat_interface: String,
    /// Seconds to wait for the zone network after boot.
    #[ortho_config(default = 300)]
    pub zone_boot_timeout: u64,
    /// Account published for connecting to the zone.
    #[ortho_config(default = DEFAULT_ZONE_USERNAME.to_owned())]
    pub zone_username: String,
    /// Directory template names are resolved against.
    #[ortho_config(default = ".".to_owned())]
    pub template_root: String,
    /// Template producing the `zonecfg` command file.
    #[ortho_config(default = "zone.cfg.tera".to_owned())]
    pub zone_config_template: String,
    /// Template producing the system configuration profile.
    #[ortho_config(default = "profile.xml.tera".to_owned())]
    pub zone_profile_template: String,
    /// Directory receiving rendered artifacts.
    #[ortho_config(default = ".zonewright".to_owned())]
    pub working_dir: String,
    /// Private half of the zone key pair.
    #[ortho_config(default = ".zonewright/id_rsa".to_owned())]
    pub private_key_path: String,
    /// Public half of the zone key pair.
    #[ortho_config(default = ".zonewright/id_rsa.pub".to_owned())]
    pub public_key_path: String,
    /// File recording provisioning progress.
    #[ortho_config(default = ".zonewright/state.json".to_owned())]
    pub state_path: String,
}

/// Validated zone settings with absolute paths and a fixed identity.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ZoneSettings {
    /// Name and forwarded port chosen for this zone.
    pub identity: ZoneIdentity,
    /// Address assigned inside the zone.
    pub zone_ip: Ipv4Addr,
    /// Installed zone cloned to create new zones.
    pub zone_source: String,
    /// Host interface the port-forward rule is attached to.
    pub nat_interface: String,
    /// Seconds to wait for the zone network after boot.
    pub zone_boot_timeout: u64,
    /// Account published for connecting to the zone.
    pub username: String,
    /// Directory template names are resolved against.
    pub template_root: Utf8PathBuf,
    /// Template producing the `zonecfg` command file.
    pub config_template: String,
    /// Template producing the system configuration profile.
    pub profile_template: String,
    /// Directory receiving rendered artifacts.
    pub working_dir: Utf8PathBuf,
    /// Zone key pair locations.
    pub key_paths: KeyPaths,
    /// File recording provisioning progress.
    pub state_path: Utf8PathBuf,
}

impl ZoneSettings {
    /// Boot readiness budget as a [`Duration`].
    #[must_use]
    pub const fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.zone_boot_timeout)
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in {CONFIG_FILE}",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl TransportConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("zonewright")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                self.host.as_str(),
                FieldMetadata::new("zone host", "ZONEWRIGHT_SSH_HOST", "host", "ssh"),
            ),
            (
                self.user.as_str(),
                FieldMetadata::new("SSH user", "ZONEWRIGHT_SSH_USER", "user", "ssh"),
            ),
            (
                self.ssh_bin.as_str(),
                FieldMetadata::new("ssh binary", "ZONEWRIGHT_SSH_SSH_BIN", "ssh_bin", "ssh"),
            ),
            (
                self.scp_bin.as_str(),
                FieldMetadata::new("scp binary", "ZONEWRIGHT_SSH_SCP_BIN", "scp_bin", "ssh"),
            ),
            (
                self.control_dir.as_str(),
                FieldMetadata::new(
                    "control socket directory",
                    "ZONEWRIGHT_SSH_CONTROL_DIR",
                    "control_dir",
                    "ssh",
                ),
            ),
            (
                self.stage_dir.as_str(),
                FieldMetadata::new(
                    "remote staging directory",
                    "ZONEWRIGHT_SSH_STAGE_DIR",
                    "stage_dir",
                    "ssh",
                ),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }

        if let Some(identity_file) = self.identity_file.as_deref() {
            require_field(
                identity_file,
                &FieldMetadata::new(
                    "SSH identity file",
                    "ZONEWRIGHT_SSH_IDENTITY_FILE",
                    "identity_file",
                    "ssh",
                ),
            )?;
        }
        Ok(())
    }
}

impl ZoneConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("zonewright")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::Invalid`] when a value cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                self.zone_ip.as_str(),
                FieldMetadata::new("zone IPv4 address", "ZONEWRIGHT_ZONE_IP", "zone_ip", "zone"),
            ),
            (
                self.zone_base_name.as_str(),
                FieldMetadata::new(
                    "zone base name",
                    "ZONEWRIGHT_ZONE_BASE_NAME",
                    "zone_base_name",
                    "zone",
                ),
            ),
            (
                self.zone_source.as_str(),
                FieldMetadata::new(
                    "clone source zone",
                    "ZONEWRIGHT_ZONE_SOURCE",
                    "zone_source",
                    "zone",
                ),
            ),
            (
                self.zone_username.as_str(),
                FieldMetadata::new(
                    "zone username",
                    "ZONEWRIGHT_ZONE_USERNAME",
                    "zone_username",
                    "zone",
                ),
            ),
            (
                self.zone_config_template.as_str(),
                FieldMetadata::new(
                    "zone definition template",
                    "ZONEWRIGHT_ZONE_CONFIG_TEMPLATE",
                    "zone_config_template",
                    "zone",
                ),
            ),
            (
                self.zone_profile_template.as_str(),
                FieldMetadata::new(
                    "zone profile template",
                    "ZONEWRIGHT_ZONE_PROFILE_TEMPLATE",
                    "zone_profile_template",
                    "zone",
                ),
            ),
            (
                self.working_dir.as_str(),
                FieldMetadata::new(
                    "working directory",
                    "ZONEWRIGHT_WORKING_DIR",
                    "working_dir",
                    "zone",
                ),
            ),
            (
                self.private_key_path.as_str(),
                FieldMetadata::new(
                    "private key path",
                    "ZONEWRIGHT_PRIVATE_KEY_PATH",
                    "private_key_path",
                    "zone",
                ),
            ),
            (
                self.public_key_path.as_str(),
                FieldMetadata::new(
                    "public key path",
                    "ZONEWRIGHT_PUBLIC_KEY_PATH",
                    "public_key_path",
                    "zone",
                ),
            ),
            (
                self.state_path.as_str(),
                FieldMetadata::new("state path", "ZONEWRIGHT_STATE_PATH", "state_path", "zone"),
            ),
        ];
        for (value, metadata) in &fields {
            require_field(value, metadata)?;
        }

        if self.zone_boot_timeout == 0 {
            return Err(ConfigError::Invalid(String::from(
                "zone_boot_timeout must be greater than zero",
            )));
        }
        if !self
            .nat_interface
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.'))
            || self.nat_interface.is_empty()
        {
            return Err(ConfigError::Invalid(format!(
                "nat_interface '{}' is not a valid interface name",
                self.nat_interface
            )));
        }
        Ok(())
    }

    /// Resolves the configuration into [`ZoneSettings`].
    ///
    /// Relative paths are joined onto `cwd` after `~/` expansion. The zone
    /// identity is fixed here: explicit `zone_name`/`zone_port` values are
    /// validated, missing ones are generated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or a value is malformed.
    pub fn resolve(&self, cwd: &Utf8Path) -> Result<ZoneSettings, ConfigError> {
        self.validate()?;

        let zone_ip = self.zone_ip.trim().parse::<Ipv4Addr>().map_err(|err| {
            ConfigError::Invalid(format!("zone_ip '{}': {err}", self.zone_ip.trim()))
        })?;

        let name = self.zone_name.as_deref().map_or_else(
            || Ok(ZoneName::generate(&self.zone_base_name)),
            |explicit| ZoneName::parse(explicit.trim()),
        )?;
        let identity = self.zone_port.map_or_else(
            || Ok(ZoneIdentity::with_random_port(name.clone())),
            |port| ZoneIdentity::new(name.clone(), port),
        )?;

        Ok(ZoneSettings {
            identity,
            zone_ip,
            zone_source: self.zone_source.trim().to_owned(),
            nat_interface: self.nat_interface.clone(),
            zone_boot_timeout: self.zone_boot_timeout,
            username: self.zone_username.trim().to_owned(),
            template_root: absolutize(&self.template_root, cwd),
            config_template: self.zone_config_template.trim().to_owned(),
            profile_template: self.zone_profile_template.trim().to_owned(),
            working_dir: absolutize(&self.working_dir, cwd),
            key_paths: KeyPaths {
                private: absolutize(&self.private_key_path, cwd),
                public: absolutize(&self.public_key_path, cwd),
            },
            state_path: absolutize(&self.state_path, cwd),
        })
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is not set the input is returned unchanged.
///
/// # Examples
///
/// ```
/// # use zonewright::config::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/id_rsa"), format!("{home}/.ssh/id_rsa"));
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Makes `path` absolute, expanding `~/` and joining relative paths onto
/// `cwd`.
#[must_use]
pub fn absolutize(path: &str, cwd: &Utf8Path) -> Utf8PathBuf {
    let expanded = Utf8PathBuf::from(expand_tilde(path.trim()));
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<IdentityError> for ConfigError {
    fn from(value: IdentityError) -> Self {
        Self::Invalid(value.to_string())
    }
}
