//! Binary entry point for the Zonewright CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use zonewright::config::absolutize;
use zonewright::{
    ConfigError, FileStateStore, ProcessCommandRunner, ProvisioningState, SshTransport,
    StateStore, StateStoreError, TransportConfig, ZoneConfig, ZoneError, ZoneOrchestrator,
};

mod cli;

use cli::{Cli, StateArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot determine working directory: {0}")]
    WorkingDir(String),
    #[error("state error: {0}")]
    State(#[from] StateStoreError),
    #[error("{0}")]
    Zone(#[from] ZoneError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Create(args) => create(&args).await,
        Cli::Destroy(args) => destroy(&args),
        Cli::Status(args) => status(&args),
    }
}

async fn create(args: &StateArgs) -> Result<(), CliError> {
    let (orchestrator, store) = build_orchestrator(args)?;
    let mut state = store.load()?;
    let result = orchestrator.create(&mut state).await;
    write_state(io::stdout(), &state)?;
    result.map_err(CliError::from)
}

fn destroy(args: &StateArgs) -> Result<(), CliError> {
    let (orchestrator, store) = build_orchestrator(args)?;
    let mut state = store.load()?;
    orchestrator.destroy(&mut state)?;
    Ok(())
}

fn status(args: &StateArgs) -> Result<(), CliError> {
    let cwd = current_dir()?;
    let configured = args.state.clone().map_or_else(
        || ZoneConfig::load_without_cli_args().map(|config| config.state_path),
        Ok,
    )?;
    let state = FileStateStore::new(absolutize(&configured, &cwd)).load()?;
    write_state(io::stdout(), &state)
}

type Orchestrator = ZoneOrchestrator<ProcessCommandRunner, FileStateStore>;

fn build_orchestrator(args: &StateArgs) -> Result<(Orchestrator, FileStateStore), CliError> {
    let cwd = current_dir()?;
    let settings = ZoneConfig::load_without_cli_args()?.resolve(&cwd)?;
    let state_path = args
        .state
        .as_deref()
        .map_or_else(|| settings.state_path.clone(), |path| absolutize(path, &cwd));
    let store = FileStateStore::new(state_path);

    let transport = SshTransport::new(
        TransportConfig::load_without_cli_args()?,
        ProcessCommandRunner,
    )?;
    let orchestrator = ZoneOrchestrator::new(settings, transport, store.clone());
    Ok((orchestrator, store))
}

fn current_dir() -> Result<Utf8PathBuf, CliError> {
    let cwd = std::env::current_dir().map_err(|err| CliError::WorkingDir(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::WorkingDir(format!("{} is not UTF-8", path.display())))
}

fn write_state(mut target: impl Write, state: &ProvisioningState) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(state).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonewright::ZonePhase;

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Zone(ZoneError::ReadinessTimeout {
            command: String::from("/usr/sbin/ping 10.0.0.5 1"),
            attempts: 6,
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            rendered,
            "zone not ready after 6 attempts of `/usr/sbin/ping 10.0.0.5 1`\n"
        );
    }

    #[test]
    fn write_state_prints_empty_record_as_empty_object() {
        let mut buf = Vec::new();
        write_state(&mut buf, &ProvisioningState::default()).expect("write state");
        assert_eq!(String::from_utf8(buf).expect("utf8"), "{}\n");
    }

    #[test]
    fn write_state_includes_coordinates() {
        let state = ProvisioningState {
            hostname: Some(String::from("zonehost.example")),
            port: Some(40022),
            username: Some(String::from("zonewright")),
            phase: Some(ZonePhase::Ready),
            ..ProvisioningState::default()
        };
        let mut buf = Vec::new();
        write_state(&mut buf, &state).expect("write state");
        let rendered = String::from_utf8(buf).expect("utf8");
        let parsed: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        assert_eq!(parsed["hostname"], "zonehost.example");
        assert_eq!(parsed["port"], 40022);
        assert_eq!(parsed["phase"], "ready");
    }
}
