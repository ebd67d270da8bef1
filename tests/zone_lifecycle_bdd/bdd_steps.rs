//! BDD step definitions for the zone lifecycle.

use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;
use zonewright::StateStore;

use super::test_helpers::{FailureKind, LifecycleResult, ZoneContext, ZoneTestError};

const ADD_NAT: &str =
    "echo 'rdr net0 0.0.0.0/0 port 40022 -> 10.0.0.5 port 22 tcp' | /usr/sbin/ipnat -f -";
const REMOVE_NAT: &str =
    "echo 'rdr net0 0.0.0.0/0 port 40022 -> 10.0.0.5 port 22 tcp' | /usr/sbin/ipnat -r -f -";
const HALT: &str = "/usr/sbin/zoneadm -z build-01 halt";
const UNINSTALL: &str = "/usr/sbin/zoneadm -z build-01 uninstall -F";
const DELETE: &str = "/usr/sbin/zonecfg -z build-01 delete -F";
const REMOVE_STAGED: &str = "rm -f /var/tmp/build-01.cfg /var/tmp/build-01.xml";
const SESSION_OPEN_AND_CREATE_STEPS: usize = 6;
const READINESS_ATTEMPTS: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] ZoneTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn run_create(mut zone_context: ZoneContext) -> Result<ZoneContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = zone_context.orchestrator()?;
    let mut state = zone_context.state.clone();
    let result = runtime.block_on(orchestrator.create(&mut state));
    zone_context.state = state;
    zone_context.outcome = Some(LifecycleResult::from(result));
    Ok(zone_context)
}

#[given("a zone host that accepts every command")]
fn accepting_host(zone_context: ZoneContext) -> ZoneContext {
    zone_context
}

#[given("the zone network never answers")]
fn network_never_answers(zone_context: ZoneContext) -> ZoneContext {
    for _ in 0..SESSION_OPEN_AND_CREATE_STEPS {
        zone_context.runner.push_success();
    }
    for _ in 0..READINESS_ATTEMPTS {
        zone_context.runner.push_exit_code(1);
    }
    zone_context
}

#[given("a ready zone")]
fn ready_zone(zone_context: ZoneContext) -> Result<ZoneContext, StepError> {
    let mut created = run_create(zone_context)?;
    if created.outcome != Some(LifecycleResult::Success) {
        return Err(StepError::Assertion(format!(
            "expected the zone to be created, got {:?}",
            created.outcome
        )));
    }
    created.commands_before = created.runner.remote_commands().len();
    created.outcome = None;
    Ok(created)
}

#[given("halting the zone fails with exit code \"{code}\"")]
fn halt_fails(zone_context: ZoneContext, code: i32) -> ZoneContext {
    // Session open and port-forward removal precede the halt.
    zone_context.runner.push_success();
    zone_context.runner.push_success();
    zone_context.runner.push_failure(code);
    zone_context
}

#[given("the port-forward rule is already gone")]
fn nat_rule_gone(zone_context: ZoneContext) -> ZoneContext {
    zone_context.runner.push_success();
    zone_context
        .runner
        .push_output(Some(1), "", "ipnat: no matching rule");
    zone_context
}

#[when("I create the zone")]
fn create_zone(zone_context: ZoneContext) -> Result<ZoneContext, StepError> {
    run_create(zone_context)
}

#[when("I destroy the zone")]
fn destroy_zone(mut zone_context: ZoneContext) -> Result<ZoneContext, StepError> {
    let orchestrator = zone_context.orchestrator()?;
    let mut state = zone_context.state.clone();
    let result = orchestrator.destroy(&mut state);
    zone_context.state = state;
    zone_context.outcome = Some(LifecycleResult::from(result));
    Ok(zone_context)
}

#[then("the operation succeeds")]
fn operation_succeeds(zone_context: &ZoneContext) -> Result<(), StepError> {
    match zone_context.outcome {
        Some(LifecycleResult::Success) => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected success, got {other:?}"
        ))),
    }
}

fn expect_failure(zone_context: &ZoneContext, expected: FailureKind) -> Result<(), StepError> {
    match zone_context.outcome {
        Some(LifecycleResult::Failure { kind, .. }) if kind == expected => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected {expected:?} failure, got {other:?}"
        ))),
    }
}

#[then("the operation fails with a readiness timeout")]
fn fails_with_timeout(zone_context: &ZoneContext) -> Result<(), StepError> {
    expect_failure(zone_context, FailureKind::ReadinessTimeout)
}

#[then("the operation fails with a remote execution error")]
fn fails_with_remote_error(zone_context: &ZoneContext) -> Result<(), StepError> {
    expect_failure(zone_context, FailureKind::RemoteExecution)
}

#[then("the state publishes port \"{port}\" for user \"{user}\"")]
fn publishes_coordinates(
    zone_context: &ZoneContext,
    port: u16,
    user: String,
) -> Result<(), StepError> {
    let state = &zone_context.state;
    if state.hostname.as_deref() != Some("zonehost.example") {
        return Err(StepError::Assertion(format!(
            "unexpected hostname {:?}",
            state.hostname
        )));
    }
    if state.port != Some(port) || state.zone_port != Some(port) {
        return Err(StepError::Assertion(format!(
            "expected port {port}, got port {:?} and zone port {:?}",
            state.port, state.zone_port
        )));
    }
    if state.username.as_deref() != Some(user.as_str()) {
        return Err(StepError::Assertion(format!(
            "expected user {user}, got {:?}",
            state.username
        )));
    }
    Ok(())
}

#[then("the recorded phase is \"{phase}\"")]
fn recorded_phase(zone_context: &ZoneContext, phase: String) -> Result<(), StepError> {
    let stored = zone_context
        .store
        .load()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let recorded = stored.phase.map(|value| value.as_str());
    if recorded != Some(phase.as_str()) {
        return Err(StepError::Assertion(format!(
            "expected phase {phase}, state file records {recorded:?}"
        )));
    }
    if stored != zone_context.state {
        return Err(StepError::Assertion(String::from(
            "state file differs from in-memory state",
        )));
    }
    Ok(())
}

fn expect_commands(actual: &[String], expected: &[&str]) -> Result<(), StepError> {
    if actual == expected {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected commands {expected:?}, got {actual:?}"
    )))
}

#[then("the host ran the creation commands in order")]
fn creation_commands(zone_context: &ZoneContext) -> Result<(), StepError> {
    expect_commands(
        &zone_context.runner.remote_commands(),
        &[
            "/usr/sbin/zonecfg -z build-01 -f /var/tmp/build-01.cfg",
            "/usr/sbin/zoneadm -z build-01 clone -c /var/tmp/build-01.xml base",
            "/usr/sbin/zoneadm -z build-01 boot",
            "/usr/sbin/ping 10.0.0.5 1",
            ADD_NAT,
        ],
    )
}

#[then("the host ran the teardown commands in order")]
fn teardown_commands(zone_context: &ZoneContext) -> Result<(), StepError> {
    expect_commands(
        &zone_context.recent_commands(),
        &[REMOVE_NAT, HALT, UNINSTALL, DELETE, REMOVE_STAGED],
    )
}

#[then("the host ran halt, uninstall and delete after the failed create")]
fn teardown_after_timeout(zone_context: &ZoneContext) -> Result<(), StepError> {
    let commands = zone_context.runner.remote_commands();
    let teardown: Vec<String> = commands
        .iter()
        .skip_while(|line| !line.ends_with("halt"))
        .cloned()
        .collect();
    expect_commands(&teardown, &[HALT, UNINSTALL, DELETE, REMOVE_STAGED])?;
    if commands.iter().any(|line| line.contains("ipnat")) {
        return Err(StepError::Assertion(String::from(
            "no port-forward rule was installed, none should be removed",
        )));
    }
    Ok(())
}

#[then("no state is recorded")]
fn no_state(zone_context: &ZoneContext) -> Result<(), StepError> {
    if !zone_context.state.is_empty() {
        return Err(StepError::Assertion(format!(
            "expected empty state, got {:?}",
            zone_context.state
        )));
    }
    if zone_context.store.path().exists() {
        return Err(StepError::Assertion(String::from(
            "state file should be removed once empty",
        )));
    }
    Ok(())
}

#[then("no remote command was issued")]
fn no_remote_commands(zone_context: &ZoneContext) -> Result<(), StepError> {
    let invocations = zone_context.runner.invocations();
    if invocations.is_empty() {
        return Ok(());
    }
    Err(StepError::Assertion(format!(
        "expected no invocations, got {invocations:?}"
    )))
}
