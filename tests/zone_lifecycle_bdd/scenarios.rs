//! BDD scenarios for the zone lifecycle.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ZoneContextResult, zone_context_result};

#[scenario(
    path = "tests/features/zone_lifecycle.feature",
    name = "Create a zone from a fresh state"
)]
fn scenario_fresh_create(zone_context_result: ZoneContextResult) {
    drop(zone_context_result);
}

#[scenario(
    path = "tests/features/zone_lifecycle.feature",
    name = "Surface boot readiness timeouts and clean up afterwards"
)]
fn scenario_boot_timeout(zone_context_result: ZoneContextResult) {
    drop(zone_context_result);
}

#[scenario(
    path = "tests/features/zone_lifecycle.feature",
    name = "Destroy a ready zone"
)]
fn scenario_destroy_ready(zone_context_result: ZoneContextResult) {
    drop(zone_context_result);
}

#[scenario(
    path = "tests/features/zone_lifecycle.feature",
    name = "Destroy with nothing recorded"
)]
fn scenario_destroy_empty(zone_context_result: ZoneContextResult) {
    drop(zone_context_result);
}

#[scenario(
    path = "tests/features/zone_lifecycle.feature",
    name = "Resume teardown after a failed halt"
)]
fn scenario_halt_failure(zone_context_result: ZoneContextResult) {
    drop(zone_context_result);
}

#[scenario(
    path = "tests/features/zone_lifecycle.feature",
    name = "Tolerate a missing port-forward rule during teardown"
)]
fn scenario_nat_already_gone(zone_context_result: ZoneContextResult) {
    drop(zone_context_result);
}
