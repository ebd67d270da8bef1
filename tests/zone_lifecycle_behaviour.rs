//! Behavioural scenarios for zone creation and destruction.

mod zone_lifecycle_bdd;
