//! The cloud-facing boundary: Traffic Manager profile/endpoint CRUD.
//!
//! This module is deliberately thin. The Azure SDK integration proper (auth
//! refresh, retries beyond what the reconciler itself does, ARM throttling
//! budgets) is out of scope for this crate; what lives here is the minimal
//! typed client the reconciliation core drives, plus a fake for tests.

pub mod arm_client;
pub mod client;
pub mod error;
pub mod types;

#[cfg(test)]
pub mod fake;

pub use arm_client::ArmTrafficManagerClient;
pub use client::TrafficManagerClient;
pub use error::CloudError;
pub use types::{CloudProfile, Endpoint};
