pub mod entitlements;
pub mod plans;
pub mod provisioning;

pub use entitlements::{resolve_module_access, ModuleAccess};
pub use provisioning::{ProvisioningService, SignupOutcome, SignupRequest};
