pub mod plan;
pub mod tenant;

pub use plan::{ServicePlan, TenantPlanAssignment};
pub use tenant::{NewTenant, Tenant, TenantStatus};
