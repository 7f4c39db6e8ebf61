//! Module entitlement resolution for staff sessions.

use serde::{Deserialize, Serialize};

/// The module sets a staff session operates under.
///
/// `dashboard_modules` drives UI rendering; `allowed_modules` is the
/// authorization ceiling and may be broader than what the role displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAccess {
    pub dashboard_modules: Vec<String>,
    pub allowed_modules: Vec<String>,
}

/// Combine a role's module list with the tenant's active subscription
/// modules.
///
/// A tenant with no active modules recorded (legacy tenant, provisioning in
/// flight) imposes no restriction: the role list passes through unchanged.
/// Otherwise the dashboard set is the intersection in role order with
/// duplicates removed, while the ceiling is the tenant's full active list.
pub fn resolve_module_access(
    role_modules: &[String],
    tenant_active_modules: &[String],
) -> ModuleAccess {
    if tenant_active_modules.is_empty() {
        return ModuleAccess {
            dashboard_modules: role_modules.to_vec(),
            allowed_modules: role_modules.to_vec(),
        };
    }

    let mut dashboard_modules = Vec::new();
    for module in role_modules {
        if tenant_active_modules.contains(module) && !dashboard_modules.contains(module) {
            dashboard_modules.push(module.clone());
        }
    }

    ModuleAccess {
        dashboard_modules,
        allowed_modules: tenant_active_modules.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_tenant_set_passes_role_list_through() {
        let access = resolve_module_access(&modules(&["pos", "kitchen"]), &[]);
        assert_eq!(access.dashboard_modules, modules(&["pos", "kitchen"]));
        assert_eq!(access.allowed_modules, modules(&["pos", "kitchen"]));
    }

    #[test]
    fn restrictive_tenant_intersects_in_role_order() {
        let access = resolve_module_access(
            &modules(&["pos", "kitchen", "reports"]),
            &modules(&["pos", "reports"]),
        );
        assert_eq!(access.dashboard_modules, modules(&["pos", "reports"]));
        assert_eq!(access.allowed_modules, modules(&["pos", "reports"]));
    }

    #[test]
    fn ceiling_is_tenant_list_even_when_role_is_narrower() {
        let access = resolve_module_access(
            &modules(&["pos"]),
            &modules(&["pos", "inventory", "reports"]),
        );
        assert_eq!(access.dashboard_modules, modules(&["pos"]));
        assert_eq!(
            access.allowed_modules,
            modules(&["pos", "inventory", "reports"])
        );
    }

    #[test]
    fn duplicate_role_entries_are_dropped() {
        let access = resolve_module_access(
            &modules(&["pos", "pos", "kitchen"]),
            &modules(&["pos", "kitchen"]),
        );
        assert_eq!(access.dashboard_modules, modules(&["pos", "kitchen"]));
    }

    #[test]
    fn role_with_nothing_in_common_sees_empty_dashboard() {
        let access = resolve_module_access(&modules(&["reservations"]), &modules(&["pos"]));
        assert!(access.dashboard_modules.is_empty());
        assert_eq!(access.allowed_modules, modules(&["pos"]));
    }
}
