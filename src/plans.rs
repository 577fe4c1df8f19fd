//! Plans and feature modules.
//!
//! The plan → module table below is the single authoritative mapping for the
//! whole system: the server derives `active_modules` from it on every
//! mutation, and the embedded client validator consults the same function
//! when gating features offline. Both sides therefore always agree on what a
//! plan unlocks.
//!
//! # Usage
//!
//! ```rust
//! use aegis::plans::{modules_for_plan, Module, Plan};
//!
//! let modules = modules_for_plan(Plan::Premium);
//! assert!(modules.contains(&Module::Analytics));
//! assert_eq!(Plan::Premium.max_users(), Some(50));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription plan attached to a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Demo,
    Basic,
    Premium,
    Enterprise,
}

impl Plan {
    /// All plans, in ascending order of entitlement.
    pub const ALL: [Plan; 4] = [Plan::Demo, Plan::Basic, Plan::Premium, Plan::Enterprise];

    /// Maximum concurrent users for the plan. `None` means unlimited.
    pub fn max_users(&self) -> Option<u32> {
        match self {
            Plan::Demo => Some(1),
            Plan::Basic => Some(5),
            Plan::Premium => Some(50),
            Plan::Enterprise => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Demo => "demo",
            Plan::Basic => "basic",
            Plan::Premium => "premium",
            Plan::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = UnknownPlan;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "demo" => Ok(Plan::Demo),
            "basic" => Ok(Plan::Basic),
            "premium" => Ok(Plan::Premium),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(UnknownPlan(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized plan name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlan(pub String);

impl fmt::Display for UnknownPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown plan: {}", self.0)
    }
}

impl std::error::Error for UnknownPlan {}

/// Feature module gated by a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    BasicFeatures,
    AdvancedSearch,
    Analytics,
    ApiAccess,
    PrioritySupport,
    Sso,
    AuditExport,
}

impl Module {
    pub fn as_str(&self) -> &'static str {
        match self {
            Module::BasicFeatures => "basic_features",
            Module::AdvancedSearch => "advanced_search",
            Module::Analytics => "analytics",
            Module::ApiAccess => "api_access",
            Module::PrioritySupport => "priority_support",
            Module::Sso => "sso",
            Module::AuditExport => "audit_export",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = UnknownModule;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic_features" => Ok(Module::BasicFeatures),
            "advanced_search" => Ok(Module::AdvancedSearch),
            "analytics" => Ok(Module::Analytics),
            "api_access" => Ok(Module::ApiAccess),
            "priority_support" => Ok(Module::PrioritySupport),
            "sso" => Ok(Module::Sso),
            "audit_export" => Ok(Module::AuditExport),
            other => Err(UnknownModule(other.to_string())),
        }
    }
}

/// Error returned when parsing an unrecognized module tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModule(pub String);

impl fmt::Display for UnknownModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown module: {}", self.0)
    }
}

impl std::error::Error for UnknownModule {}

/// The module set a plan entitles.
pub fn modules_for_plan(plan: Plan) -> BTreeSet<Module> {
    let tags: &[Module] = match plan {
        Plan::Demo => &[Module::BasicFeatures],
        Plan::Basic => &[Module::BasicFeatures, Module::AdvancedSearch],
        Plan::Premium => &[
            Module::BasicFeatures,
            Module::AdvancedSearch,
            Module::Analytics,
            Module::ApiAccess,
            Module::PrioritySupport,
        ],
        Plan::Enterprise => &[
            Module::BasicFeatures,
            Module::AdvancedSearch,
            Module::Analytics,
            Module::ApiAccess,
            Module::PrioritySupport,
            Module::Sso,
            Module::AuditExport,
        ],
    };
    tags.iter().copied().collect()
}

/// Check whether a plan includes a specific module.
pub fn plan_has_module(plan: Plan, module: Module) -> bool {
    modules_for_plan(plan).contains(&module)
}

/// The module set an expired license is reduced to.
pub fn expired_modules() -> BTreeSet<Module> {
    [Module::BasicFeatures].into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_has_only_basic_features() {
        let modules = modules_for_plan(Plan::Demo);
        assert_eq!(modules.len(), 1);
        assert!(modules.contains(&Module::BasicFeatures));
    }

    #[test]
    fn enterprise_is_premium_plus_sso_and_audit() {
        let premium = modules_for_plan(Plan::Premium);
        let enterprise = modules_for_plan(Plan::Enterprise);

        assert!(enterprise.is_superset(&premium));
        assert!(enterprise.contains(&Module::Sso));
        assert!(enterprise.contains(&Module::AuditExport));
        assert_eq!(enterprise.len(), premium.len() + 2);
    }

    #[test]
    fn every_plan_includes_basic_features() {
        for plan in Plan::ALL {
            assert!(
                plan_has_module(plan, Module::BasicFeatures),
                "{plan} should include basic_features"
            );
        }
    }

    #[test]
    fn max_users_per_plan() {
        assert_eq!(Plan::Demo.max_users(), Some(1));
        assert_eq!(Plan::Basic.max_users(), Some(5));
        assert_eq!(Plan::Premium.max_users(), Some(50));
        assert_eq!(Plan::Enterprise.max_users(), None);
    }

    #[test]
    fn plan_round_trips_through_str() {
        for plan in Plan::ALL {
            assert_eq!(plan.as_str().parse::<Plan>().unwrap(), plan);
        }
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn module_round_trips_through_str() {
        let all = modules_for_plan(Plan::Enterprise);
        for module in all {
            assert_eq!(module.as_str().parse::<Module>().unwrap(), module);
        }
        assert!("teleport".parse::<Module>().is_err());
    }

    #[test]
    fn expired_set_is_basic_features_only() {
        let reduced = expired_modules();
        assert_eq!(reduced.len(), 1);
        assert!(reduced.contains(&Module::BasicFeatures));
    }

    #[test]
    fn plan_serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&Plan::Premium).unwrap(), "\"premium\"");
        assert_eq!(
            serde_json::to_string(&Module::AdvancedSearch).unwrap(),
            "\"advanced_search\""
        );
    }
}
