use std::collections::HashMap;

use serde::Serialize;

use crate::config::{OverrideRule, OverrideScope, ParameterSet};
use crate::identity::{Group, HardwareId, IdentityRegistry};

pub mod fade;

/// The parameter set actually sent to a device, and which tiers produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveParameters {
    pub params: ParameterSet,
    pub group_override: bool,
    pub device_override: bool,
}

/// Folds defaults, group overrides and device overrides into
/// [`EffectiveParameters`].
///
/// The fold order is fixed: defaults first, then the enabled override of the
/// device's group, then the enabled override of the device itself. Disabled
/// rules are dropped at construction and can never apply.
#[derive(Debug, Clone)]
pub struct OverrideResolver {
    defaults: ParameterSet,
    membership: HashMap<HardwareId, Group>,
    group_rules: HashMap<Group, ParameterSet>,
    device_rules: HashMap<HardwareId, ParameterSet>,
}

impl OverrideResolver {
    pub fn new(
        defaults: ParameterSet,
        rules: &[OverrideRule],
        registry: &IdentityRegistry,
    ) -> Self {
        let membership = registry
            .devices()
            .iter()
            .map(|d| (d.identifier.clone(), d.group))
            .collect();

        let mut group_rules = HashMap::new();
        let mut device_rules = HashMap::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            match &rule.scope {
                OverrideScope::Group(group) => {
                    group_rules.insert(*group, rule.params);
                }
                OverrideScope::Device(id) => {
                    device_rules.insert(id.clone(), rule.params);
                }
            }
        }

        OverrideResolver {
            defaults,
            membership,
            group_rules,
            device_rules,
        }
    }

    pub fn defaults(&self) -> &ParameterSet {
        &self.defaults
    }

    pub fn resolve(&self, identifier: &HardwareId) -> EffectiveParameters {
        let mut effective = EffectiveParameters {
            params: self.defaults,
            ..Default::default()
        };

        if let Some(patch) = self
            .membership
            .get(identifier)
            .and_then(|group| self.group_rules.get(group))
        {
            effective.params = effective.params.overlay(patch);
            effective.group_override = true;
        }

        if let Some(patch) = self.device_rules.get(identifier) {
            effective.params = effective.params.overlay(patch);
            effective.device_override = true;
        }

        effective
    }
}
