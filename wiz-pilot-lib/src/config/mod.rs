use std::collections::HashSet;
use std::path::Path;

use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::identity::{DeviceIdentity, Group, HardwareId, IdentityRegistry};
use crate::resolver::OverrideResolver;

const DEFAULT_CONFIG: &str = include_str!("default.yaml");

lazy_static! {
    static ref BUILTIN: Result<Configuration, String> =
        serde_yaml::from_str(DEFAULT_CONFIG).map_err(|e| e.to_string());
}

/// Highest dimming value a bulb accepts.
pub const MAX_DIMMING: u8 = 100;

/// Lighting parameters of a `setPilot` request.
///
/// Every field is optional. When layering, an absent field keeps the value of
/// the layer beneath; on the wire, an absent field is left out entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSet {
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub red: Option<u8>,
    #[serde(rename = "g", default, skip_serializing_if = "Option::is_none")]
    pub green: Option<u8>,
    #[serde(rename = "b", default, skip_serializing_if = "Option::is_none")]
    pub blue: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimming: Option<u8>,
    #[serde(rename = "sceneId", default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<u32>,
}

impl ParameterSet {
    pub fn rgb(red: u8, green: u8, blue: u8) -> Self {
        ParameterSet {
            red: Some(red),
            green: Some(green),
            blue: Some(blue),
            ..Default::default()
        }
    }

    pub fn with_dimming(mut self, dimming: u8) -> Self {
        self.dimming = Some(dimming);
        self
    }

    /// Returns `self` with every field present in `top` replaced by it.
    pub fn overlay(&self, top: &ParameterSet) -> ParameterSet {
        ParameterSet {
            red: top.red.or(self.red),
            green: top.green.or(self.green),
            blue: top.blue.or(self.blue),
            dimming: top.dimming.or(self.dimming),
            scene_id: top.scene_id.or(self.scene_id),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ParameterSet::default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.dimming {
            Some(dimming) if dimming > MAX_DIMMING => Err(ConfigError::OutOfRange {
                field: "dimming",
                value: dimming.into(),
                max: MAX_DIMMING.into(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideScope {
    Group(Group),
    Device(HardwareId),
}

impl std::fmt::Display for OverrideScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideScope::Group(group) => write!(f, "group {}", group),
            OverrideScope::Device(id) => write!(f, "device {}", id),
        }
    }
}

/// A parameter patch for a group or a single device.
///
/// Disabled rules stay in the table but never apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRule {
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub scope: OverrideScope,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub params: ParameterSet,
}

/// The static configuration as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    #[serde(default)]
    pub defaults: ParameterSet,
    #[serde(default)]
    pub devices: Vec<DeviceIdentity>,
    #[serde(default)]
    pub overrides: Vec<OverrideRule>,
    /// Display names of devices that are never sent commands.
    #[serde(default)]
    pub skip: Vec<String>,
}

impl Configuration {
    /// The table compiled into the library.
    pub fn builtin() -> Result<Self, ConfigError> {
        match &*BUILTIN {
            Ok(config) => Ok(config.clone()),
            // Re-parse to hand the caller a real serde_yaml error.
            Err(_) => Ok(serde_yaml::from_str(DEFAULT_CONFIG)?),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// A validated, read-only view of a [`Configuration`].
///
/// Built once at startup and shared by reference for the rest of the run.
#[derive(Debug, Clone)]
pub struct Installation {
    pub registry: IdentityRegistry,
    pub resolver: OverrideResolver,
    pub skip: HashSet<HardwareId>,
}

impl Installation {
    pub fn new(config: Configuration) -> Result<Self, ConfigError> {
        let Configuration {
            defaults,
            devices,
            overrides,
            skip,
        } = config;

        defaults.validate()?;
        let registry = IdentityRegistry::new(devices)?;

        let mut scopes = HashSet::new();
        for rule in &overrides {
            rule.params.validate()?;
            if let OverrideScope::Device(id) = &rule.scope {
                if registry.lookup(id).is_none() {
                    return Err(ConfigError::UnknownDevice(id.to_string()));
                }
            }
            if !scopes.insert(rule.scope.clone()) {
                return Err(ConfigError::DuplicateOverride(rule.scope.to_string()));
            }
        }

        let skip = skip
            .iter()
            .map(|name| {
                registry
                    .by_name(name)
                    .map(|d| d.identifier.clone())
                    .ok_or_else(|| ConfigError::UnknownSkipEntry(name.clone()))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let resolver = OverrideResolver::new(defaults, &overrides, &registry);
        Ok(Installation {
            registry,
            resolver,
            skip,
        })
    }

    pub fn is_skipped(&self, identifier: &HardwareId) -> bool {
        self.skip.contains(identifier)
    }
}
