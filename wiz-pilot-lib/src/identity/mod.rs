use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A normalized hardware address: twelve lowercase hex digits, no separators.
///
/// Accepts `cc:40:85:3d:91:42`, `CC-40-85-3D-91-42`, `cc40853d9142` and the
/// unpadded form some ARP tools print (`c:40:85:3d:91:42`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HardwareId(String);

impl HardwareId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HardwareId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidHardwareId(s.to_string());
        let s = s.trim();

        let normalized = if s.contains(':') || s.contains('-') {
            let octets: Vec<&str> = s.split([':', '-']).collect();
            if octets.len() != 6 {
                return Err(invalid());
            }
            let mut out = String::with_capacity(12);
            for octet in octets {
                if octet.is_empty() || octet.len() > 2 {
                    return Err(invalid());
                }
                if octet.len() == 1 {
                    out.push('0');
                }
                out.push_str(octet);
            }
            out
        } else {
            s.to_string()
        };

        if normalized.len() != 12 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        Ok(HardwareId(normalized.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for HardwareId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HardwareId> for String {
    fn from(id: HardwareId) -> Self {
        id.0
    }
}

impl Display for HardwareId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical groups a bulb can belong to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Accent,
    Overhead,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Accent, Group::Overhead];
}

impl Display for Group {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Group::Accent => "Accent",
            Group::Overhead => "Overhead",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(rename = "mac")]
    pub identifier: HardwareId,
    #[serde(rename = "name")]
    pub display_name: String,
    pub group: Group,
}

/// Static table of known bulbs, keyed by hardware address.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    devices: Vec<DeviceIdentity>,
    by_id: HashMap<HardwareId, usize>,
    by_name: HashMap<String, usize>,
}

impl IdentityRegistry {
    /// Builds the registry, rejecting duplicate identifiers and names.
    pub fn new(devices: Vec<DeviceIdentity>) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::with_capacity(devices.len());
        let mut by_name = HashMap::with_capacity(devices.len());

        for (index, device) in devices.iter().enumerate() {
            if by_id.insert(device.identifier.clone(), index).is_some() {
                return Err(ConfigError::DuplicateIdentifier(
                    device.identifier.to_string(),
                ));
            }
            if by_name.insert(device.display_name.clone(), index).is_some() {
                return Err(ConfigError::DuplicateName(device.display_name.clone()));
            }
        }

        Ok(IdentityRegistry {
            devices,
            by_id,
            by_name,
        })
    }

    /// `None` means the identifier is unknown.
    pub fn lookup(&self, identifier: &HardwareId) -> Option<&DeviceIdentity> {
        self.by_id.get(identifier).map(|&i| &self.devices[i])
    }

    pub fn by_name(&self, display_name: &str) -> Option<&DeviceIdentity> {
        self.by_name.get(display_name).map(|&i| &self.devices[i])
    }

    pub fn members_of(&self, group: Group) -> BTreeSet<HardwareId> {
        self.devices
            .iter()
            .filter(|d| d.group == group)
            .map(|d| d.identifier.clone())
            .collect()
    }

    pub fn devices(&self) -> &[DeviceIdentity] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
