//! Column-aligned, grouped text reports for discovery and dispatch.

use std::fmt::Write;

use serde::Serialize;

use crate::control_interface::codec::PilotReport;
use crate::control_interface::DispatchResult;
use crate::identity::Group;
use crate::util::discovery::DiscoveryPass;

/// Alias printed for devices missing from the identity table.
pub const UNKNOWN_ALIAS: &str = "UNKNOWN";

/// Alias column width when there is nothing to measure.
const MIN_ALIAS_WIDTH: usize = 7;

/// The buckets a report is split into, in print order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Accent,
    Overhead,
    Unknown,
}

impl Section {
    fn header(self) -> &'static str {
        match self {
            Section::Accent => "Accent Devices:",
            Section::Overhead => "Overhead Devices:",
            Section::Unknown => "Unknown Devices:",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryRow {
    pub alias: String,
    pub identifier: String,
    pub address: String,
    /// What the device said about itself, when it answered a broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pilot: Option<PilotReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub accent: Vec<DiscoveryRow>,
    pub overhead: Vec<DiscoveryRow>,
    pub unknown: Vec<DiscoveryRow>,
    /// Non-fatal problems found while reading the neighbor table.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DiscoveryReport {
    pub fn new(pass: &DiscoveryPass) -> Self {
        let mut report = DiscoveryReport {
            warnings: pass.diagnostics.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };

        for device in &pass.resolved {
            let row = DiscoveryRow {
                alias: device.display_name.clone(),
                identifier: device.identifier.to_string(),
                address: device.address.to_string(),
                pilot: pass.pilot(&device.identifier).cloned(),
            };
            match device.group {
                Group::Accent => report.accent.push(row),
                Group::Overhead => report.overhead.push(row),
            }
        }
        report.unknown = pass
            .unknown
            .iter()
            .map(|endpoint| DiscoveryRow {
                alias: UNKNOWN_ALIAS.to_string(),
                identifier: endpoint.identifier.to_string(),
                address: endpoint.address.to_string(),
                pilot: pass.pilot(&endpoint.identifier).cloned(),
            })
            .collect();

        for rows in [&mut report.accent, &mut report.overhead, &mut report.unknown] {
            rows.sort_by(|a, b| a.alias.cmp(&b.alias));
        }
        report
    }

    fn sections(&self) -> [(Section, &[DiscoveryRow]); 3] {
        [
            (Section::Accent, self.accent.as_slice()),
            (Section::Overhead, self.overhead.as_slice()),
            (Section::Unknown, self.unknown.as_slice()),
        ]
    }

    pub fn render(&self) -> String {
        let sections = self.sections();
        let width = alias_width(
            sections
                .iter()
                .flat_map(|(_, rows)| rows.iter())
                .map(|r| r.alias.as_str()),
        );

        let mut out = String::new();
        for warning in &self.warnings {
            let _ = writeln!(out, "warning: {}", warning);
        }
        for (section, rows) in sections {
            if rows.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}", section.header());
            for row in rows {
                let mut line = format!(
                    "{:<width$}  {:<12}  {:<15}",
                    row.alias,
                    row.identifier,
                    row.address,
                    width = width
                );
                if let Some(pilot) = &row.pilot {
                    line.push_str("  ");
                    line.push_str(&pilot_columns(pilot));
                }
                let _ = writeln!(out, "{}", line.trim_end());
            }
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRow {
    pub alias: String,
    pub identifier: String,
    pub address: String,
    pub success: bool,
    pub red: Option<u8>,
    pub green: Option<u8>,
    pub blue: Option<u8>,
    pub dimming: Option<u8>,
    pub scene_id: Option<u32>,
    pub group_override: bool,
    pub device_override: bool,
}

/// Dispatch results grouped for printing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub accent: Vec<DispatchRow>,
    pub overhead: Vec<DispatchRow>,
}

impl DispatchReport {
    pub fn new(results: &[DispatchResult]) -> Self {
        let mut report = DispatchReport::default();
        for result in results {
            let effective = result.effective.unwrap_or_default();
            let row = DispatchRow {
                alias: result.device.display_name.clone(),
                identifier: result.device.identifier.to_string(),
                address: result.device.address.to_string(),
                success: result.outcome.is_success(),
                red: effective.params.red,
                green: effective.params.green,
                blue: effective.params.blue,
                dimming: effective.params.dimming,
                scene_id: effective.params.scene_id,
                group_override: effective.group_override,
                device_override: effective.device_override,
            };
            match result.device.group {
                Group::Accent => report.accent.push(row),
                Group::Overhead => report.overhead.push(row),
            }
        }
        report.accent.sort_by(|a, b| a.alias.cmp(&b.alias));
        report.overhead.sort_by(|a, b| a.alias.cmp(&b.alias));
        report
    }

    pub fn succeeded(&self) -> usize {
        self.accent
            .iter()
            .chain(&self.overhead)
            .filter(|r| r.success)
            .count()
    }

    pub fn render(&self) -> String {
        let width = alias_width(
            self.accent
                .iter()
                .chain(&self.overhead)
                .map(|r| r.alias.as_str()),
        );

        let mut out = String::new();
        let sections = [
            (Section::Accent, &self.accent),
            (Section::Overhead, &self.overhead),
        ];
        for (section, rows) in sections {
            if rows.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{}", section.header());
            for row in rows {
                let _ = writeln!(out, "{}", dispatch_line(row, width));
            }
            out.push('\n');
        }
        out
    }
}

fn dispatch_line(row: &DispatchRow, width: usize) -> String {
    let mut line = format!(
        "{:<width$}  {:<12}  {:<15}  SUCCESS={:<5}  RED={:<3}  GREEN={:<3}  BLUE={:<3}  DIMMING={}",
        row.alias,
        row.identifier,
        row.address,
        if row.success { "TRUE" } else { "FALSE" },
        value(row.red),
        value(row.green),
        value(row.blue),
        value(row.dimming),
        width = width
    );
    if let Some(scene) = row.scene_id {
        let _ = write!(line, "  SCENE={}", scene);
    }
    if row.group_override {
        line.push_str("  GROUP_OVERRIDE");
    }
    if row.device_override {
        line.push_str("  OVERRIDE");
    }
    line
}

fn pilot_columns(pilot: &PilotReport) -> String {
    format!(
        "STATE={:<5}  SCENEID={:<3}  RED={:<3}  GREEN={:<3}  BLUE={:<3}  COOL={:<3}  WARM={:<3}  DIMMING={}",
        pilot.state.map_or("-", |on| if on { "TRUE" } else { "FALSE" }),
        value(pilot.scene_id),
        value(pilot.red),
        value(pilot.green),
        value(pilot.blue),
        value(pilot.cool),
        value(pilot.warm),
        value(pilot.dimming),
    )
}

fn value<T: ToString>(field: Option<T>) -> String {
    field.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn alias_width<'a>(aliases: impl Iterator<Item = &'a str>) -> usize {
    aliases.map(str::len).max().unwrap_or(MIN_ALIAS_WIDTH)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::config::ParameterSet;
    use crate::control_interface::codec::{decode_pilot, Failure, Outcome};
    use crate::identity::{DeviceIdentity, IdentityRegistry};
    use crate::resolver::EffectiveParameters;
    use crate::util::discovery::{NetworkEndpoint, PilotSighting, ResolvedDevice};

    fn registry() -> IdentityRegistry {
        IdentityRegistry::new(vec![
            DeviceIdentity {
                identifier: "cc40853d9142".parse().unwrap(),
                display_name: "FACES".into(),
                group: Group::Accent,
            },
            DeviceIdentity {
                identifier: "d8a01165a452".parse().unwrap(),
                display_name: "DRESSER".into(),
                group: Group::Accent,
            },
            DeviceIdentity {
                identifier: "cc4085558f40".parse().unwrap(),
                display_name: "BATHROOM".into(),
                group: Group::Overhead,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_discovery_report_sections() {
        let raw = "? (192.168.1.5) at cc:40:85:3d:91:42 on en0\n\
                   ? (192.168.1.7) at d8:a0:11:65:a4:52 on en0\n\
                   ? (192.168.1.9) at aa:bb:cc:dd:ee:ff on en0\n";
        let pass = DiscoveryPass::from_arp_text(raw, &registry());
        let report = DiscoveryReport::new(&pass);

        assert_eq!(report.accent[0].alias, "DRESSER");
        assert!(report.overhead.is_empty());
        assert_eq!(report.unknown[0].identifier, "aabbccddeeff");

        let expected = "\
Accent Devices:
DRESSER  d8a01165a452  192.168.1.7
FACES    cc40853d9142  192.168.1.5

Unknown Devices:
UNKNOWN  aabbccddeeff  192.168.1.9

";
        assert_eq!(report.render(), expected);
    }

    #[test]
    fn test_broadcast_report_shows_device_state() {
        let sighting = |mac: &str, last, reply: &str| PilotSighting {
            endpoint: NetworkEndpoint {
                identifier: mac.parse().unwrap(),
                address: Ipv4Addr::new(192, 168, 1, last),
            },
            report: decode_pilot(reply.as_bytes()).unwrap(),
        };
        let sightings = vec![
            sighting(
                "cc40853d9142",
                5,
                r#"{"result":{"mac":"cc40853d9142","state":true,"sceneId":0,"r":255,"g":30,"b":10,"c":0,"w":0,"dimming":10}}"#,
            ),
            sighting(
                "aabbccddeeff",
                9,
                r#"{"result":{"mac":"aabbccddeeff","state":false,"sceneId":11,"dimming":100}}"#,
            ),
        ];
        let pass = DiscoveryPass::from_sightings(&sightings, &registry());
        let report = DiscoveryReport::new(&pass);
        assert_eq!(report.accent[0].pilot.as_ref().unwrap().red, Some(255));

        let expected = "\
Accent Devices:
FACES    cc40853d9142  192.168.1.5      STATE=TRUE   SCENEID=0    RED=255  GREEN=30   BLUE=10   COOL=0    WARM=0    DIMMING=10

Unknown Devices:
UNKNOWN  aabbccddeeff  192.168.1.9      STATE=FALSE  SCENEID=11   RED=-    GREEN=-    BLUE=-    COOL=-    WARM=-    DIMMING=100

";
        assert_eq!(report.render(), expected);
    }

    #[test]
    fn test_empty_report_renders_nothing() {
        let report = DiscoveryReport::new(&DiscoveryPass::default());
        assert_eq!(report.render(), "");
        assert_eq!(DispatchReport::new(&[]).render(), "");
    }

    #[test]
    fn test_dispatch_report_lines() {
        let device = |name: &str, mac: &str, group, last| ResolvedDevice {
            display_name: name.to_string(),
            identifier: mac.parse().unwrap(),
            group,
            address: Ipv4Addr::new(10, 0, 0, last),
        };
        let results = vec![
            DispatchResult {
                device: device("FACES", "cc40853d9142", Group::Accent, 1),
                effective: Some(EffectiveParameters {
                    params: ParameterSet::rgb(255, 30, 10).with_dimming(10),
                    group_override: true,
                    device_override: true,
                }),
                outcome: Outcome::Success,
            },
            DispatchResult {
                device: device("BATHROOM", "cc4085558f40", Group::Overhead, 2),
                effective: Some(EffectiveParameters {
                    params: ParameterSet {
                        scene_id: Some(6),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
                outcome: Outcome::Failure(Failure::Timeout),
            },
        ];

        let report = DispatchReport::new(&results);
        assert_eq!(report.succeeded(), 1);
        let rendered = report.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Accent Devices:");
        assert_eq!(
            lines[1],
            "FACES     cc40853d9142  10.0.0.1         SUCCESS=TRUE   RED=255  GREEN=30   BLUE=10   DIMMING=10  GROUP_OVERRIDE  OVERRIDE"
        );
        assert_eq!(lines[3], "Overhead Devices:");
        assert_eq!(
            lines[4],
            "BATHROOM  cc4085558f40  10.0.0.2         SUCCESS=FALSE  RED=-    GREEN=-    BLUE=-    DIMMING=-  SCENE=6"
        );
    }
}
