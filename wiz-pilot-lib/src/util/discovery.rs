use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{bail, Context};
use derivative::Derivative;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::process::Command as ProcessCommand;
use tokio::time::{timeout, Instant};

use crate::control_interface::codec::{decode_pilot, encode, Command, PilotReport, CONTROL_PORT};
use crate::identity::{Group, HardwareId, IdentityRegistry};
use crate::util::traits::MAX_REPLY_SIZE;

lazy_static! {
    static ref NEIGHBOR_PATTERN: Regex =
        Regex::new(r"\((\d{1,3}(?:\.\d{1,3}){3})\)\s+at\s+([0-9A-Fa-f:]+)")
            .expect("neighbor pattern is valid");
}

/// Where a `getPilot` broadcast goes by default.
pub const BROADCAST_ADDRESS: SocketAddrV4 =
    SocketAddrV4::new(Ipv4Addr::BROADCAST, CONTROL_PORT);

/// An address observed for a hardware identifier during one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkEndpoint {
    pub identifier: HardwareId,
    pub address: Ipv4Addr,
}

/// A known device joined with the address it was found at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResolvedDevice {
    pub display_name: String,
    pub identifier: HardwareId,
    pub group: Group,
    pub address: Ipv4Addr,
}

/// A neighbor-table entry that looked like a match but was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArpDiagnostic {
    pub entry: String,
    pub reason: String,
}

impl Display for ArpDiagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "skipped `{}`: {}", self.entry, self.reason)
    }
}

/// Extracts `(ipv4) at hw-address` pairs from neighbor-table text, in input
/// order. Text without any match yields an empty vector.
pub fn parse(raw: &str) -> Vec<NetworkEndpoint> {
    parse_with_diagnostics(raw).0
}

pub fn parse_with_diagnostics(raw: &str) -> (Vec<NetworkEndpoint>, Vec<ArpDiagnostic>) {
    let mut endpoints = Vec::new();
    let mut diagnostics = Vec::new();

    for captures in NEIGHBOR_PATTERN.captures_iter(raw) {
        let (ip, mac) = (&captures[1], &captures[2]);
        let address = match ip.parse::<Ipv4Addr>() {
            Ok(address) => address,
            Err(e) => {
                diagnostics.push(ArpDiagnostic {
                    entry: captures[0].to_string(),
                    reason: format!("bad IPv4 address: {}", e),
                });
                continue;
            }
        };
        match mac.parse::<HardwareId>() {
            Ok(identifier) => endpoints.push(NetworkEndpoint {
                identifier,
                address,
            }),
            Err(e) => diagnostics.push(ArpDiagnostic {
                entry: captures[0].to_string(),
                reason: e.to_string(),
            }),
        }
    }

    (endpoints, diagnostics)
}

/// Keeps one endpoint per identifier.
///
/// The last address observed wins; the entry stays where the identifier
/// first appeared.
pub fn dedup_last_wins(endpoints: Vec<NetworkEndpoint>) -> Vec<NetworkEndpoint> {
    let mut position: HashMap<HardwareId, usize> = HashMap::new();
    let mut unique: Vec<NetworkEndpoint> = Vec::with_capacity(endpoints.len());
    for endpoint in endpoints {
        match position.get(&endpoint.identifier) {
            Some(&i) => {
                if unique[i].address != endpoint.address {
                    debug!(
                        "{} seen at {} and {}, keeping the later one",
                        endpoint.identifier, unique[i].address, endpoint.address
                    );
                }
                unique[i].address = endpoint.address;
            }
            None => {
                position.insert(endpoint.identifier.clone(), unique.len());
                unique.push(endpoint);
            }
        }
    }
    unique
}

/// Runs `arp -a` and returns its output verbatim.
pub async fn read_neighbor_table() -> anyhow::Result<String> {
    let output = ProcessCommand::new("arp")
        .arg("-a")
        .output()
        .await
        .context("Failed to run `arp -a`")?;
    if !output.status.success() {
        bail!("`arp -a` exited with {}", output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A device that answered a broadcast `getPilot`.
///
/// Two sightings are the same if identifier and address match; the reported
/// state is ignored for that comparison.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct PilotSighting {
    pub endpoint: NetworkEndpoint,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub report: PilotReport,
}

/// The outcome of one discovery pass, split into known and unknown devices.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryPass {
    pub resolved: Vec<ResolvedDevice>,
    pub unknown: Vec<NetworkEndpoint>,
    pub diagnostics: Vec<ArpDiagnostic>,
    /// Self-reported state per identifier; only filled by broadcast discovery.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub pilots: HashMap<HardwareId, PilotReport>,
}

impl DiscoveryPass {
    /// Joins endpoints with the registry after applying the duplicate rule.
    pub fn resolve(endpoints: Vec<NetworkEndpoint>, registry: &IdentityRegistry) -> Self {
        let mut pass = DiscoveryPass::default();
        for endpoint in dedup_last_wins(endpoints) {
            match registry.lookup(&endpoint.identifier) {
                Some(identity) => pass.resolved.push(ResolvedDevice {
                    display_name: identity.display_name.clone(),
                    identifier: endpoint.identifier,
                    group: identity.group,
                    address: endpoint.address,
                }),
                None => pass.unknown.push(endpoint),
            }
        }
        pass
    }

    pub fn from_arp_text(raw: &str, registry: &IdentityRegistry) -> Self {
        let (endpoints, diagnostics) = parse_with_diagnostics(raw);
        for diagnostic in &diagnostics {
            warn!("{}", diagnostic);
        }
        DiscoveryPass {
            diagnostics,
            ..Self::resolve(endpoints, registry)
        }
    }

    /// Like [`DiscoveryPass::resolve`], keeping each device's latest report.
    pub fn from_sightings(sightings: &[PilotSighting], registry: &IdentityRegistry) -> Self {
        let endpoints = sightings.iter().map(|s| s.endpoint.clone()).collect();
        let pilots = sightings
            .iter()
            .map(|s| (s.endpoint.identifier.clone(), s.report.clone()))
            .collect();
        DiscoveryPass {
            pilots,
            ..Self::resolve(endpoints, registry)
        }
    }

    pub fn pilot(&self, identifier: &HardwareId) -> Option<&PilotReport> {
        self.pilots.get(identifier)
    }

    /// Keeps only known devices in `group`.
    pub fn retain_group(&mut self, group: Group) {
        self.resolved.retain(|d| d.group == group);
    }
}

pub struct Discovery;

impl Discovery {
    /// Reads the neighbor table and resolves it against `registry`.
    pub async fn from_neighbor_table(registry: &IdentityRegistry) -> anyhow::Result<DiscoveryPass> {
        let raw = read_neighbor_table().await?;
        let pass = DiscoveryPass::from_arp_text(&raw, registry);
        info!(
            "Neighbor table: {} known, {} unknown",
            pass.resolved.len(),
            pass.unknown.len()
        );
        Ok(pass)
    }

    /// Sends one `getPilot` to `target` and collects every self-report that
    /// arrives before `given_timeout` runs out.
    pub async fn broadcast_pilot(
        target: SocketAddr,
        given_timeout: Duration,
    ) -> anyhow::Result<Vec<PilotSighting>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(&encode(&Command::GetPilot), target)
            .await
            .with_context(|| format!("Failed to send getPilot to {}", target))?;

        let mut sightings = Vec::new();
        let mut buffer = [0; MAX_REPLY_SIZE];
        let timeout_end = Instant::now() + given_timeout;

        loop {
            let now = Instant::now();
            if now >= timeout_end {
                break;
            }

            match timeout(timeout_end - now, socket.recv_from(&mut buffer)).await {
                Ok(Ok((number_of_bytes, source))) => {
                    let address = match source {
                        SocketAddr::V4(v4) => *v4.ip(),
                        SocketAddr::V6(_) => continue,
                    };
                    let sighting = decode_pilot(&buffer[..number_of_bytes]).and_then(|report| {
                        Ok(PilotSighting {
                            endpoint: NetworkEndpoint {
                                identifier: report.identifier()?,
                                address,
                            },
                            report,
                        })
                    });
                    match sighting {
                        Ok(sighting) if sightings.contains(&sighting) => {
                            debug!("Found device {:?} again, skipping", sighting.endpoint);
                        }
                        Ok(sighting) => {
                            info!("Found device: {:?}", sighting.endpoint);
                            sightings.push(sighting);
                        }
                        Err(e) => warn!("Ignoring reply from {}: {}", source, e),
                    }
                }
                Ok(Err(e)) => {
                    warn!("Failed to receive response: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(sightings)
    }
}
